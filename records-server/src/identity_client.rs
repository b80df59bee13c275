use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use common::server_config::IdentityConfig;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("HTTP fetch error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("identity provider rejected the request: {0}")]
    Rejected(u16),

    #[error("identity provider response was malformed: {0}")]
    Malformed(String),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct RegisteredUser {
    id: String,
}

/// HTTP client for the external identity provider. Verification of issued
/// tokens happens in the auth middleware; this client only covers the two
/// provisioning calls the account surface needs.
pub struct IdentityClient {
    client: Client,
    config: IdentityConfig,
}

impl IdentityClient {
    pub fn new(config: IdentityConfig) -> Self {
        IdentityClient {
            client: Client::new(),
            config,
        }
    }

    /// Create the user at the provider; returns the stable subject id
    /// that later appears as the token's `sub` claim.
    pub async fn register_user(&self, email: &str, password: &str) -> Result<String, IdentityError> {
        let body = serde_json::json!({
            "username": email,
            "email": email,
            "password": password,
            "enabled": true,
        });
        let response = self
            .client
            .post(&self.config.register_url)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IdentityError::Rejected(response.status().as_u16()));
        }

        let user = response
            .json::<RegisteredUser>()
            .await
            .map_err(|e| IdentityError::Malformed(e.to_string()))?;
        Ok(user.id)
    }

    /// Password-grant login; returns the bearer credential handed back to
    /// the caller in the token response header.
    pub async fn login(&self, email: &str, password: &str) -> Result<String, IdentityError> {
        let form = [
            ("grant_type", "password"),
            ("client_id", self.config.audience.as_str()),
            ("username", email),
            ("password", password),
        ];
        let response = self
            .client
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IdentityError::Rejected(response.status().as_u16()));
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| IdentityError::Malformed(e.to_string()))?;
        Ok(token.access_token)
    }
}
