use crate::server_config::StorageConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VendorError {
    #[error("HTTP fetch error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Credential vendor rejected the request: {0}")]
    Rejected(u16),
}

/// Short-lived credentials scoped to one folder prefix of the bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopedCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: String,
    pub bucket: String,
    pub prefix: String,
}

#[derive(Serialize)]
struct CredentialRequest<'a> {
    bucket: &'a str,
    prefix: &'a str,
    ttl_seconds: u64,
}

/// Client for the external object-storage credential vendor. File bytes
/// never flow through this server; callers upload/download directly with
/// the vended credentials.
pub struct StorageVendor {
    client: Client,
    config: StorageConfig,
}

impl StorageVendor {
    pub fn new(config: StorageConfig) -> Self {
        StorageVendor {
            client: Client::new(),
            config,
        }
    }

    pub async fn issue_credentials(&self, prefix: &str) -> Result<ScopedCredentials, VendorError> {
        let request = CredentialRequest {
            bucket: &self.config.bucket,
            prefix,
            ttl_seconds: self.config.credential_ttl_seconds,
        };

        let response = self
            .client
            .post(&self.config.vendor_url)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(VendorError::Rejected(response.status().as_u16()));
        }

        let credentials = response.json::<ScopedCredentials>().await?;
        Ok(credentials)
    }
}
