use database::roles::AccessLevel;
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use common::api_error::ApiError;
use common::server_config::IdentityConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct Claims {
    pub(crate) iss: String,
    pub(crate) sub: Option<String>, // 用户唯一标识
    pub(crate) aud: Value, // 可能是字符串或数组
    pub(crate) exp: usize,
    pub(crate) realm_access: Option<RealmAccess>, // realm 级别权限
    pub(crate) scope: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct RealmAccess {
    pub(crate) roles: Option<Vec<String>>, // realm 角色
}

/// The authenticated caller, resolved to an internal account and attached
/// to the request by the auth middleware.
#[derive(Debug, Clone)]
pub(crate) struct Principal {
    pub(crate) id: ObjectId,
    pub(crate) access_level: AccessLevel,
    pub(crate) hospital: Option<ObjectId>,
    pub(crate) profiles: Vec<ObjectId>,
}

impl Principal {
    pub(crate) fn require(&self, min: AccessLevel) -> Result<(), ApiError> {
        if self.access_level.satisfies(min) {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }

    pub(crate) fn is_privileged(&self) -> bool {
        self.access_level >= AccessLevel::Hospital
    }
}

/// Highest-priority group wins: the admin group beats the hospital group
/// beats the default user tier.
pub(crate) fn access_level_from_roles(roles: &[String], identity: &IdentityConfig) -> AccessLevel {
    if roles.iter().any(|r| r == &identity.admin_group) {
        AccessLevel::Admin
    } else if roles.iter().any(|r| r == &identity.hospital_group) {
        AccessLevel::Hospital
    } else {
        AccessLevel::User
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> IdentityConfig {
        IdentityConfig {
            issuer_url: "https://id.example.org/realms/records".to_string(),
            audience: "records-api".to_string(),
            jwks_url: "https://id.example.org/realms/records/certs".to_string(),
            token_url: "https://id.example.org/realms/records/token".to_string(),
            register_url: "https://id.example.org/realms/records/users".to_string(),
            admin_group: "records-admin".to_string(),
            hospital_group: "records-hospital".to_string(),
        }
    }

    #[test]
    fn admin_group_wins_over_hospital_group() {
        let roles = vec!["records-hospital".to_string(), "records-admin".to_string()];
        assert_eq!(access_level_from_roles(&roles, &identity()), AccessLevel::Admin);
    }

    #[test]
    fn hospital_group_maps_to_hospital_tier() {
        let roles = vec!["records-hospital".to_string()];
        assert_eq!(
            access_level_from_roles(&roles, &identity()),
            AccessLevel::Hospital
        );
    }

    #[test]
    fn unknown_groups_default_to_user() {
        let roles = vec!["offline_access".to_string()];
        assert_eq!(access_level_from_roles(&roles, &identity()), AccessLevel::User);
        assert_eq!(access_level_from_roles(&[], &identity()), AccessLevel::User);
    }
}
