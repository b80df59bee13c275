use serde::{Deserialize, Serialize};

/// Ordered account privilege tier. Doctor-tier and hospital-tier accounts
/// are authorization-equivalent and share the `Hospital` level.
///
/// The variant order defines the "at least" comparison: every higher tier
/// satisfies every lower gate without enumerating role combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    User,
    Hospital,
    Admin,
}

impl AccessLevel {
    /// Integer form persisted on the account document.
    pub const fn as_i32(self) -> i32 {
        match self {
            AccessLevel::User => 1,
            AccessLevel::Hospital => 5,
            AccessLevel::Admin => 10,
        }
    }

    /// Stored integers outside the known set resolve to the lowest tier.
    pub fn from_stored(value: i32) -> Self {
        match value {
            10 => AccessLevel::Admin,
            5 => AccessLevel::Hospital,
            _ => AccessLevel::User,
        }
    }

    pub fn satisfies(self, min: AccessLevel) -> bool {
        self >= min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(AccessLevel::User < AccessLevel::Hospital);
        assert!(AccessLevel::Hospital < AccessLevel::Admin);
    }

    #[test]
    fn boundary_equality_passes() {
        assert!(AccessLevel::Hospital.satisfies(AccessLevel::Hospital));
        assert!(AccessLevel::Admin.satisfies(AccessLevel::Admin));
        assert!(AccessLevel::Admin.satisfies(AccessLevel::User));
        assert!(!AccessLevel::User.satisfies(AccessLevel::Hospital));
    }

    #[test]
    fn stored_round_trip() {
        for level in [AccessLevel::User, AccessLevel::Hospital, AccessLevel::Admin] {
            assert_eq!(AccessLevel::from_stored(level.as_i32()), level);
        }
    }

    #[test]
    fn unknown_stored_value_is_user() {
        assert_eq!(AccessLevel::from_stored(0), AccessLevel::User);
        assert_eq!(AccessLevel::from_stored(7), AccessLevel::User);
        assert_eq!(AccessLevel::from_stored(-3), AccessLevel::User);
    }
}
