use actix_web::{HttpMessage, HttpRequest};
use mongodb::bson::oid::ObjectId;
use mongodb::bson::Document;

use common::api_error::ApiError;
use database::query::rewrite_filter;
use database::roles::AccessLevel;

use crate::auth_information::Principal;

/// Route ids run through their own format gate before any business logic:
/// a malformed id is 404, not 400 — the route names a resource that
/// cannot exist.
pub(crate) fn parse_id(raw: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(raw).map_err(|_| ApiError::NotFound)
}

/// Body- and query-supplied references are input, so a malformed one is a
/// 400 like any other unresolvable reference.
pub(crate) fn parse_ref(raw: &str, entity: &'static str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(raw).map_err(|_| ApiError::ReferenceNotFound(entity))
}

pub(crate) fn principal(req: &HttpRequest) -> Result<Principal, ApiError> {
    req.extensions()
        .get::<Principal>()
        .cloned()
        .ok_or(ApiError::Unauthenticated)
}

/// Optional `filter` query parameter: a JSON object whose comparison
/// tokens are rewritten to store operators before querying.
pub(crate) fn parse_list_filter(raw: Option<&str>) -> Result<Document, ApiError> {
    let raw = match raw {
        Some(r) => r,
        None => return Ok(Document::new()),
    };
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|_| ApiError::Validation("filter must be a JSON object".to_string()))?;
    let map = value
        .as_object()
        .ok_or_else(|| ApiError::Validation("filter must be a JSON object".to_string()))?;
    rewrite_filter(map).map_err(|e| ApiError::Validation(e.to_string()))
}

/// Role-based implicit filter for profile-owned list endpoints: admins
/// see everything, hospital-tier callers are pinned to their own
/// creations, plain users must name one of their own profiles.
pub(crate) fn scoped_list_filter(
    caller: &Principal,
    profile: Option<&str>,
    mut base: Document,
) -> Result<Document, ApiError> {
    match caller.access_level {
        AccessLevel::Admin => {
            if let Some(raw) = profile {
                base.insert("profile", parse_ref(raw, "profile")?);
            }
        }
        AccessLevel::Hospital => {
            base.insert("created_by", caller.id);
            if let Some(raw) = profile {
                base.insert("profile", parse_ref(raw, "profile")?);
            }
        }
        AccessLevel::User => {
            let raw = profile.ok_or_else(|| {
                ApiError::Validation("profile query parameter is required".to_string())
            })?;
            let pid = parse_ref(raw, "profile")?;
            if !caller.profiles.contains(&pid) {
                return Err(ApiError::Forbidden);
            }
            base.insert("profile", pid);
        }
    }
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(level: AccessLevel, profiles: Vec<ObjectId>) -> Principal {
        Principal {
            id: ObjectId::new(),
            access_level: level,
            hospital: None,
            profiles,
        }
    }

    #[test]
    fn malformed_route_id_is_not_found() {
        assert!(matches!(parse_id("not-an-id"), Err(ApiError::NotFound)));
    }

    #[test]
    fn malformed_reference_is_bad_request() {
        assert!(matches!(
            parse_ref("nope", "profile"),
            Err(ApiError::ReferenceNotFound("profile"))
        ));
    }

    #[test]
    fn absent_filter_is_empty() {
        assert!(parse_list_filter(None).unwrap().is_empty());
    }

    #[test]
    fn filter_tokens_are_rewritten() {
        let doc =
            parse_list_filter(Some(r#"{"time_slot":{"gte":"2026-09-01T08:00:00Z"}}"#)).unwrap();
        assert!(doc.get_document("time_slot").unwrap().get("$gte").is_some());
    }

    #[test]
    fn non_object_filter_is_rejected() {
        assert!(parse_list_filter(Some("[1,2]")).is_err());
        assert!(parse_list_filter(Some("{broken")).is_err());
    }

    #[test]
    fn admin_list_filter_is_unconstrained() {
        let filter =
            scoped_list_filter(&caller(AccessLevel::Admin, vec![]), None, Document::new()).unwrap();
        assert!(filter.is_empty());
    }

    #[test]
    fn hospital_list_filter_pins_the_creator() {
        let c = caller(AccessLevel::Hospital, vec![]);
        let filter = scoped_list_filter(&c, None, Document::new()).unwrap();
        assert_eq!(filter.get_object_id("created_by").unwrap(), c.id);
    }

    #[test]
    fn user_must_name_an_owned_profile() {
        let owned = ObjectId::new();
        let c = caller(AccessLevel::User, vec![owned]);

        assert!(matches!(
            scoped_list_filter(&c, None, Document::new()),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            scoped_list_filter(&c, Some(&ObjectId::new().to_hex()), Document::new()),
            Err(ApiError::Forbidden)
        ));
        let filter = scoped_list_filter(&c, Some(&owned.to_hex()), Document::new()).unwrap();
        assert_eq!(filter.get_object_id("profile").unwrap(), owned);
    }
}
