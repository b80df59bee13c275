//! Authorization middlewares: minimum-level gates and the two generic
//! ownership checks. All of them run after the auth middleware and before
//! the handler, and never write.
//!
//! The decision logic lives in plain async functions over a
//! [`ReferenceStore`] so it can be driven by an in-memory store in tests;
//! the middleware wrappers only translate verdicts into responses.

use actix_web::body::{EitherBody, MessageBody};
use actix_web::http::Method;
use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Bson, Document};
use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;

use database::provider::{DbError, ReferenceStore};
use database::roles::AccessLevel;

use crate::auth_information::Principal;

/// Levels that bypass the profile-membership checks entirely.
pub(crate) const PRIVILEGED: &[AccessLevel] = &[AccessLevel::Hospital, AccessLevel::Admin];
/// Levels that bypass the creating-account ownership checks.
pub(crate) const ADMIN_ONLY: &[AccessLevel] = &[AccessLevel::Admin];

fn interrupt<B>(
    req: ServiceRequest,
    response: HttpResponse,
) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    Ok(req.into_response(response.map_into_boxed_body().map_into_right_body()))
}

fn unauthorized<B>(req: ServiceRequest) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    interrupt(req, HttpResponse::Unauthorized().body("Authentication required"))
}

fn forbidden<B>(req: ServiceRequest) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    interrupt(req, HttpResponse::Forbidden().body("Insufficient permissions"))
}

fn not_found<B>(req: ServiceRequest) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    interrupt(req, HttpResponse::NotFound().body("Resource not found"))
}

fn server_error<B>(req: ServiceRequest) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    interrupt(req, HttpResponse::InternalServerError().body("Internal server error"))
}

// ---------------------------------------------------------------------------
// Minimum-level gate

/// Passes iff the principal's access level is at least the required one.
/// Equality at the boundary passes. Doctor-tier and hospital-tier share
/// the same threshold in this domain, so `doctor()` and `hospital()` are
/// two names for the same gate.
pub struct RequireLevel {
    min: AccessLevel,
    writes_only: bool,
}

impl RequireLevel {
    pub fn admin() -> Self {
        RequireLevel {
            min: AccessLevel::Admin,
            writes_only: false,
        }
    }

    pub fn hospital() -> Self {
        RequireLevel {
            min: AccessLevel::Hospital,
            writes_only: false,
        }
    }

    pub fn doctor() -> Self {
        RequireLevel {
            min: AccessLevel::Hospital,
            writes_only: false,
        }
    }

    /// Gate only mutating methods; GET and HEAD pass through. Lets one
    /// resource serve an open read path next to a gated write path.
    pub fn writes_only(mut self) -> Self {
        self.writes_only = true;
        self
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequireLevel
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RequireLevelService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequireLevelService {
            service: Rc::new(service),
            min: self.min,
            writes_only: self.writes_only,
        }))
    }
}

pub struct RequireLevelService<S> {
    service: Rc<S>,
    min: AccessLevel,
    writes_only: bool,
}

impl<S, B> Service<ServiceRequest> for RequireLevelService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    actix_web::dev::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        if self.writes_only && (req.method() == Method::GET || req.method() == Method::HEAD) {
            return Box::pin(async move {
                let res = service.call(req).await.map_err(actix_web::Error::from)?;
                Ok(res.map_into_left_body())
            });
        }

        let min = self.min;
        let verdict = match req.extensions().get::<Principal>() {
            None => Some(GuardVerdict::Unauthenticated),
            Some(p) if !p.access_level.satisfies(min) => Some(GuardVerdict::Forbidden),
            Some(_) => None,
        };

        match verdict {
            Some(GuardVerdict::Unauthenticated) => Box::pin(async move { unauthorized(req) }),
            Some(_) => Box::pin(async move { forbidden(req) }),
            None => Box::pin(async move {
                let res = service.call(req).await.map_err(actix_web::Error::from)?;
                Ok(res.map_into_left_body())
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Ownership checks

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GuardVerdict {
    Pass,
    Unauthenticated,
    Forbidden,
    NotFound,
}

/// Which principal value the document's owner field must equal.
#[derive(Clone, Copy)]
pub enum PrincipalField {
    Id,
    Hospital,
}

/// Where the membership value of the list check comes from: the route id
/// itself, or a named field of the loaded document.
#[derive(Clone, Copy)]
pub enum ValueSource {
    RouteId,
    DocumentField(&'static str),
}

/// Policy when the named field is absent on the loaded document. `Allow`
/// preserves the original fallthrough (unassigned resources are reachable
/// past authentication); `Deny` closes that gap.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum MissingFieldPolicy {
    Allow,
    Deny,
}

/// One reference hop: follow `ref_field` on the primary document into
/// `collection` before reading the owner field there.
#[derive(Clone, Copy)]
pub struct Hop {
    pub collection: &'static str,
    pub ref_field: &'static str,
}

fn field_object_id(doc: &Document, field: &str) -> Option<ObjectId> {
    match doc.get(field) {
        Some(Bson::ObjectId(v)) => Some(*v),
        _ => None,
    }
}

/// Direct-field ownership: the (optionally hopped-to) document's owner
/// field must equal the expected principal value.
pub(crate) async fn evaluate_ownership(
    store: &dyn ReferenceStore,
    collection: &str,
    owner_field: &str,
    hop: Option<Hop>,
    expected: ObjectId,
    id: ObjectId,
) -> Result<GuardVerdict, DbError> {
    let doc = match store.find_document(collection, id).await? {
        Some(d) => d,
        None => return Ok(GuardVerdict::NotFound),
    };
    let target = match hop {
        None => doc,
        Some(hop) => {
            let ref_id = match field_object_id(&doc, hop.ref_field) {
                Some(v) => v,
                None => return Ok(GuardVerdict::Forbidden),
            };
            match store.find_document(hop.collection, ref_id).await? {
                Some(d) => d,
                None => return Ok(GuardVerdict::NotFound),
            }
        }
    };
    Ok(match field_object_id(&target, owner_field) {
        Some(owner) if owner == expected => GuardVerdict::Pass,
        _ => GuardVerdict::Forbidden,
    })
}

/// List-membership ownership: the value named by `source` must appear in
/// the principal's profile list; absence of the named field falls back to
/// the configured policy.
pub(crate) async fn evaluate_membership(
    store: &dyn ReferenceStore,
    collection: &str,
    source: ValueSource,
    missing: MissingFieldPolicy,
    member_of: &[ObjectId],
    id: ObjectId,
) -> Result<GuardVerdict, DbError> {
    let doc = match store.find_document(collection, id).await? {
        Some(d) => d,
        None => return Ok(GuardVerdict::NotFound),
    };
    let value = match source {
        ValueSource::RouteId => Some(id),
        ValueSource::DocumentField(name) => field_object_id(&doc, name),
    };
    Ok(match value {
        None => match missing {
            MissingFieldPolicy::Allow => GuardVerdict::Pass,
            MissingFieldPolicy::Deny => GuardVerdict::Forbidden,
        },
        Some(v) if member_of.contains(&v) => GuardVerdict::Pass,
        Some(_) => GuardVerdict::Forbidden,
    })
}

/// Direct-field ownership middleware over the `{id}` route parameter.
pub struct OwnsDocument {
    pub store: Arc<dyn ReferenceStore>,
    pub collection: &'static str,
    pub owner_field: &'static str,
    pub hop: Option<Hop>,
    pub principal_field: PrincipalField,
    pub exclude: &'static [AccessLevel],
}

impl<S, B> Transform<S, ServiceRequest> for OwnsDocument
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = OwnsDocumentService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(OwnsDocumentService {
            service: Rc::new(service),
            store: self.store.clone(),
            collection: self.collection,
            owner_field: self.owner_field,
            hop: self.hop,
            principal_field: self.principal_field,
            exclude: self.exclude,
        }))
    }
}

pub struct OwnsDocumentService<S> {
    service: Rc<S>,
    store: Arc<dyn ReferenceStore>,
    collection: &'static str,
    owner_field: &'static str,
    hop: Option<Hop>,
    principal_field: PrincipalField,
    exclude: &'static [AccessLevel],
}

impl<S, B> Service<ServiceRequest> for OwnsDocumentService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    actix_web::dev::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let store = self.store.clone();
        let collection = self.collection;
        let owner_field = self.owner_field;
        let hop = self.hop;
        let principal_field = self.principal_field;
        let exclude = self.exclude;

        Box::pin(async move {
            let maybe_principal = req.extensions().get::<Principal>().cloned();
            let principal = match maybe_principal {
                Some(p) => p,
                None => return unauthorized(req),
            };
            if exclude.contains(&principal.access_level) {
                let res = service.call(req).await.map_err(actix_web::Error::from)?;
                return Ok(res.map_into_left_body());
            }

            let raw = req.match_info().get("id").unwrap_or_default().to_string();
            let id = match ObjectId::parse_str(&raw) {
                Ok(id) => id,
                Err(_) => return not_found(req),
            };
            let expected = match principal_field {
                PrincipalField::Id => principal.id,
                PrincipalField::Hospital => match principal.hospital {
                    Some(h) => h,
                    None => return forbidden(req),
                },
            };

            match evaluate_ownership(store.as_ref(), collection, owner_field, hop, expected, id)
                .await
            {
                Ok(GuardVerdict::Pass) => {
                    let res = service.call(req).await.map_err(actix_web::Error::from)?;
                    Ok(res.map_into_left_body())
                }
                Ok(GuardVerdict::NotFound) => not_found(req),
                Ok(_) => forbidden(req),
                Err(_) => server_error(req),
            }
        })
    }
}

/// List-membership ownership middleware over the `{id}` route parameter.
pub struct MemberOfList {
    pub store: Arc<dyn ReferenceStore>,
    pub collection: &'static str,
    pub source: ValueSource,
    pub exclude: &'static [AccessLevel],
    pub missing: MissingFieldPolicy,
}

impl<S, B> Transform<S, ServiceRequest> for MemberOfList
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = MemberOfListService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MemberOfListService {
            service: Rc::new(service),
            store: self.store.clone(),
            collection: self.collection,
            source: self.source,
            exclude: self.exclude,
            missing: self.missing,
        }))
    }
}

pub struct MemberOfListService<S> {
    service: Rc<S>,
    store: Arc<dyn ReferenceStore>,
    collection: &'static str,
    source: ValueSource,
    exclude: &'static [AccessLevel],
    missing: MissingFieldPolicy,
}

impl<S, B> Service<ServiceRequest> for MemberOfListService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    actix_web::dev::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let store = self.store.clone();
        let collection = self.collection;
        let source = self.source;
        let exclude = self.exclude;
        let missing = self.missing;

        Box::pin(async move {
            let maybe_principal = req.extensions().get::<Principal>().cloned();
            let principal = match maybe_principal {
                Some(p) => p,
                None => return unauthorized(req),
            };
            if exclude.contains(&principal.access_level) {
                let res = service.call(req).await.map_err(actix_web::Error::from)?;
                return Ok(res.map_into_left_body());
            }

            let raw = req.match_info().get("id").unwrap_or_default().to_string();
            let id = match ObjectId::parse_str(&raw) {
                Ok(id) => id,
                Err(_) => return not_found(req),
            };

            match evaluate_membership(
                store.as_ref(),
                collection,
                source,
                missing,
                &principal.profiles,
                id,
            )
            .await
            {
                Ok(GuardVerdict::Pass) => {
                    let res = service.call(req).await.map_err(actix_web::Error::from)?;
                    Ok(res.map_into_left_body())
                }
                Ok(GuardVerdict::NotFound) => not_found(req),
                Ok(_) => forbidden(req),
                Err(_) => server_error(req),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mongodb::bson::doc;
    use std::collections::HashMap;

    struct FakeStore {
        docs: HashMap<(&'static str, ObjectId), Document>,
    }

    impl FakeStore {
        fn new() -> Self {
            FakeStore {
                docs: HashMap::new(),
            }
        }

        fn put(&mut self, collection: &'static str, id: ObjectId, doc: Document) {
            self.docs.insert((collection, id), doc);
        }
    }

    #[async_trait]
    impl ReferenceStore for FakeStore {
        async fn find_document(
            &self,
            collection: &str,
            id: ObjectId,
        ) -> Result<Option<Document>, DbError> {
            Ok(self
                .docs
                .iter()
                .find(|((c, i), _)| *c == collection && *i == id)
                .map(|(_, d)| d.clone()))
        }
    }

    #[tokio::test]
    async fn direct_ownership_matches_on_equality() {
        let owner = ObjectId::new();
        let id = ObjectId::new();
        let mut store = FakeStore::new();
        store.put("appointments", id, doc! { "created_by": owner });

        let verdict =
            evaluate_ownership(&store, "appointments", "created_by", None, owner, id)
                .await
                .unwrap();
        assert_eq!(verdict, GuardVerdict::Pass);

        let verdict =
            evaluate_ownership(&store, "appointments", "created_by", None, ObjectId::new(), id)
                .await
                .unwrap();
        assert_eq!(verdict, GuardVerdict::Forbidden);
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let store = FakeStore::new();
        let verdict = evaluate_ownership(
            &store,
            "appointments",
            "created_by",
            None,
            ObjectId::new(),
            ObjectId::new(),
        )
        .await
        .unwrap();
        assert_eq!(verdict, GuardVerdict::NotFound);
    }

    #[tokio::test]
    async fn hop_follows_the_reference_before_comparing() {
        let account = ObjectId::new();
        let profile_id = ObjectId::new();
        let record_id = ObjectId::new();
        let mut store = FakeStore::new();
        store.put("medical_records", record_id, doc! { "profile": profile_id });
        store.put("profiles", profile_id, doc! { "account": account });

        let hop = Some(Hop {
            collection: "profiles",
            ref_field: "profile",
        });
        let verdict =
            evaluate_ownership(&store, "medical_records", "account", hop, account, record_id)
                .await
                .unwrap();
        assert_eq!(verdict, GuardVerdict::Pass);

        let verdict = evaluate_ownership(
            &store,
            "medical_records",
            "account",
            hop,
            ObjectId::new(),
            record_id,
        )
        .await
        .unwrap();
        assert_eq!(verdict, GuardVerdict::Forbidden);
    }

    #[tokio::test]
    async fn route_id_membership() {
        let profile_id = ObjectId::new();
        let mut store = FakeStore::new();
        store.put("profiles", profile_id, doc! { "name": "Pat" });

        let verdict = evaluate_membership(
            &store,
            "profiles",
            ValueSource::RouteId,
            MissingFieldPolicy::Allow,
            &[profile_id],
            profile_id,
        )
        .await
        .unwrap();
        assert_eq!(verdict, GuardVerdict::Pass);

        let verdict = evaluate_membership(
            &store,
            "profiles",
            ValueSource::RouteId,
            MissingFieldPolicy::Allow,
            &[ObjectId::new()],
            profile_id,
        )
        .await
        .unwrap();
        assert_eq!(verdict, GuardVerdict::Forbidden);
    }

    #[tokio::test]
    async fn absent_field_follows_the_configured_policy() {
        let record_id = ObjectId::new();
        let mut store = FakeStore::new();
        // no "profile" field on the document at all
        store.put("medical_records", record_id, doc! { "folder": "a/b" });

        let allow = evaluate_membership(
            &store,
            "medical_records",
            ValueSource::DocumentField("profile"),
            MissingFieldPolicy::Allow,
            &[],
            record_id,
        )
        .await
        .unwrap();
        assert_eq!(allow, GuardVerdict::Pass);

        let deny = evaluate_membership(
            &store,
            "medical_records",
            ValueSource::DocumentField("profile"),
            MissingFieldPolicy::Deny,
            &[],
            record_id,
        )
        .await
        .unwrap();
        assert_eq!(deny, GuardVerdict::Forbidden);
    }

    #[tokio::test]
    async fn document_field_membership() {
        let profile_id = ObjectId::new();
        let record_id = ObjectId::new();
        let mut store = FakeStore::new();
        store.put("medical_records", record_id, doc! { "profile": profile_id });

        let verdict = evaluate_membership(
            &store,
            "medical_records",
            ValueSource::DocumentField("profile"),
            MissingFieldPolicy::Allow,
            &[profile_id],
            record_id,
        )
        .await
        .unwrap();
        assert_eq!(verdict, GuardVerdict::Pass);
    }
}
