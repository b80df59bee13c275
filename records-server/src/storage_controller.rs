use actix_web::{web, HttpRequest, HttpResponse, Scope};
use mongodb::bson::doc;
use serde::Deserialize;
use slog::info;

use common::api_error::ApiError;

use crate::common_utils::{parse_ref, principal};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct CredentialQuery {
    pub(crate) profile: String,
    pub(crate) folder: String,
}

/// Vend short-lived storage credentials scoped to one record folder.
/// Bytes never pass through this server; the caller talks to the object
/// store directly with what it gets here.
async fn issue_credentials(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    query: web::Query<CredentialQuery>,
) -> Result<HttpResponse, ApiError> {
    let caller = principal(&req)?;

    let profile_id = parse_ref(&query.profile, "profile")?;
    if !caller.is_privileged() && !caller.profiles.contains(&profile_id) {
        return Err(ApiError::Forbidden);
    }
    app_state
        .db
        .profiles()
        .find_one(doc! { "_id": profile_id }, None)
        .await?
        .ok_or(ApiError::ReferenceNotFound("profile"))?;

    let vendor = app_state
        .storage
        .as_deref()
        .ok_or_else(|| ApiError::Upstream("storage vendor is not configured".to_string()))?;

    let credentials = vendor
        .issue_credentials(&query.folder)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;

    info!(
        app_state.log,
        "storage credentials issued for folder {}", query.folder
    );
    Ok(HttpResponse::Ok().json(credentials))
}

pub(crate) fn scope() -> Scope {
    web::scope("/storage")
        .service(web::resource("/credentials").route(web::get().to(issue_credentials)))
}
