use actix_web::{web, HttpResponse, Scope};
use futures_util::TryStreamExt;
use mongodb::bson::doc;
use serde::Deserialize;
use slog::info;

use common::api_error::ApiError;
use common::validation::{validate_str, Rule};
use database::entities::{Hospital, COLL_HOSPITALS};

use crate::common_utils::parse_id;
use crate::guards::RequireLevel;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct HospitalParams {
    pub(crate) name: String,
}

impl HospitalParams {
    fn validate(&self) -> Result<(), String> {
        validate_str("name", &self.name, &[Rule::MinLen(2), Rule::MaxLen(120)])
    }
}

async fn list_hospitals(app_state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let cursor = app_state.db.hospitals().find(None, None).await?;
    let hospitals: Vec<Hospital> = cursor.try_collect().await?;
    Ok(HttpResponse::Ok().json(hospitals))
}

async fn create_hospital(
    app_state: web::Data<AppState>,
    params: web::Json<HospitalParams>,
) -> Result<HttpResponse, ApiError> {
    let params = params.into_inner();
    params.validate().map_err(ApiError::Validation)?;

    if app_state.db.name_taken(COLL_HOSPITALS, &params.name).await? {
        return Err(ApiError::Conflict("Hospital name already exists".to_string()));
    }

    let mut hospital = Hospital {
        id: None,
        name: params.name,
        doctors: Vec::new(),
    };
    let inserted = app_state.db.hospitals().insert_one(&hospital, None).await?;
    hospital.id = inserted.inserted_id.as_object_id();

    info!(app_state.log, "hospital created: {}", hospital.name);
    Ok(HttpResponse::Created().json(hospital))
}

async fn get_hospital(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path.into_inner())?;
    let hospital = app_state
        .db
        .hospitals()
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(hospital))
}

/// Renames only touch the live document; hospital snapshots embedded in
/// past appointments keep the name they were booked under.
async fn update_hospital(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
    params: web::Json<HospitalParams>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path.into_inner())?;
    let params = params.into_inner();
    params.validate().map_err(ApiError::Validation)?;

    let mut hospital = app_state
        .db
        .hospitals()
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or(ApiError::NotFound)?;

    let duplicate = app_state
        .db
        .hospitals()
        .find_one(doc! { "name": &params.name, "_id": { "$ne": id } }, None)
        .await?;
    if duplicate.is_some() {
        return Err(ApiError::Conflict("Hospital name already exists".to_string()));
    }

    hospital.name = params.name;
    app_state
        .db
        .hospitals()
        .replace_one(doc! { "_id": id }, &hospital, None)
        .await?;
    Ok(HttpResponse::Ok().json(hospital))
}

async fn delete_hospital(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path.into_inner())?;
    let result = app_state
        .db
        .hospitals()
        .delete_one(doc! { "_id": id }, None)
        .await?;
    if result.deleted_count == 0 {
        return Err(ApiError::NotFound);
    }
    Ok(HttpResponse::NoContent().finish())
}

pub(crate) fn scope() -> Scope {
    web::scope("/hospitals")
        .service(
            web::resource("")
                .wrap(RequireLevel::admin().writes_only())
                .route(web::get().to(list_hospitals))
                .route(web::post().to(create_hospital)),
        )
        .service(
            web::resource("/{id}")
                .wrap(RequireLevel::admin().writes_only())
                .route(web::get().to(get_hospital))
                .route(web::put().to(update_hospital))
                .route(web::delete().to(delete_hospital)),
        )
}
