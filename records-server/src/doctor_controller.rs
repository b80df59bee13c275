use actix_web::{web, HttpResponse, Scope};
use futures_util::TryStreamExt;
use mongodb::bson::doc;
use serde::Deserialize;
use slog::info;

use common::api_error::ApiError;
use common::validation::{validate_str, year_since, Rule};
use database::entities::{Doctor, COLL_HOSPITALS, COLL_SPECIALIZATIONS};
use database::provider::DbError;

use crate::common_utils::{parse_id, parse_ref};
use crate::guards::RequireLevel;
use crate::AppState;

const EARLIEST_PRACTICE_YEAR: i32 = 1950;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CreateDoctorParams {
    pub(crate) name: String,
    pub(crate) qualifications: String,
    pub(crate) practicing_since: i32,
    pub(crate) hospital: String,
    pub(crate) specialization: String,
}

impl CreateDoctorParams {
    fn validate(&self) -> Result<(), String> {
        validate_str("name", &self.name, &[Rule::MinLen(1), Rule::MaxLen(100)])?;
        validate_str(
            "qualifications",
            &self.qualifications,
            &[Rule::MinLen(1), Rule::MaxLen(500)],
        )?;
        year_since(
            "practicing_since",
            self.practicing_since,
            EARLIEST_PRACTICE_YEAR,
        )?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct UpdateDoctorParams {
    pub(crate) name: Option<String>,
    pub(crate) qualifications: Option<String>,
    pub(crate) practicing_since: Option<i32>,
    pub(crate) hospital: Option<String>,
    pub(crate) specialization: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DoctorListQuery {
    pub(crate) hospital: Option<String>,
}

async fn list_doctors(
    app_state: web::Data<AppState>,
    query: web::Query<DoctorListQuery>,
) -> Result<HttpResponse, ApiError> {
    let filter = match &query.hospital {
        Some(raw) => doc! { "hospital": parse_ref(raw, "hospital")? },
        None => doc! {},
    };
    let cursor = app_state.db.doctors().find(filter, None).await?;
    let doctors: Vec<Doctor> = cursor.try_collect().await?;
    Ok(HttpResponse::Ok().json(doctors))
}

async fn get_doctor(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path.into_inner())?;
    let doctor = app_state
        .db
        .doctors()
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(doctor))
}

async fn create_doctor(
    app_state: web::Data<AppState>,
    params: web::Json<CreateDoctorParams>,
) -> Result<HttpResponse, ApiError> {
    let params = params.into_inner();
    params.validate().map_err(ApiError::Validation)?;

    let hospital_id = parse_ref(&params.hospital, "hospital")?;
    app_state
        .db
        .hospitals()
        .find_one(doc! { "_id": hospital_id }, None)
        .await?
        .ok_or(ApiError::ReferenceNotFound("hospital"))?;

    let specialization_id = parse_ref(&params.specialization, "specialization")?;
    if !app_state
        .db
        .exists(COLL_SPECIALIZATIONS, specialization_id)
        .await?
    {
        return Err(ApiError::ReferenceNotFound("specialization"));
    }

    let mut doctor = Doctor {
        id: None,
        name: params.name,
        qualifications: params.qualifications,
        practicing_since: params.practicing_since,
        hospital: hospital_id,
        specialization: specialization_id,
    };
    let inserted = app_state.db.doctors().insert_one(&doctor, None).await?;
    let doctor_id = inserted.inserted_id.as_object_id().ok_or_else(|| {
        ApiError::Database(DbError::ExtractionFailed("inserted doctor id".to_string()))
    })?;
    doctor.id = Some(doctor_id);

    app_state
        .db
        .push_ref(COLL_HOSPITALS, hospital_id, "doctors", doctor_id)
        .await?;

    info!(app_state.log, "doctor created: {}", doctor_id);
    Ok(HttpResponse::Created().json(doctor))
}

/// Moving a doctor removes it from the old hospital's list and adds it to
/// the new one; the two list writes follow the doctor update in sequence.
async fn update_doctor(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
    params: web::Json<UpdateDoctorParams>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path.into_inner())?;
    let params = params.into_inner();

    let mut doctor = app_state
        .db
        .doctors()
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or(ApiError::NotFound)?;
    let old_hospital = doctor.hospital;

    if let Some(name) = params.name {
        validate_str("name", &name, &[Rule::MinLen(1), Rule::MaxLen(100)])
            .map_err(ApiError::Validation)?;
        doctor.name = name;
    }
    if let Some(qualifications) = params.qualifications {
        validate_str(
            "qualifications",
            &qualifications,
            &[Rule::MinLen(1), Rule::MaxLen(500)],
        )
        .map_err(ApiError::Validation)?;
        doctor.qualifications = qualifications;
    }
    if let Some(year) = params.practicing_since {
        year_since("practicing_since", year, EARLIEST_PRACTICE_YEAR)
            .map_err(ApiError::Validation)?;
        doctor.practicing_since = year;
    }
    if let Some(raw) = params.specialization {
        let specialization_id = parse_ref(&raw, "specialization")?;
        if !app_state
            .db
            .exists(COLL_SPECIALIZATIONS, specialization_id)
            .await?
        {
            return Err(ApiError::ReferenceNotFound("specialization"));
        }
        doctor.specialization = specialization_id;
    }
    if let Some(raw) = params.hospital {
        let hospital_id = parse_ref(&raw, "hospital")?;
        app_state
            .db
            .hospitals()
            .find_one(doc! { "_id": hospital_id }, None)
            .await?
            .ok_or(ApiError::ReferenceNotFound("hospital"))?;
        doctor.hospital = hospital_id;
    }

    app_state
        .db
        .doctors()
        .replace_one(doc! { "_id": id }, &doctor, None)
        .await?;

    if doctor.hospital != old_hospital {
        app_state
            .db
            .pull_ref(COLL_HOSPITALS, old_hospital, "doctors", id)
            .await?;
        app_state
            .db
            .push_ref(COLL_HOSPITALS, doctor.hospital, "doctors", id)
            .await?;
        info!(
            app_state.log,
            "doctor {} moved from hospital {} to {}", id, old_hospital, doctor.hospital
        );
    }

    Ok(HttpResponse::Ok().json(doctor))
}

async fn delete_doctor(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path.into_inner())?;
    let doctor = app_state
        .db
        .doctors()
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or(ApiError::NotFound)?;

    app_state
        .db
        .doctors()
        .delete_one(doc! { "_id": id }, None)
        .await?;
    app_state
        .db
        .pull_ref(COLL_HOSPITALS, doctor.hospital, "doctors", id)
        .await?;

    Ok(HttpResponse::NoContent().finish())
}

pub(crate) fn scope() -> Scope {
    web::scope("/doctors")
        .service(
            web::resource("")
                .wrap(RequireLevel::doctor().writes_only())
                .route(web::get().to(list_doctors))
                .route(web::post().to(create_doctor)),
        )
        .service(
            web::resource("/{id}")
                .wrap(RequireLevel::doctor().writes_only())
                .route(web::get().to(get_doctor))
                .route(web::put().to(update_doctor))
                .route(web::delete().to(delete_doctor)),
        )
}
