use actix_web::{web, HttpRequest, HttpResponse, Scope};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::bson::doc;
use serde::Deserialize;
use slog::info;
use std::sync::Arc;

use common::api_error::ApiError;
use common::validation::{not_in_future, validate_str, Rule};
use database::entities::{
    FileMeta, MedicationEntry, Prescription, COLL_MEDICATIONS, COLL_PRESCRIPTIONS, COLL_PROFILES,
    COLL_SPECIALIZATIONS,
};
use database::provider::{DbError, ReferenceStore};
use database::roles::AccessLevel;

use crate::common_utils::{parse_id, parse_list_filter, parse_ref, principal, scoped_list_filter};
use crate::guards::{MemberOfList, MissingFieldPolicy, RequireLevel, ValueSource, PRIVILEGED};
use crate::medical_record_controller::FileMetaParams;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct MedicationEntryParams {
    pub(crate) medication: String,
    pub(crate) dosage: String,
    pub(crate) interval: String,
    pub(crate) duration: String,
    pub(crate) instructions: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CreatePrescriptionParams {
    pub(crate) profile: String,
    pub(crate) specialization: Option<String>,
    pub(crate) description: String,
    pub(crate) medications: Vec<MedicationEntryParams>,
    pub(crate) files: Option<Vec<FileMetaParams>>,
    pub(crate) folder: String,
    pub(crate) date_on_document: DateTime<Utc>,
}

impl CreatePrescriptionParams {
    fn validate(&self) -> Result<(), String> {
        validate_str(
            "description",
            &self.description,
            &[Rule::MinLen(1), Rule::MaxLen(10_000)],
        )?;
        validate_str("folder", &self.folder, &[Rule::MinLen(1), Rule::MaxLen(512)])?;
        not_in_future("date_on_document", self.date_on_document)?;
        if self.medications.is_empty() {
            return Err("medications must not be empty".to_string());
        }
        for entry in &self.medications {
            validate_str("dosage", &entry.dosage, &[Rule::MinLen(1), Rule::MaxLen(100)])?;
            validate_str(
                "interval",
                &entry.interval,
                &[Rule::MinLen(1), Rule::MaxLen(100)],
            )?;
            validate_str(
                "duration",
                &entry.duration,
                &[Rule::MinLen(1), Rule::MaxLen(100)],
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PrescriptionListQuery {
    pub(crate) profile: Option<String>,
    pub(crate) filter: Option<String>,
}

async fn create_prescription(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    params: web::Json<CreatePrescriptionParams>,
) -> Result<HttpResponse, ApiError> {
    let caller = principal(&req)?;
    let params = params.into_inner();
    params.validate().map_err(ApiError::Validation)?;

    let profile_id = parse_ref(&params.profile, "profile")?;
    app_state
        .db
        .profiles()
        .find_one(doc! { "_id": profile_id }, None)
        .await?
        .ok_or(ApiError::ReferenceNotFound("profile"))?;

    let specialization = match &params.specialization {
        Some(raw) => {
            let sid = parse_ref(raw, "specialization")?;
            let entry = app_state
                .db
                .catalog(COLL_SPECIALIZATIONS)
                .find_one(doc! { "_id": sid }, None)
                .await?
                .ok_or(ApiError::ReferenceNotFound("specialization"))?;
            Some(entry.snapshot())
        }
        None => None,
    };

    // 每个药品条目必须引用目录中的已有药品
    let mut medications = Vec::with_capacity(params.medications.len());
    for entry in params.medications {
        let medication_id = parse_ref(&entry.medication, "medication")?;
        if !app_state.db.exists(COLL_MEDICATIONS, medication_id).await? {
            return Err(ApiError::ReferenceNotFound("medication"));
        }
        medications.push(MedicationEntry {
            medication: medication_id,
            dosage: entry.dosage,
            interval: entry.interval,
            duration: entry.duration,
            instructions: entry.instructions,
        });
    }

    let duplicate = app_state
        .db
        .prescriptions()
        .find_one(doc! { "folder": &params.folder }, None)
        .await?;
    if duplicate.is_some() {
        return Err(ApiError::Conflict("Folder path already in use".to_string()));
    }

    let files = params
        .files
        .unwrap_or_default()
        .into_iter()
        .map(|f| FileMeta {
            name: f.name,
            size: f.size,
            content_type: f.content_type,
        })
        .collect();

    let mut prescription = Prescription {
        id: None,
        profile: profile_id,
        created_by: caller.id,
        description: params.description,
        files,
        specialization,
        medications,
        folder: params.folder,
        date_on_document: params.date_on_document,
        created_at: Utc::now(),
    };
    let inserted = app_state
        .db
        .prescriptions()
        .insert_one(&prescription, None)
        .await?;
    let prescription_id = inserted.inserted_id.as_object_id().ok_or_else(|| {
        ApiError::Database(DbError::ExtractionFailed(
            "inserted prescription id".to_string(),
        ))
    })?;
    prescription.id = Some(prescription_id);

    app_state
        .db
        .push_ref(COLL_PROFILES, profile_id, "prescriptions", prescription_id)
        .await?;

    info!(app_state.log, "prescription created: {}", prescription_id);
    Ok(HttpResponse::Created().json(prescription))
}

async fn list_prescriptions(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    query: web::Query<PrescriptionListQuery>,
) -> Result<HttpResponse, ApiError> {
    let caller = principal(&req)?;
    let base = parse_list_filter(query.filter.as_deref())?;
    let filter = scoped_list_filter(&caller, query.profile.as_deref(), base)?;

    let cursor = app_state.db.prescriptions().find(filter, None).await?;
    let prescriptions: Vec<Prescription> = cursor.try_collect().await?;
    Ok(HttpResponse::Ok().json(prescriptions))
}

async fn get_prescription(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path.into_inner())?;
    let prescription = app_state
        .db
        .prescriptions()
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(prescription))
}

async fn delete_prescription(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let caller = principal(&req)?;
    caller.require(AccessLevel::Hospital)?;
    let id = parse_id(&path.into_inner())?;

    let prescription = app_state
        .db
        .prescriptions()
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or(ApiError::NotFound)?;

    app_state
        .db
        .prescriptions()
        .delete_one(doc! { "_id": id }, None)
        .await?;
    app_state
        .db
        .pull_ref(COLL_PROFILES, prescription.profile, "prescriptions", id)
        .await?;

    info!(app_state.log, "prescription deleted: {}", id);
    Ok(HttpResponse::NoContent().finish())
}

pub(crate) fn scope(store: Arc<dyn ReferenceStore>) -> Scope {
    web::scope("/prescriptions")
        .service(
            web::resource("")
                .wrap(RequireLevel::doctor().writes_only())
                .route(web::get().to(list_prescriptions))
                .route(web::post().to(create_prescription)),
        )
        .service(
            web::resource("/{id}")
                .wrap(MemberOfList {
                    store,
                    collection: COLL_PRESCRIPTIONS,
                    source: ValueSource::DocumentField("profile"),
                    exclude: PRIVILEGED,
                    missing: MissingFieldPolicy::Allow,
                })
                .route(web::get().to(get_prescription))
                .route(web::delete().to(delete_prescription)),
        )
}
