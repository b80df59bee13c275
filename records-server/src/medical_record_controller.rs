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
    FileMeta, MedicalRecord, COLL_FIELDS, COLL_MEDICAL_RECORDS, COLL_PROFILES, COLL_RECORD_TYPES,
    COLL_SPECIALIZATIONS,
};
use database::provider::{DbError, ReferenceStore};
use database::roles::AccessLevel;

use crate::common_utils::{parse_id, parse_list_filter, parse_ref, principal, scoped_list_filter};
use crate::guards::{MemberOfList, MissingFieldPolicy, RequireLevel, ValueSource, PRIVILEGED};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileMetaParams {
    pub(crate) name: String,
    pub(crate) size: u64,
    pub(crate) content_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CreateRecordParams {
    pub(crate) profile: String,
    pub(crate) field: String,
    pub(crate) record_type: String,
    pub(crate) specialization: Option<String>,
    pub(crate) description: String,
    pub(crate) files: Option<Vec<FileMetaParams>>,
    pub(crate) folder: String,
    pub(crate) date_on_document: DateTime<Utc>,
}

impl CreateRecordParams {
    fn validate(&self) -> Result<(), String> {
        validate_str(
            "description",
            &self.description,
            &[Rule::MinLen(1), Rule::MaxLen(10_000)],
        )?;
        validate_str("folder", &self.folder, &[Rule::MinLen(1), Rule::MaxLen(512)])?;
        not_in_future("date_on_document", self.date_on_document)?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RecordListQuery {
    pub(crate) profile: Option<String>,
    pub(crate) filter: Option<String>,
}

async fn create_record(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    params: web::Json<CreateRecordParams>,
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

    // 目录快照在写入时捕获
    let field_id = parse_ref(&params.field, "field")?;
    let field = app_state
        .db
        .catalog(COLL_FIELDS)
        .find_one(doc! { "_id": field_id }, None)
        .await?
        .ok_or(ApiError::ReferenceNotFound("field"))?;

    let record_type_id = parse_ref(&params.record_type, "record type")?;
    let record_type = app_state
        .db
        .catalog(COLL_RECORD_TYPES)
        .find_one(doc! { "_id": record_type_id }, None)
        .await?
        .ok_or(ApiError::ReferenceNotFound("record type"))?;

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

    // folder 是存储位置键,必须全局唯一
    let duplicate = app_state
        .db
        .medical_records()
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

    let mut record = MedicalRecord {
        id: None,
        profile: profile_id,
        created_by: caller.id,
        description: params.description,
        files,
        field: field.snapshot(),
        record_type: record_type.snapshot(),
        specialization,
        folder: params.folder,
        date_on_document: params.date_on_document,
        created_at: Utc::now(),
    };
    let inserted = app_state
        .db
        .medical_records()
        .insert_one(&record, None)
        .await?;
    let record_id = inserted.inserted_id.as_object_id().ok_or_else(|| {
        ApiError::Database(DbError::ExtractionFailed("inserted record id".to_string()))
    })?;
    record.id = Some(record_id);

    app_state
        .db
        .push_ref(COLL_PROFILES, profile_id, "medical_records", record_id)
        .await?;

    info!(app_state.log, "medical record created: {}", record_id);
    Ok(HttpResponse::Created().json(record))
}

async fn list_records(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    query: web::Query<RecordListQuery>,
) -> Result<HttpResponse, ApiError> {
    let caller = principal(&req)?;
    let base = parse_list_filter(query.filter.as_deref())?;
    let filter = scoped_list_filter(&caller, query.profile.as_deref(), base)?;

    let cursor = app_state.db.medical_records().find(filter, None).await?;
    let records: Vec<MedicalRecord> = cursor.try_collect().await?;
    Ok(HttpResponse::Ok().json(records))
}

async fn get_record(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path.into_inner())?;
    let record = app_state
        .db
        .medical_records()
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(record))
}

async fn delete_record(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let caller = principal(&req)?;
    caller.require(AccessLevel::Hospital)?;
    let id = parse_id(&path.into_inner())?;

    let record = app_state
        .db
        .medical_records()
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or(ApiError::NotFound)?;

    app_state
        .db
        .medical_records()
        .delete_one(doc! { "_id": id }, None)
        .await?;
    app_state
        .db
        .pull_ref(COLL_PROFILES, record.profile, "medical_records", id)
        .await?;

    info!(app_state.log, "medical record deleted: {}", id);
    Ok(HttpResponse::NoContent().finish())
}

pub(crate) fn scope(store: Arc<dyn ReferenceStore>) -> Scope {
    web::scope("/medical-records")
        .service(
            web::resource("")
                .wrap(RequireLevel::doctor().writes_only())
                .route(web::get().to(list_records))
                .route(web::post().to(create_record)),
        )
        .service(
            web::resource("/{id}")
                .wrap(MemberOfList {
                    store,
                    collection: COLL_MEDICAL_RECORDS,
                    source: ValueSource::DocumentField("profile"),
                    exclude: PRIVILEGED,
                    missing: MissingFieldPolicy::Allow,
                })
                .route(web::get().to(get_record))
                .route(web::delete().to(delete_record)),
        )
}
