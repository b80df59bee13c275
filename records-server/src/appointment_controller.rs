use actix_web::{web, HttpRequest, HttpResponse, Scope};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::bson::doc;
use serde::Deserialize;
use slog::info;
use std::sync::Arc;

use common::api_error::ApiError;
use common::validation::in_future;
use database::entities::{Appointment, HospitalSnapshot, COLL_APPOINTMENTS, COLL_PROFILES};
use database::provider::ReferenceStore;
use database::roles::AccessLevel;
use database::slots::generate_slots;

use crate::common_utils::{parse_id, parse_list_filter, parse_ref, principal, scoped_list_filter};
use crate::constants::APPOINTMENT_TAG;
use crate::guards::{OwnsDocument, PrincipalField, RequireLevel, ADMIN_ONLY};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CreateSlotsParams {
    pub(crate) start: DateTime<Utc>,
    pub(crate) end: DateTime<Utc>,
    /// Required for admin callers: the hospital-tier account the slots
    /// are opened for. Ignored for hospital-tier callers, who always
    /// create their own.
    pub(crate) doctor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct BookParams {
    pub(crate) profile: String,
    pub(crate) hospital: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RescheduleParams {
    pub(crate) target: String,
    pub(crate) hospital: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AppointmentListQuery {
    pub(crate) profile: Option<String>,
    pub(crate) filter: Option<String>,
}

/// 批量开放时段,每20分钟一个,起点含,终点不含。
#[utoipa::path(
    post,
    path = "/appointments/slots",
    responses(
        (status = 201, description = "Open slots created"),
        (status = 400, description = "Window invalid or doctor account not hospital-tier"),
        (status = 403, description = "Caller below hospital tier")
    ),
    tag = APPOINTMENT_TAG,
)]
async fn create_slots(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    params: web::Json<CreateSlotsParams>,
) -> Result<HttpResponse, ApiError> {
    let caller = principal(&req)?;
    let params = params.into_inner();

    in_future("start", params.start).map_err(ApiError::Validation)?;
    in_future("end", params.end).map_err(ApiError::Validation)?;
    if params.end <= params.start {
        return Err(ApiError::Validation("end must be after start".to_string()));
    }

    let owner = if caller.access_level == AccessLevel::Admin {
        let raw = params.doctor.ok_or_else(|| {
            ApiError::Validation("doctor account id is required for admin callers".to_string())
        })?;
        let id = parse_ref(&raw, "doctor account")?;
        let account = app_state
            .db
            .accounts()
            .find_one(doc! { "_id": id }, None)
            .await?
            .ok_or(ApiError::ReferenceNotFound("doctor account"))?;
        if AccessLevel::from_stored(account.level) != AccessLevel::Hospital {
            return Err(ApiError::Validation(
                "doctor account is not hospital-tier".to_string(),
            ));
        }
        id
    } else {
        caller.id
    };

    let mut slots = generate_slots(owner, params.start, params.end);
    let inserted = app_state.db.appointments().insert_many(&slots, None).await?;
    for (index, slot) in slots.iter_mut().enumerate() {
        slot.id = inserted
            .inserted_ids
            .get(&index)
            .and_then(|id| id.as_object_id());
    }

    info!(
        app_state.log,
        "{} slots created for account {}",
        slots.len(),
        owner
    );
    Ok(HttpResponse::Created().json(slots))
}

async fn list_appointments(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    query: web::Query<AppointmentListQuery>,
) -> Result<HttpResponse, ApiError> {
    let caller = principal(&req)?;
    let base = parse_list_filter(query.filter.as_deref())?;
    let filter = scoped_list_filter(&caller, query.profile.as_deref(), base)?;

    let cursor = app_state.db.appointments().find(filter, None).await?;
    let appointments: Vec<Appointment> = cursor.try_collect().await?;
    Ok(HttpResponse::Ok().json(appointments))
}

async fn get_appointment(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let caller = principal(&req)?;
    let id = parse_id(&path.into_inner())?;
    let appointment = app_state
        .db
        .appointments()
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or(ApiError::NotFound)?;

    // 开放时段对所有已认证调用者可见;已预约的只有相关方可见
    if !caller.is_privileged() {
        if let Some(profile) = appointment.profile {
            if !caller.profiles.contains(&profile) {
                return Err(ApiError::Forbidden);
            }
        }
    }
    Ok(HttpResponse::Ok().json(appointment))
}

#[utoipa::path(
    post,
    path = "/appointments/{id}/book",
    params(("id" = String, Path, description = "Appointment id")),
    responses(
        (status = 200, description = "Slot booked"),
        (status = 400, description = "Referenced profile/hospital missing, or slot not open"),
        (status = 403, description = "Caller does not own the slot"),
        (status = 404, description = "Appointment id malformed or absent")
    ),
    tag = APPOINTMENT_TAG,
)]
async fn book_appointment(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
    params: web::Json<BookParams>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path.into_inner())?;
    let params = params.into_inner();

    let profile_id = parse_ref(&params.profile, "profile")?;
    app_state
        .db
        .profiles()
        .find_one(doc! { "_id": profile_id }, None)
        .await?
        .ok_or(ApiError::ReferenceNotFound("profile"))?;

    let hospital_id = parse_ref(&params.hospital, "hospital")?;
    let hospital = app_state
        .db
        .hospitals()
        .find_one(doc! { "_id": hospital_id }, None)
        .await?
        .ok_or(ApiError::ReferenceNotFound("hospital"))?;

    let mut appointment = app_state
        .db
        .appointments()
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or(ApiError::NotFound)?;

    appointment
        .book(
            profile_id,
            HospitalSnapshot {
                id: hospital_id,
                name: hospital.name,
            },
        )
        .map_err(|e| ApiError::Conflict(e.to_string()))?;

    // 顺序写,无事务
    app_state
        .db
        .appointments()
        .replace_one(doc! { "_id": id }, &appointment, None)
        .await?;
    app_state
        .db
        .push_ref(COLL_PROFILES, profile_id, "appointments", id)
        .await?;

    info!(app_state.log, "appointment {} booked for {}", id, profile_id);
    Ok(HttpResponse::Ok().json(appointment))
}

/// Move a booking to another open slot of the same creating account. The
/// source reverts to open instead of being deleted.
#[utoipa::path(
    post,
    path = "/appointments/{id}/reschedule",
    params(("id" = String, Path, description = "Currently booked appointment id")),
    responses(
        (status = 200, description = "Booking moved to the target slot"),
        (status = 400, description = "Target missing, source not booked, or target not open"),
        (status = 403, description = "Slots belong to different creating accounts"),
        (status = 404, description = "Appointment id malformed or absent")
    ),
    tag = APPOINTMENT_TAG,
)]
async fn reschedule_appointment(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
    params: web::Json<RescheduleParams>,
) -> Result<HttpResponse, ApiError> {
    let source_id = parse_id(&path.into_inner())?;
    let params = params.into_inner();

    let mut source = app_state
        .db
        .appointments()
        .find_one(doc! { "_id": source_id }, None)
        .await?
        .ok_or(ApiError::NotFound)?;

    let target_id = parse_ref(&params.target, "target appointment")?;
    let mut target = app_state
        .db
        .appointments()
        .find_one(doc! { "_id": target_id }, None)
        .await?
        .ok_or(ApiError::ReferenceNotFound("target appointment"))?;

    // 跨创建账户改约属于越权,而不是输入形状问题
    if target.created_by != source.created_by {
        return Err(ApiError::Forbidden);
    }
    if !source.is_booked() {
        return Err(ApiError::Conflict("appointment is not booked".to_string()));
    }
    if !target.is_open() {
        return Err(ApiError::Conflict(
            "target appointment is not open".to_string(),
        ));
    }

    let hospital_id = parse_ref(&params.hospital, "hospital")?;
    let hospital = app_state
        .db
        .hospitals()
        .find_one(doc! { "_id": hospital_id }, None)
        .await?
        .ok_or(ApiError::ReferenceNotFound("hospital"))?;

    let profile_id = source
        .profile
        .ok_or_else(|| ApiError::Conflict("appointment is not booked".to_string()))?;

    target
        .book(
            profile_id,
            HospitalSnapshot {
                id: hospital_id,
                name: hospital.name,
            },
        )
        .map_err(|e| ApiError::Conflict(e.to_string()))?;
    source.release();

    // 顺序写,无事务: 先写目标,再释放源,最后原位替换档案列表中的引用
    app_state
        .db
        .appointments()
        .replace_one(doc! { "_id": target_id }, &target, None)
        .await?;
    app_state
        .db
        .appointments()
        .replace_one(doc! { "_id": source_id }, &source, None)
        .await?;
    app_state
        .db
        .replace_ref(COLL_PROFILES, profile_id, "appointments", source_id, target_id)
        .await?;

    info!(
        app_state.log,
        "appointment {} rescheduled to {}", source_id, target_id
    );
    Ok(HttpResponse::Ok().json(target))
}

/// Cancel keeps the record for history and inserts a brand-new open slot
/// with the same owner and time, restoring the freed capacity.
#[utoipa::path(
    post,
    path = "/appointments/{id}/cancel",
    params(("id" = String, Path, description = "Booked appointment id")),
    responses(
        (status = 200, description = "Appointment cancelled, replacement slot created"),
        (status = 400, description = "Appointment not booked or already cancelled"),
        (status = 403, description = "Caller does not own the slot"),
        (status = 404, description = "Appointment id malformed or absent")
    ),
    tag = APPOINTMENT_TAG,
)]
async fn cancel_appointment(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path.into_inner())?;

    let mut appointment = app_state
        .db
        .appointments()
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or(ApiError::NotFound)?;

    let replacement = appointment
        .cancel()
        .map_err(|e| ApiError::Conflict(e.to_string()))?;

    app_state
        .db
        .appointments()
        .replace_one(doc! { "_id": id }, &appointment, None)
        .await?;
    app_state
        .db
        .appointments()
        .insert_one(&replacement, None)
        .await?;
    if let Some(profile_id) = appointment.profile {
        app_state
            .db
            .pull_ref(COLL_PROFILES, profile_id, "appointments", id)
            .await?;
    }

    info!(app_state.log, "appointment {} cancelled", id);
    Ok(HttpResponse::Ok().json(appointment))
}

async fn delete_appointment(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let caller = principal(&req)?;
    caller.require(AccessLevel::Admin)?;
    let id = parse_id(&path.into_inner())?;

    let appointment = app_state
        .db
        .appointments()
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or(ApiError::NotFound)?;

    app_state
        .db
        .appointments()
        .delete_one(doc! { "_id": id }, None)
        .await?;
    if let Some(profile_id) = appointment.profile {
        app_state
            .db
            .pull_ref(COLL_PROFILES, profile_id, "appointments", id)
            .await?;
    }

    Ok(HttpResponse::NoContent().finish())
}

pub(crate) fn scope(store: Arc<dyn ReferenceStore>) -> Scope {
    let owns_slot = |store: &Arc<dyn ReferenceStore>| OwnsDocument {
        store: store.clone(),
        collection: COLL_APPOINTMENTS,
        owner_field: "created_by",
        hop: None,
        principal_field: PrincipalField::Id,
        exclude: ADMIN_ONLY,
    };

    web::scope("/appointments")
        .service(
            web::resource("/slots")
                .wrap(RequireLevel::hospital())
                .route(web::post().to(create_slots)),
        )
        .service(
            web::resource("")
                .route(web::get().to(list_appointments)),
        )
        .service(
            web::resource("/{id}/book")
                .wrap(owns_slot(&store))
                .route(web::post().to(book_appointment)),
        )
        .service(
            web::resource("/{id}/reschedule")
                .wrap(owns_slot(&store))
                .route(web::post().to(reschedule_appointment)),
        )
        .service(
            web::resource("/{id}/cancel")
                .wrap(owns_slot(&store))
                .route(web::post().to(cancel_appointment)),
        )
        .service(
            web::resource("/{id}")
                .route(web::get().to(get_appointment))
                .route(web::delete().to(delete_appointment)),
        )
}
