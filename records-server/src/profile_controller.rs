use actix_web::{web, HttpRequest, HttpResponse, Scope};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::bson::doc;
use serde::Deserialize;
use slog::info;
use std::sync::Arc;

use common::api_error::ApiError;
use common::validation::{not_in_future, validate_phone, validate_str, Rule};
use database::entities::{Gender, Profile, COLL_ACCOUNTS, COLL_PROFILES};
use database::provider::{DbError, ReferenceStore};

use crate::common_utils::{parse_id, parse_ref, principal};
use crate::guards::{MemberOfList, MissingFieldPolicy, ValueSource, PRIVILEGED};
use crate::AppState;

const GENDERS: [&str; 3] = ["male", "female", "other"];

fn parse_gender(raw: &str) -> Result<Gender, ApiError> {
    match raw {
        "male" => Ok(Gender::Male),
        "female" => Ok(Gender::Female),
        "other" => Ok(Gender::Other),
        _ => Err(ApiError::Validation(format!(
            "gender must be one of: {}",
            GENDERS.join(", ")
        ))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CreateProfileParams {
    pub(crate) name: String,
    pub(crate) gender: String,
    pub(crate) date_of_birth: DateTime<Utc>,
    pub(crate) phone: Option<String>,
    /// Privileged callers may create a profile under any account; plain
    /// users only under their own.
    pub(crate) account: Option<String>,
}

impl CreateProfileParams {
    fn validate(&self) -> Result<(), String> {
        validate_str("name", &self.name, &[Rule::MinLen(1), Rule::MaxLen(100)])?;
        validate_str("gender", &self.gender, &[Rule::OneOf(&GENDERS)])?;
        not_in_future("date_of_birth", self.date_of_birth)?;
        if let Some(phone) = &self.phone {
            validate_phone("phone", phone)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct UpdateProfileParams {
    pub(crate) name: Option<String>,
    pub(crate) gender: Option<String>,
    pub(crate) date_of_birth: Option<DateTime<Utc>>,
    pub(crate) phone: Option<String>,
}

impl UpdateProfileParams {
    fn validate(&self) -> Result<(), String> {
        if let Some(name) = &self.name {
            validate_str("name", name, &[Rule::MinLen(1), Rule::MaxLen(100)])?;
        }
        if let Some(gender) = &self.gender {
            validate_str("gender", gender, &[Rule::OneOf(&GENDERS)])?;
        }
        if let Some(dob) = self.date_of_birth {
            not_in_future("date_of_birth", dob)?;
        }
        if let Some(phone) = &self.phone {
            validate_phone("phone", phone)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProfileListQuery {
    pub(crate) account: Option<String>,
}

async fn create_profile(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    params: web::Json<CreateProfileParams>,
) -> Result<HttpResponse, ApiError> {
    let caller = principal(&req)?;
    let params = params.into_inner();
    params.validate().map_err(ApiError::Validation)?;

    let target_account = match &params.account {
        Some(raw) => {
            let id = parse_ref(raw, "account")?;
            if !caller.is_privileged() && id != caller.id {
                return Err(ApiError::Forbidden);
            }
            app_state
                .db
                .accounts()
                .find_one(doc! { "_id": id }, None)
                .await?
                .ok_or(ApiError::ReferenceNotFound("account"))?;
            id
        }
        None => caller.id,
    };

    let mut profile = Profile {
        id: None,
        name: params.name,
        gender: parse_gender(&params.gender)?,
        date_of_birth: params.date_of_birth,
        phone: params.phone,
        account: target_account,
        appointments: Vec::new(),
        medical_records: Vec::new(),
        prescriptions: Vec::new(),
    };
    let inserted = app_state.db.profiles().insert_one(&profile, None).await?;
    let profile_id = inserted.inserted_id.as_object_id().ok_or_else(|| {
        ApiError::Database(DbError::ExtractionFailed("inserted profile id".to_string()))
    })?;
    profile.id = Some(profile_id);

    // 主写之后维护账户侧的引用列表 (两步,无事务)
    app_state
        .db
        .push_ref(COLL_ACCOUNTS, target_account, "profiles", profile_id)
        .await?;

    info!(app_state.log, "profile created: {}", profile_id);
    Ok(HttpResponse::Created().json(profile))
}

async fn list_profiles(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    query: web::Query<ProfileListQuery>,
) -> Result<HttpResponse, ApiError> {
    let caller = principal(&req)?;

    let filter = if caller.is_privileged() {
        match &query.account {
            Some(raw) => doc! { "account": parse_ref(raw, "account")? },
            None => doc! {},
        }
    } else {
        // 非特权调用者只能看到自己的档案
        doc! { "account": caller.id }
    };

    let cursor = app_state.db.profiles().find(filter, None).await?;
    let profiles: Vec<Profile> = cursor.try_collect().await?;
    Ok(HttpResponse::Ok().json(profiles))
}

async fn get_profile(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path.into_inner())?;
    let profile = app_state
        .db
        .profiles()
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(profile))
}

async fn update_profile(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
    params: web::Json<UpdateProfileParams>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path.into_inner())?;
    let params = params.into_inner();
    params.validate().map_err(ApiError::Validation)?;

    let mut profile = app_state
        .db
        .profiles()
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or(ApiError::NotFound)?;

    if let Some(name) = params.name {
        profile.name = name;
    }
    if let Some(gender) = params.gender {
        profile.gender = parse_gender(&gender)?;
    }
    if let Some(dob) = params.date_of_birth {
        profile.date_of_birth = dob;
    }
    if let Some(phone) = params.phone {
        profile.phone = Some(phone);
    }

    app_state
        .db
        .profiles()
        .replace_one(doc! { "_id": id }, &profile, None)
        .await?;
    Ok(HttpResponse::Ok().json(profile))
}

/// Deleting a profile also detaches it from the owning account's list.
async fn delete_profile(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path.into_inner())?;
    let profile = app_state
        .db
        .profiles()
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or(ApiError::NotFound)?;

    app_state
        .db
        .profiles()
        .delete_one(doc! { "_id": id }, None)
        .await?;
    app_state
        .db
        .pull_ref(COLL_ACCOUNTS, profile.account, "profiles", id)
        .await?;

    info!(app_state.log, "profile deleted: {}", id);
    Ok(HttpResponse::NoContent().finish())
}

pub(crate) fn scope(store: Arc<dyn ReferenceStore>) -> Scope {
    web::scope("/profiles")
        .service(
            web::resource("")
                .route(web::get().to(list_profiles))
                .route(web::post().to(create_profile)),
        )
        .service(
            web::resource("/{id}")
                .wrap(MemberOfList {
                    store,
                    collection: COLL_PROFILES,
                    source: ValueSource::RouteId,
                    exclude: PRIVILEGED,
                    missing: MissingFieldPolicy::Allow,
                })
                .route(web::get().to(get_profile))
                .route(web::put().to(update_profile))
                .route(web::delete().to(delete_profile)),
        )
}
