use actix_web::{post, web, HttpRequest, HttpResponse, Scope};
use futures_util::TryStreamExt;
use mongodb::bson::doc;
use serde::Deserialize;
use slog::info;

use common::api_error::ApiError;
use common::validation::{validate_email, validate_str, Rule};
use database::entities::Account;
use database::roles::AccessLevel;

use crate::common_utils::{parse_id, parse_ref, principal};
use crate::constants::{ACCOUNT_TAG, TOKEN_HEADER};
use crate::guards::RequireLevel;
use crate::identity_client::{IdentityClient, IdentityError};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RegisterParams {
    pub(crate) email: String,
    pub(crate) password: String,
}

impl RegisterParams {
    pub(crate) fn validate(&self) -> Result<(), String> {
        validate_email("email", &self.email)?;
        validate_str(
            "password",
            &self.password,
            &[Rule::MinLen(8), Rule::MaxLen(64)],
        )?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct LoginParams {
    pub(crate) email: String,
    pub(crate) password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct UpdateAccountParams {
    pub(crate) level: Option<AccessLevel>,
    pub(crate) hospital: Option<String>,
}

fn identity_of(app_state: &AppState) -> Result<&IdentityClient, ApiError> {
    app_state
        .identity
        .as_deref()
        .ok_or_else(|| ApiError::Upstream("identity provider is not configured".to_string()))
}

fn map_login_error(e: IdentityError) -> ApiError {
    match e {
        IdentityError::Rejected(400) | IdentityError::Rejected(401) => ApiError::Unauthenticated,
        other => ApiError::Upstream(other.to_string()),
    }
}

/// 注册新账户。密码只经过身份提供方,本服务不存储;
/// 签发的凭证通过自定义响应头返回。
#[utoipa::path(
    post,
    path = "/accounts/register",
    responses(
        (status = 201, description = "Account created; credential in the x-auth-token header"),
        (status = 400, description = "Validation failed or email already registered")
    ),
    tag = ACCOUNT_TAG,
)]
#[post("/accounts/register")]
pub(crate) async fn register(
    app_state: web::Data<AppState>,
    params: web::Json<RegisterParams>,
) -> Result<HttpResponse, ApiError> {
    let params = params.into_inner();
    params.validate().map_err(ApiError::Validation)?;
    let identity = identity_of(&app_state)?;

    // email 唯一性检查
    let existing = app_state
        .db
        .accounts()
        .find_one(doc! { "email": &params.email }, None)
        .await?;
    if existing.is_some() {
        return Err(ApiError::Conflict("Email already registered".to_string()));
    }

    let subject = identity
        .register_user(&params.email, &params.password)
        .await
        .map_err(|e| match e {
            IdentityError::Rejected(409) => {
                ApiError::Conflict("Email already registered".to_string())
            }
            other => ApiError::Upstream(other.to_string()),
        })?;

    // 匿名注册的账户一律是 user 级;提级由管理员通过更新接口完成
    let mut account = Account {
        id: None,
        email: params.email.clone(),
        subject,
        level: AccessLevel::User.as_i32(),
        hospital: None,
        profiles: Vec::new(),
    };
    let inserted = app_state.db.accounts().insert_one(&account, None).await?;
    account.id = inserted.inserted_id.as_object_id();

    let token = identity
        .login(&params.email, &params.password)
        .await
        .map_err(map_login_error)?;

    info!(app_state.log, "account registered: {}", account.email);
    Ok(HttpResponse::Created()
        .insert_header((TOKEN_HEADER, token))
        .json(account))
}

#[utoipa::path(
    post,
    path = "/accounts/login",
    responses(
        (status = 200, description = "Credential issued in the x-auth-token header"),
        (status = 401, description = "Provider rejected the credentials")
    ),
    tag = ACCOUNT_TAG,
)]
#[post("/accounts/login")]
pub(crate) async fn login(
    app_state: web::Data<AppState>,
    params: web::Json<LoginParams>,
) -> Result<HttpResponse, ApiError> {
    let params = params.into_inner();
    validate_email("email", &params.email).map_err(ApiError::Validation)?;
    let identity = identity_of(&app_state)?;

    let token = identity
        .login(&params.email, &params.password)
        .await
        .map_err(map_login_error)?;

    let account = app_state
        .db
        .accounts()
        .find_one(doc! { "email": &params.email }, None)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(HttpResponse::Ok()
        .insert_header((TOKEN_HEADER, token))
        .json(account))
}

async fn list_accounts(app_state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let cursor = app_state.db.accounts().find(None, None).await?;
    let accounts: Vec<Account> = cursor.try_collect().await?;
    Ok(HttpResponse::Ok().json(accounts))
}

async fn get_account(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let caller = principal(&req)?;
    let id = parse_id(&path.into_inner())?;
    if caller.id != id {
        caller.require(AccessLevel::Admin)?;
    }
    let account = app_state
        .db
        .accounts()
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(account))
}

/// Admin-only: promote/demote an account and bind its hospital. The
/// hospital reference is required iff the new level is hospital-tier.
async fn update_account(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<String>,
    params: web::Json<UpdateAccountParams>,
) -> Result<HttpResponse, ApiError> {
    let caller = principal(&req)?;
    caller.require(AccessLevel::Admin)?;
    let id = parse_id(&path.into_inner())?;
    let params = params.into_inner();

    let mut account = app_state
        .db
        .accounts()
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or(ApiError::NotFound)?;

    let new_level = params
        .level
        .unwrap_or_else(|| AccessLevel::from_stored(account.level));

    let new_hospital = match params.hospital {
        Some(raw) => {
            let hid = parse_ref(&raw, "hospital")?;
            app_state
                .db
                .hospitals()
                .find_one(doc! { "_id": hid }, None)
                .await?
                .ok_or(ApiError::ReferenceNotFound("hospital"))?;
            Some(hid)
        }
        None => account.hospital,
    };

    if new_level == AccessLevel::Hospital && new_hospital.is_none() {
        return Err(ApiError::Validation(
            "hospital is required for hospital-tier accounts".to_string(),
        ));
    }

    account.level = new_level.as_i32();
    account.hospital = if new_level == AccessLevel::Hospital {
        new_hospital
    } else {
        None
    };

    app_state
        .db
        .accounts()
        .replace_one(doc! { "_id": id }, &account, None)
        .await?;
    info!(app_state.log, "account updated: {}", account.email);
    Ok(HttpResponse::Ok().json(account))
}

async fn delete_account(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let caller = principal(&req)?;
    caller.require(AccessLevel::Admin)?;
    let id = parse_id(&path.into_inner())?;

    let result = app_state
        .db
        .accounts()
        .delete_one(doc! { "_id": id }, None)
        .await?;
    if result.deleted_count == 0 {
        return Err(ApiError::NotFound);
    }
    Ok(HttpResponse::NoContent().finish())
}

pub(crate) fn scope() -> Scope {
    web::scope("/accounts")
        .service(
            web::resource("")
                .wrap(RequireLevel::admin())
                .route(web::get().to(list_accounts)),
        )
        .service(
            web::resource("/{id}")
                .route(web::get().to(get_account))
                .route(web::put().to(update_account))
                .route(web::delete().to(delete_account)),
        )
}
