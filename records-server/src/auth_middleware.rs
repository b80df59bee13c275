// auth_middleware.rs
use actix_web::body::{EitherBody, MessageBody};
use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use mongodb::bson::doc;
use reqwest::Client;
use slog::{error, info, Logger};
use std::future::{ready, Ready};
use std::rc::Rc;

use common::redis_key::RedisHelper;
use common::server_config::AppConfig;
use database::provider::MongoProvider;
use database::roles::AccessLevel;

use crate::auth_information::{access_level_from_roles, Claims, Principal};
use crate::AppState;

pub struct AuthMiddleware {
    pub(crate) logger: Logger,
    pub(crate) redis: RedisHelper,
    pub(crate) config: AppConfig,
    pub(crate) db: MongoProvider,
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService {
            service: Rc::new(service),
            redis_helper: self.redis.clone(),
            gconfig: self.config.clone(),
            log: self.logger.clone(),
            db: self.db.clone(),
        }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: Rc<S>,
    redis_helper: RedisHelper,
    gconfig: AppConfig,
    log: Logger,
    db: MongoProvider,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
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
        let log = self.log.clone();
        let gconfig = self.gconfig.clone();

        // 如果没有配置身份提供方，则直接跳过认证
        if gconfig.identity.is_none() {
            info!(log, "identity provider is not configured, skip authentication");
            return Box::pin(async move {
                let res = service.call(req).await.map_err(actix_web::Error::from)?;
                Ok(res.map_into_left_body())
            });
        }
        let redis_helper = self.redis_helper.clone();
        let db = self.db.clone();
        let cfg = gconfig.identity.unwrap();
        let issuer_url = cfg.issuer_url.clone();
        let audience = cfg.audience.clone();

        Box::pin(async move {
            // 在 async 块内部处理所有可能的错误
            let jwks_text = match redis_helper.get_jwks_document().await {
                Ok(content) => content,
                Err(e) => {
                    error!(log, "Failed to get JWKS content from Redis: {:?}", e);
                    let response = HttpResponse::Unauthorized()
                        .body("Authentication failed: JWKS not available");
                    let res =
                        req.into_response(response.map_into_boxed_body().map_into_right_body());
                    return Ok(res);
                }
            };

            let auth_header = req.headers().get("Authorization");
            if auth_header.is_none() {
                let response = HttpResponse::Unauthorized()
                    .body("Authentication failed: no Authorization header");
                let res = req.into_response(response.map_into_boxed_body().map_into_right_body());
                return Ok(res);
            }

            let auth_str = auth_header.unwrap().to_str();
            if auth_str.is_err() {
                let response = HttpResponse::Unauthorized()
                    .body("Authentication failed: Authorization header is not a valid string");
                let res = req.into_response(response.map_into_boxed_body().map_into_right_body());
                return Ok(res);
            }

            let auth_str = auth_str.unwrap();
            if !auth_str.starts_with("Bearer ") {
                let response = HttpResponse::Unauthorized()
                    .body("Authentication failed: Authorization header is not a Bearer token");
                let res = req.into_response(response.map_into_boxed_body().map_into_right_body());
                return Ok(res);
            }

            let token = &auth_str[7..];

            let jwks: serde_json::Value = match serde_json::from_str(&jwks_text) {
                Ok(jwks) => jwks,
                Err(_) => {
                    error!(log, "Invalid JWKS format");
                    let response = HttpResponse::Unauthorized().body("Invalid JWKS format");
                    let res =
                        req.into_response(response.map_into_boxed_body().map_into_right_body());
                    return Ok(res);
                }
            };

            let n = match jwks["keys"][0]["n"].as_str() {
                Some(n) => n,
                None => {
                    error!(log, "Invalid RSA key format, keys[0][n] is missing");
                    let response = HttpResponse::Unauthorized().body("Invalid RSA key format");
                    let res =
                        req.into_response(response.map_into_boxed_body().map_into_right_body());
                    return Ok(res);
                }
            };

            let e = match jwks["keys"][0]["e"].as_str() {
                Some(e) => e,
                None => {
                    error!(log, "Invalid RSA key format, keys[0][e] is missing");
                    let response = HttpResponse::Unauthorized().body("Invalid RSA key format");
                    let res =
                        req.into_response(response.map_into_boxed_body().map_into_right_body());
                    return Ok(res);
                }
            };

            let decoding_key = match DecodingKey::from_rsa_components(n, e) {
                Ok(key) => key,
                Err(_) => {
                    error!(log, "Invalid RSA key, DecodingKey::from_rsa_components failed");
                    let response = HttpResponse::Unauthorized().body("Invalid RSA key");
                    let res =
                        req.into_response(response.map_into_boxed_body().map_into_right_body());
                    return Ok(res);
                }
            };
            let expected_alg = jwks["keys"][0]["alg"].as_str().unwrap_or("RS256");
            let algorithm = match expected_alg {
                "RS256" => Algorithm::RS256,
                "RS384" => Algorithm::RS384,
                "RS512" => Algorithm::RS512,
                _ => Algorithm::RS256,
            };
            let mut validation = Validation::new(algorithm);
            validation.set_issuer(&[issuer_url]);
            validation.set_audience(&[audience]);

            let token_data = match decode::<Claims>(token, &decoding_key, &validation) {
                Ok(token_data) => token_data,
                Err(_) => {
                    // Token无效（可能包括过期、签名错误等）
                    let response = HttpResponse::Unauthorized().body("Invalid token");
                    let res =
                        req.into_response(response.map_into_boxed_body().map_into_right_body());
                    return Ok(res);
                }
            };

            let claims = token_data.claims;
            let subject = match claims.sub.as_deref() {
                Some(sub) => sub,
                None => {
                    let response = HttpResponse::Unauthorized().body("Token has no subject");
                    let res =
                        req.into_response(response.map_into_boxed_body().map_into_right_body());
                    return Ok(res);
                }
            };

            // 根据 subject 解析内部账户
            let account = match db
                .accounts()
                .find_one(doc! { "subject": subject }, None)
                .await
            {
                Ok(Some(account)) => account,
                Ok(None) => {
                    let response = HttpResponse::NotFound().body("Account not found");
                    let res =
                        req.into_response(response.map_into_boxed_body().map_into_right_body());
                    return Ok(res);
                }
                Err(e) => {
                    error!(log, "Account lookup failed: {}", e);
                    let response =
                        HttpResponse::InternalServerError().body("Internal server error");
                    let res =
                        req.into_response(response.map_into_boxed_body().map_into_right_body());
                    return Ok(res);
                }
            };

            let account_id = match account.id {
                Some(id) => id,
                None => {
                    error!(log, "Account document has no id: {}", account.email);
                    let response =
                        HttpResponse::InternalServerError().body("Internal server error");
                    let res =
                        req.into_response(response.map_into_boxed_body().map_into_right_body());
                    return Ok(res);
                }
            };

            // 组到访问级别的映射：管理员组优先于医院组
            let roles = claims
                .realm_access
                .as_ref()
                .and_then(|ra| ra.roles.clone())
                .unwrap_or_default();
            let access_level = access_level_from_roles(&roles, &cfg);
            if access_level >= AccessLevel::Hospital {
                info!(log, "privileged caller authenticated: {}", account.email);
            }

            let principal = Principal {
                id: account_id,
                access_level,
                hospital: account.hospital,
                profiles: account.profiles,
            };
            req.extensions_mut().insert(principal);

            let res = service.call(req).await.map_err(actix_web::Error::from)?;
            Ok(res.map_into_left_body())
        })
    }
}

use tokio::time::{interval, Duration};

/// Refresh the provider's JWKS document into Redis every 10 minutes; the
/// first tick fires immediately at startup.
pub(crate) async fn update_jwks_task(app_state: AppState) {
    let mut interval = interval(Duration::from_secs(600));

    let jwks_url = match app_state.config.identity {
        Some(ref identity) => identity.jwks_url.clone(),
        None => return,
    };
    loop {
        interval.tick().await;

        match fetch_and_store_jwks(&app_state.redis_helper, &app_state.log, jwks_url.clone()).await
        {
            Ok(_) => {
                info!(app_state.log, "JWKS refresh succeeded");
            }
            Err(e) => {
                error!(app_state.log, "JWKS refresh failed: {:?}", e);
            }
        }
    }
}

async fn fetch_and_store_jwks(
    redis_helper: &RedisHelper,
    log: &Logger,
    jwks_url: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::builder()
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .build()?;

    let response = client
        .get(&jwks_url)
        .header("User-Agent", "records-server/1.0")
        .send()
        .await?;

    // 验证响应状态码
    if !response.status().is_success() {
        return Err(format!("JWKS fetch failed: {}", response.status()).into());
    }

    let txt = response.text().await?;

    // 验证JSON格式与JWKS结构
    let jwks: serde_json::Value =
        serde_json::from_str(&txt).map_err(|e| format!("invalid JWKS JSON: {}", e))?;
    if !jwks.is_object() || !jwks["keys"].is_array() {
        return Err("invalid JWKS structure".into());
    }

    info!(log, "fetched JWKS from {}", &jwks_url);

    // 写入 Redis,过期时间略长于刷新间隔
    redis_helper.set_jwks_document(txt, 900).await?;

    Ok(())
}
