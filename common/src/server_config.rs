use config::{Config, ConfigError, Environment, File};
use dotenv::dotenv;
use serde::Deserialize;
use std::env;

// 定义配置结构体
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,    //文档数据库连接字符串
    pub dbname: String, //数据库名称
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// External identity provider settings. When the section is absent the
/// server starts without authentication (development only).
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub issuer_url: String,
    pub audience: String,
    pub jwks_url: String,
    /// Password-grant token endpoint used by login.
    pub token_url: String,
    /// Provider endpoint that creates a user and returns its subject id.
    pub register_url: String,
    /// Group claim that maps to the admin access level.
    pub admin_group: String,
    /// Group claim that maps to the hospital/doctor access level.
    pub hospital_group: String,
}

/// External object-storage credential vendor. Only scoped short-lived
/// credentials are requested; no file bytes flow through this server.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub vendor_url: String,
    pub bucket: String,
    pub credential_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origin: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub identity: Option<IdentityConfig>,
    pub storage: Option<StorageConfig>,
    pub cors: Option<CorsConfig>,
}

static APP_ENV: &str = "APP_ENV";
static APP_PREFIX: &str = "RECORDS";

pub fn load_config() -> Result<AppConfig, ConfigError> {
    // 1. 加载 .env 文件
    dotenv().ok();

    // 2. 从 .env 获取当前环境 (默认 dev)
    let env = env::var(APP_ENV).unwrap_or_else(|_| "dev".into());

    // 3. 动态加载配置文件 (如 application.dev.json)
    let config_path = format!("application.{}.json", env);

    // 4. 使用 config 库加载配置
    let settings = Config::builder()
        .add_source(File::with_name(&config_path).required(true))
        // 可选：允许环境变量覆盖配置 (如 RECORDS_DATABASE_URL=...)
        .add_source(Environment::with_prefix(APP_PREFIX).prefix_separator("_"))
        .build()?;

    // 5. 解析配置到结构体
    let app_config: AppConfig = settings.try_deserialize()?;
    Ok(app_config)
}
