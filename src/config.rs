use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub web: WebConfig,
    // These fields are populated from the .env file.
    pub database_path: String,
    pub media_path: String,
    pub allowed_origins: String,
    pub log_level: String,
    pub jwt_secret: String,
    pub public_base_url: String,
    pub use_secure_cookies: bool,
    pub api_rate_limit: u32,
    pub auth_rate_limit: u32,
}

impl Config {
    pub fn from_env(env_path: &Path) -> Result<Self, config::ConfigError> {
        dotenvy::from_path(env_path).map_err(|e| {
            config::ConfigError::Message(format!(
                "FATAL: Failed to load .env file from '{}'. Error: {}",
                env_path.display(),
                e
            ))
        })?;

        let database_path = env::var("DATABASE_PATH").map_err(|_| {
            config::ConfigError::Message(
                "FATAL: Environment variable 'DATABASE_PATH' is not set in your .env file."
                    .to_string(),
            )
        })?;

        let media_path = env::var("MEDIA_PATH").map_err(|_| {
            config::ConfigError::Message(
                "FATAL: Environment variable 'MEDIA_PATH' is not set in your .env file."
                    .to_string(),
            )
        })?;

        let jwt_secret = env::var("JWT_SECRET").map_err(|_| {
            config::ConfigError::Message(
                "FATAL: Environment variable 'JWT_SECRET' is not set in your .env file."
                    .to_string(),
            )
        })?;

        // Signed bearer tokens are only as strong as the signing key.
        if jwt_secret.len() < 32 {
            return Err(config::ConfigError::Message(
                "FATAL: 'JWT_SECRET' must be at least 32 characters long.".to_string(),
            ));
        }

        let allowed_origins = env::var("ALLOWED_ORIGINS").unwrap_or_else(|_| "".to_string());
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let public_base_url =
            env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| "http://localhost:5000".to_string());

        let use_secure_cookies = env::var("USE_SECURE_COOKIES")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        // Sliding-window ceilings: requests per 15 minutes for the API at
        // large, requests per hour for the authentication endpoints.
        let api_rate_limit = env::var("API_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(500);
        let auth_rate_limit = env::var("AUTH_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(50);

        if Path::new(&database_path).is_relative() {
            return Err(config::ConfigError::Message(format!(
                "FATAL: The 'DATABASE_PATH' in your .env file is a relative path ('{}'). It MUST be an absolute path.",
                database_path
            )));
        }

        if Path::new(&media_path).is_relative() {
            return Err(config::ConfigError::Message(format!(
                "FATAL: The 'MEDIA_PATH' in your .env file is a relative path ('{}'). It MUST be an absolute path.",
                media_path
            )));
        }

        let builder = config::Config::builder()
            .add_source(config::File::new(
                "config/default.toml",
                config::FileFormat::Toml,
            ))
            .set_override("database_path", database_path)?
            .set_override("media_path", media_path)?
            .set_override("jwt_secret", jwt_secret)?
            .set_override("allowed_origins", allowed_origins)?
            .set_override("log_level", log_level)?
            .set_override("public_base_url", public_base_url)?
            .set_override("use_secure_cookies", use_secure_cookies)?
            .set_override("api_rate_limit", api_rate_limit as i64)?
            .set_override("auth_rate_limit", auth_rate_limit as i64)?
            .build()?;

        builder.try_deserialize()
    }

    /// Returns the full path to the blog database file.
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.database_path).join("blog.db")
    }
}
