use std::env;

use crate::db::layout::LayoutOverride;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub jwt_expiry_seconds: u64,
    pub host: String,
    pub port: u16,
    pub app_base_url: String,
    pub school_name: String,
    pub schema_layout: LayoutOverride,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".into())
                .parse()?,
            jwt_secret: required("JWT_SECRET")?,
            jwt_expiry_seconds: env::var("JWT_EXPIRY_SECONDS")
                .unwrap_or_else(|_| "28800".into())
                .parse()?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            app_base_url: env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost".into()),
            school_name: env::var("SCHOOL_NAME")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "Établissement scolaire".into()),
            schema_layout: env::var("SCHEMA_LAYOUT")
                .unwrap_or_else(|_| "auto".into())
                .parse()?,
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("Missing required env var: {}", key))
}
