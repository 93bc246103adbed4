// Library exports for the server binary, tools and tests
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use sqlx::PgPool;

use config::Config;
use db::layout::SchemaLayout;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    /// Table shapes of the connected database, resolved once at startup.
    pub layout: SchemaLayout,
}
