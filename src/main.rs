use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ecole_api::{
    config::Config,
    db::{self, layout},
    routes,
    services::metrics,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::schema::provision_schema(&pool).await?;
    info!("Database connected and schema provisioned");

    let layout = layout::resolve(&pool, config.schema_layout).await?;
    info!("Schema layout: {layout}");

    metrics::start(pool.clone());

    let state = AppState {
        db: pool,
        config: config.clone(),
        layout,
    };
    let app = routes::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("{} API listening on {}", config.school_name, addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
