//! Entry point: load config, wire dependencies, and run the server.

use axum::http::{header, HeaderName, HeaderValue, Method};
use std::sync::Arc;
use storefront_live::auth::JwtSecret;
use storefront_live::config::Config;
use storefront_live::db::{self, PgStore};
use storefront_live::handlers::ws::origin_allowed;
use storefront_live::repositories::{ChatStore, MemoryStore, StatsStore};
use storefront_live::services::{
    spawn_sweeper, AuthService, ChatHub, DeliveryService, PresenceService, StatsService,
};
use storefront_live::{create_app, AppState};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let chat_store: Arc<dyn ChatStore>;
    let stats_store: Arc<dyn StatsStore>;
    let db_pool = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url).await?;
            let store = Arc::new(PgStore::new(pool.clone()));
            chat_store = store.clone();
            stats_store = store;
            Some(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; messages and stats live in memory only");
            let store = Arc::new(MemoryStore::new());
            chat_store = store.clone();
            stats_store = store;
            None
        }
    };

    let presence = PresenceService::new(config.heartbeat_timeout);
    let auth = AuthService::new(
        JwtSecret::new(config.jwt_secret.clone()),
        config.require_register_token,
    );
    let hub = ChatHub::new(
        presence,
        DeliveryService::new(chat_store),
        StatsService::new(stats_store),
        auth,
    );
    let sweeper = spawn_sweeper(hub.clone(), config.sweep_interval);

    let state = AppState {
        hub,
        app_key: config.app_key.clone(),
        allowed_origins: config.allowed_origins.clone(),
        stats_history_days: config.stats_history_days,
        admin_user_id: config.admin_user_id.clone(),
        db: db_pool,
    };

    let origins = config.allowed_origins.clone();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts| {
                origin
                    .to_str()
                    .map(|o| origin_allowed(&origins, &o.to_lowercase()))
                    .unwrap_or(false)
            },
        ))
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-app-key"),
        ])
        .allow_credentials(true);

    let app = create_app(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors),
    );

    tracing::info!(addr = %config.server_addr, "listening");
    let listener = tokio::net::TcpListener::bind(config.server_addr).await?;
    axum::serve(listener, app).await?;
    sweeper.abort();
    Ok(())
}
