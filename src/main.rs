use tokio::net::TcpListener;
use tracing::{error, info};
use triplist::config::AppConfig;
use triplist::db::init_pool;
use triplist::error::AppError;
use triplist::routes::create_router;
use triplist::services::{geocode::GeocodeService, suggest::SuggestionService};
use triplist::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_logging();

    let config = AppConfig::from_env()?;
    let db = init_pool(&config.database_url).await?;

    if let Err(err) = sqlx::migrate!("./migrations").run(&db).await {
        error!("migration failed: {err:?}");
        return Err(AppError::Other(err.into()));
    }

    let geocoder = GeocodeService::new(
        config.geocoding_base_url.clone(),
        config.geocoding_api_key.clone(),
    );
    let suggestions = SuggestionService::new(
        config.ai_base_url.clone(),
        config.ai_api_key.clone(),
        !config.is_production(),
    );

    let state = AppState::new(config.clone(), db.clone(), geocoder, suggestions);

    let app = create_router(state.clone());

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,triplist=debug".into());

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
