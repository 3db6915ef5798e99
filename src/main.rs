use axum::{middleware::from_fn_with_state, Router};
use proctoring_backend::{
    config::{init_config, LogFormat},
    database::{
        pool::{create_pool, run_migrations},
        PgStore,
    },
    middleware::auth::require_monitor_role,
    routes,
    services::{
        grading_service::{GradingScorer, HttpScorer, Scorer},
        storage_service::LocalObjectStore,
    },
    AppState, StateSettings,
};
use reqwest::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

const TOPIC_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = init_config()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info,sqlx=warn"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    let pool = create_pool(config).await?;
    run_migrations(&pool).await?;

    let scorer: Arc<dyn Scorer> = match &config.scoring_service_url {
        Some(url) => {
            let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
            info!("Scoring submissions through {}", url);
            Arc::new(HttpScorer::new(client, url.clone()))
        }
        None => Arc::new(GradingScorer),
    };

    tokio::fs::create_dir_all(&config.uploads_dir).await?;
    let app_state = AppState::new(
        Arc::new(PgStore::new(pool)),
        scorer,
        Arc::new(LocalObjectStore::new(&config.uploads_dir)),
        StateSettings::from(config),
    );

    {
        let assignments = app_state.assignments.clone();
        let interval = Duration::from_secs(config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            loop {
                match assignments.expire_overdue(chrono::Utc::now()).await {
                    Ok(0) => {}
                    Ok(n) => info!("Auto-submitted {} expired exam sessions", n),
                    Err(e) => tracing::error!(error = ?e, "Expiry sweeper error"),
                }
                tokio::time::sleep(interval).await;
            }
        });
    }

    {
        let signals = app_state.signals.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(TOPIC_PRUNE_INTERVAL).await;
                let pruned = signals.prune();
                if pruned > 0 {
                    tracing::debug!("Pruned {} idle signal topics", pruned);
                }
            }
        });
    }

    info!("Serving uploads from: {}", config.uploads_dir);
    let uploads = Router::new()
        .nest_service("/api/monitor/uploads", ServeDir::new(&config.uploads_dir))
        .layer(from_fn_with_state(app_state.auth.clone(), require_monitor_role));
    let app = routes::build_router(app_state)
        .merge(uploads)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
