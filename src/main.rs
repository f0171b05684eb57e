//! Cart Engine - cart reservation and checkout service

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use cart_engine::api::{router, AppState};
use cart_engine::collaborators::http::{HttpDeliveryQuoter, HttpPaymentGateway};
use cart_engine::collaborators::nats::NatsPublisher;
use cart_engine::collaborators::postgres::{PgCatalog, PgLoyalty, PgOrders, PgPromoCodes};
use cart_engine::collaborators::{Collaborators, EventPublisher, NoopPublisher};
use cart_engine::config::EngineConfig;
use cart_engine::engine::Engine;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOYALTY_DECAY_EVERY: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = EngineConfig::from_env()?;

    let db = PgPoolOptions::new().max_connections(10).connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;
    let events: Arc<dyn EventPublisher> = match &config.nats_url {
        Some(url) => match async_nats::connect(url).await {
            Ok(client) => Arc::new(NatsPublisher::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, domain events will not be published");
                Arc::new(NoopPublisher)
            }
        },
        None => Arc::new(NoopPublisher),
    };

    let loyalty = Arc::new(PgLoyalty::new(db.clone(), config.loyalty.clone()));
    let collaborators = Collaborators {
        catalog: Arc::new(PgCatalog::new(db.clone())),
        promos: Arc::new(PgPromoCodes::new(db.clone())),
        delivery: Arc::new(HttpDeliveryQuoter::new(config.delivery_api_url.clone(), config.engine.delivery_timeout)?),
        payments: Arc::new(HttpPaymentGateway::new(config.payment.clone())?),
        loyalty: loyalty.clone(),
        orders: Arc::new(PgOrders::new(db.clone())),
        events,
    };

    let shutdown = CancellationToken::new();
    let (engine, expiry_queue) = Engine::new(&config.engine, collaborators);
    let mut tasks = engine.spawn_background(expiry_queue, config.reconcile_interval, shutdown.clone());
    tasks.push(tokio::spawn(decay_loyalty(loyalty, shutdown.clone())));

    let app = router(AppState { engine });
    tracing::info!("🚀 Cart Engine listening on 0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = signal.cancelled() => {}
            }
        })
        .await?;

    shutdown.cancel();
    for task in tasks {
        task.await.ok();
    }
    tracing::info!("Cart Engine stopped");
    Ok(())
}

/// Steps inactive customers down one loyalty level once per month.
async fn decay_loyalty(loyalty: Arc<PgLoyalty>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(LOYALTY_DECAY_EVERY);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = loyalty.monthly_decay(chrono::Utc::now().date_naive()).await {
                    tracing::error!(error = %e, "loyalty decay failed");
                }
            }
        }
    }
}
