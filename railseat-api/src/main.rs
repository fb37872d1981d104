use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use railseat_api::{app, worker, AppState};
use railseat_seating::StrategyRegistry;
use railseat_store::{
    Config, DbClient, EventProducer, PgOrderGateway, PgSeatRepository, RedisClient,
    RedisLockCoordinator,
};
use railseat_ticket::{TicketDeps, TicketService};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "railseat_api=debug,railseat_ticket=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Railseat API on port {}", config.server.port);

    // Postgres
    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    // Redis
    let redis = RedisClient::new(&config.redis.url, &config.redis.key_prefix)
        .await
        .context("Failed to create Redis client")?;
    redis.ping().await.context("Redis is unreachable")?;

    // Kafka
    let producer = EventProducer::new(&config.kafka.brokers, &config.kafka.auto_cancel_topic)
        .context("Failed to create Kafka producer")?;

    let rules = &config.ticketing;
    let seats = Arc::new(PgSeatRepository::new(db.pool.clone()));
    let registry = StrategyRegistry::from_layouts(seats.clone()).context("Invalid seat strategy table")?;
    let deps = TicketDeps {
        seats: seats.clone(),
        prices: seats,
        cache: Arc::new(redis.clone()),
        locks: Arc::new(RedisLockCoordinator::new(redis, rules.lock_lease())),
        orders: Arc::new(PgOrderGateway::new(db.pool.clone())),
        notifier: Arc::new(producer),
    };
    let tickets = Arc::new(TicketService::new(deps, registry, rules));

    let worker_tickets = tickets.clone();
    let kafka = config.kafka.clone();
    tokio::spawn(async move {
        if let Err(e) = worker::start_auto_cancel_worker(
            kafka.brokers,
            kafka.group_id,
            kafka.auto_cancel_topic,
            worker_tickets,
        )
        .await
        {
            tracing::error!("Auto-cancel worker stopped: {}", e);
        }
    });

    let app = app(AppState { tickets });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
