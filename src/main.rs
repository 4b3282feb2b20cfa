use axum::{
    routing::{get, post},
    Json, Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

mod auth;
mod config;
mod creator_service;
mod db;
mod engagement;
mod error;
mod events;
mod feed;
mod feed_handler;
mod interest_service;
mod models;
mod pools;
mod post_metrics;
mod posts_store;
mod profile_store;
mod redis_client;
mod scheduled_jobs;
mod scoring;
mod session_cookie;
mod session_lifecycle;
mod social;

use config::Config;
use creator_service::CreatorService;
use events::{EngagementStatsConsumer, EventProducer, ScoreAggregator};
use feed::FeedAssembler;
use interest_service::InterestService;
use post_metrics::PostMetricsEngine;
use posts_store::PostsStore;
use profile_store::ProfileStore;
use redis_client::FastStore;
use scheduled_jobs::ScheduledJobs;
use session_lifecycle::SessionLifecycle;

pub struct AppState {
    pool: PgPool,
    config: Config,
    profile_store: ProfileStore,
    event_producer: EventProducer,
    interest_service: InterestService,
    creator_service: CreatorService,
    post_metrics: PostMetricsEngine,
    session_lifecycle: SessionLifecycle,
    feed_assembler: FeedAssembler,
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "feedcore",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Drains `score_buffer` hourly and feeds every accumulated delta into the
/// post metrics engine — the single-writer path for post metrics; the
/// engagement controller's inline updates are best-effort between these
/// flushes.
async fn run_hourly_aggregator_flush(
    aggregator: Arc<ScoreAggregator>,
    metrics: PostMetricsEngine,
    posts: PostsStore,
    interval_secs: u64,
) {
    let min_age_ms = (interval_secs as i64) * 1000;
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        match aggregator.flush(&posts, chrono::Utc::now(), min_age_ms).await {
            Ok(deltas) => {
                for (post_id, delta) in deltas {
                    if let Err(e) = metrics.apply_engagement(post_id, delta).await {
                        tracing::warn!(post_id = %post_id, error = %e, "hourly aggregator: failed to apply buffered delta");
                    }
                }
            }
            Err(e) => tracing::error!(error = %e, "hourly aggregator flush failed"),
        }
    }
}

/// Runs a consumer's `process_batch` in a tight loop, with a short idle
/// sleep after an empty batch so the loop doesn't spin hot against an empty
/// stream between ticks.
async fn run_consumer_loop<F, Fut>(name: &'static str, mut poll: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = error::AppResult<usize>>,
{
    loop {
        match poll().await {
            Ok(0) => tokio::time::sleep(std::time::Duration::from_millis(500)).await,
            Ok(_) => {}
            Err(e) => {
                tracing::error!(consumer = name, error = %e, "consumer batch failed");
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            }
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let config = Config::from_env();

    let pool = db::init_pool(&config.database_url).await;
    tracing::info!("connected to document store");

    let fast_store = FastStore::new(&config.redis_url).await.expect("failed to connect to fast store");
    tracing::info!("connected to fast store");

    let profile_store = ProfileStore::new(pool.clone());
    let posts_store = PostsStore::new(pool.clone());
    let event_producer = EventProducer::new(&config.redis_url).await.expect("failed to start event producer");
    let interest_service = InterestService::new(profile_store.clone(), config.clone());
    let creator_service = CreatorService::new(config.clone());
    let post_metrics = PostMetricsEngine::new(posts_store.clone(), profile_store.clone(), config.clone());
    let session_lifecycle = SessionLifecycle::new(fast_store.clone(), profile_store.clone(), config.clone());
    let feed_assembler = FeedAssembler::new(posts_store.clone(), profile_store.clone(), config.clone());
    let scheduled_jobs = Arc::new(ScheduledJobs::new(posts_store.clone(), profile_store.clone(), post_metrics.clone(), config.clone()));

    let engagement_stats_consumer = Arc::new(
        EngagementStatsConsumer::new(&config.redis_url, profile_store.clone(), posts_store.clone(), "engagement-stats-1")
            .await
            .expect("failed to start engagement stats consumer"),
    );
    let score_aggregator = Arc::new(
        ScoreAggregator::new(&config.redis_url, fast_store.clone(), "score-aggregator-1")
            .await
            .expect("failed to start score aggregator"),
    );
    score_aggregator.hydrate().await.expect("failed to hydrate score buffer from fast store");

    let state = Arc::new(AppState {
        pool,
        config: config.clone(),
        profile_store,
        event_producer,
        interest_service,
        creator_service,
        post_metrics: post_metrics.clone(),
        session_lifecycle: session_lifecycle.clone(),
        feed_assembler,
    });

    tokio::spawn(session_lifecycle.run_expiry_worker());
    tokio::spawn(scheduled_jobs.clone().run_rising_decay_worker());
    tokio::spawn(scheduled_jobs.clone().run_evergreen_worker());
    tokio::spawn(run_hourly_aggregator_flush(
        score_aggregator.clone(),
        post_metrics,
        posts_store.clone(),
        config.hourly_aggregator_interval_secs,
    ));
    tokio::spawn({
        let consumer = engagement_stats_consumer.clone();
        async move { run_consumer_loop("engagement-stats", || consumer.process_batch()).await }
    });
    tokio::spawn({
        let aggregator = score_aggregator.clone();
        async move { run_consumer_loop("score-aggregator", || aggregator.process_batch()).await }
    });
    tracing::info!("background workers started");

    let app = Router::new()
        .route("/api/signup", post(auth::signup))
        .route("/api/login", post(auth::login))
        .route("/api/logout", post(auth::logout))
        .route("/engagement/positive", post(engagement::positive))
        .route("/engagement/negative", post(engagement::negative))
        .route("/feed", get(feed_handler::get_feed))
        .route("/user/:id/follow", post(social::toggle_follow))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await.expect("failed to bind listener");
    tracing::info!(addr = %listener.local_addr().unwrap(), "feedcore listening");

    axum::serve(listener, app).await.expect("server error");
}
