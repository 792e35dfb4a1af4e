mod auth;
mod availability;
mod catalog;
mod clock;
mod credits;
mod db;
mod error;
mod handlers;
mod models;
mod notify;
mod payments;
mod rate_limit;
mod reservations;
mod sweep;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use clock::{Clock, SystemClock};
use credits::{CreditsLedger, DbCreditsLedger};
use notify::{HttpNotifier, Notifier};
use payments::provider::{HttpPaymentProvider, PaymentProvider};
use rate_limit::{rate_limit, RateLimits};

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub clock: Arc<dyn Clock>,
    pub provider: Arc<dyn PaymentProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub credits: Arc<dyn CreditsLedger>,
    pub webhook_secret: String,
    pub identity_secret: String,
    pub admin_token: String,
    pub booking_phone: String,
    pub started_at: Instant,
}

/// Stale-hold / order sweep interval (seconds).
const SWEEP_INTERVAL_SECS: u64 = 60;
/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:trafikskola.db?mode=rwc".into());

    // ── Tracing ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    let fmt_layer = tracing_subscriber::fmt::layer();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());

    // ── Secrets and integration config ──
    let webhook_secret = std::env::var("PAYMENT_WEBHOOK_SECRET").unwrap_or_default();
    let identity_secret = std::env::var("IDENTITY_SECRET").unwrap_or_default();
    let admin_token = std::env::var("ADMIN_TOKEN").unwrap_or_default();
    let booking_phone = std::env::var("BOOKING_PHONE").unwrap_or_else(|_| "+46 8 000 00 00".into());
    let notify_url = std::env::var("NOTIFY_WEBHOOK_URL").unwrap_or_default();
    let webapp_url = std::env::var("WEBAPP_URL").unwrap_or_else(|_| "https://example.com".into());

    let payment_api_base = std::env::var("PAYMENT_API_BASE").unwrap_or_default();
    let payment_merchant_id = std::env::var("PAYMENT_MERCHANT_ID").unwrap_or_default();
    let payment_api_key = std::env::var("PAYMENT_API_KEY").unwrap_or_default();
    let payment_return_url =
        std::env::var("PAYMENT_RETURN_URL").unwrap_or_else(|_| webapp_url.clone());

    if payment_merchant_id.is_empty() {
        tracing::warn!("PAYMENT_MERCHANT_ID not set — online payments will fail");
    }
    if webhook_secret.is_empty() {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET not set — webhooks will be rejected");
    }
    if identity_secret.is_empty() {
        tracing::warn!("IDENTITY_SECRET not set — customer logins will be rejected");
    }
    if admin_token.is_empty() {
        tracing::warn!("ADMIN_TOKEN not set — admin endpoints disabled");
    }

    // ── Database ──
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    db::run_migrations(&pool).await?;

    let provider = Arc::new(HttpPaymentProvider::new(
        payment_api_base,
        payment_merchant_id,
        payment_api_key,
        payment_return_url,
    ));

    let state = Arc::new(AppState {
        db: pool.clone(),
        clock: Arc::new(SystemClock),
        provider,
        notifier: Arc::new(HttpNotifier::new(notify_url)),
        credits: Arc::new(DbCreditsLedger::new(pool)),
        webhook_secret,
        identity_secret,
        admin_token,
        booking_phone,
        started_at: Instant::now(),
    });

    // ── Background task: expire stale holds and dead orders ──
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            sweep::run(&sweep_state.db, sweep_state.clock.as_ref()).await;
        }
    });

    // ── Rate limiter + cleanup task ──
    let limits = RateLimits::new();
    let cleanup_limits = limits.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            interval.tick().await;
            cleanup_limits.cleanup();
        }
    });

    // ── CORS: whitelist WEBAPP_URL when configured, otherwise allow any ──
    let cors = if webapp_url != "https://example.com" {
        let origins: Vec<axum::http::HeaderValue> = vec![
            webapp_url.parse().expect("WEBAPP_URL must be a valid URL"),
            "http://localhost:5173".parse().unwrap(), // Vite dev server
        ];
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // ── Router (5 groups with per-group rate limits) ──

    // 1. No-limit: health checks + payment webhooks
    let no_limit_routes = Router::new()
        .route("/api/health", get(handlers::health::health))
        .route("/api/payments/webhook", post(handlers::payment::webhook));

    // 2. Public: availability reads (no auth, 60 req/min)
    let public_routes = Router::new()
        .route("/api/availability", get(handlers::client::availability))
        .layer(from_fn_with_state(limits.public.clone(), rate_limit));

    // 3. Hold creation: strictest limit (5 req/5min)
    let hold_routes = Router::new()
        .route("/api/reservations", post(handlers::client::create_hold))
        .layer(from_fn_with_state(limits.hold.clone(), rate_limit));

    // 4. Customer: reservation lifecycle + checkout (30 req/min)
    let customer_routes = Router::new()
        .route("/api/reservations/my", get(handlers::client::my_reservations))
        .route(
            "/api/reservations/{id}/confirm",
            post(handlers::client::confirm),
        )
        .route("/api/reservations/{id}", delete(handlers::client::cancel))
        .route(
            "/api/reservations/{id}/status",
            get(handlers::client::reservation_status),
        )
        .route("/api/payments/checkout", post(handlers::payment::checkout))
        .layer(from_fn_with_state(limits.customer.clone(), rate_limit));

    // 5. Admin: catalog management + oversight (120 req/min)
    let admin_routes = Router::new()
        .route("/api/admin/templates", get(handlers::admin::list_templates))
        .route(
            "/api/admin/templates",
            post(handlers::admin::create_template),
        )
        .route(
            "/api/admin/templates/{id}",
            put(handlers::admin::update_template),
        )
        .route(
            "/api/admin/templates/{id}",
            delete(handlers::admin::delete_template),
        )
        .route("/api/admin/overrides", get(handlers::admin::list_overrides))
        .route(
            "/api/admin/overrides",
            post(handlers::admin::create_override),
        )
        .route(
            "/api/admin/overrides/{id}",
            delete(handlers::admin::delete_override),
        )
        .route(
            "/api/admin/reservations",
            get(handlers::admin::list_reservations),
        )
        .route(
            "/api/admin/reservations/{id}/cancel",
            post(handlers::admin::cancel_reservation),
        )
        .route("/api/admin/sweep", post(handlers::admin::run_sweep))
        .layer(from_fn_with_state(limits.admin.clone(), rate_limit));

    let app = Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(hold_routes)
        .merge(customer_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    tracing::info!("Trafikskola booking server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
