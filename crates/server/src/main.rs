//! Lounge server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use lounge_api::{AppState, app};
use lounge_common::{ClockService, Config, SystemClock};
use lounge_core::{
    BroadcastDispatcher, DatabaseRoomStore, ExpirationScheduler, JwtSessionVerifier, PollLimits,
    PollService, RoomRegistry, RoomStoreService,
};
use lounge_queue::{RoomMaintenance, SchedulerConfig, run_scheduler};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lounge=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::var("LOUNGE_CONFIG") {
        Ok(path) => Config::from_file(&path),
        Err(_) => Config::load(),
    }
    .context("Failed to load configuration")?;
    init_tracing(config.log.json);

    info!("Starting lounge server...");

    let db = lounge_db::init(&config).await?;
    info!("Connected to database");

    info!("Running database migrations...");
    lounge_db::migrate(&db).await?;
    info!("Migrations completed");

    let store: RoomStoreService = Arc::new(DatabaseRoomStore::from_connection(Arc::new(db)));
    let clock: ClockService = Arc::new(SystemClock);
    let dispatcher = BroadcastDispatcher::new(config.rooms.broadcast_capacity);

    let room_registry = RoomRegistry::new(store.clone(), dispatcher.clone(), clock.clone())
        .with_room_quota(config.rooms.max_active_rooms_per_host);

    let (scheduler, fired) = ExpirationScheduler::new();
    let poll_service = PollService::new(
        store,
        room_registry.clone(),
        dispatcher,
        scheduler,
        clock,
    )
    .with_limits(PollLimits {
        max_polls_per_window: config.polls.max_polls_per_window,
        window: chrono::Duration::seconds(config.polls.rate_window_secs),
    });

    // No connection survives a restart.
    let reset = room_registry.reset_presence().await?;
    info!(count = reset, "Reset participant presence");

    let _expiration_worker = poll_service.spawn_expiration_worker(fired);
    poll_service.recover_timers().await?;

    let maintenance = Arc::new(RoomMaintenance::new(
        poll_service.clone(),
        room_registry.clone(),
    ));
    let scheduled = run_scheduler(&SchedulerConfig::from_app_config(&config), maintenance);
    info!(jobs = scheduled.len(), "Maintenance scheduler started");

    let state = AppState {
        room_registry,
        poll_service,
        session_verifier: Arc::new(JwtSessionVerifier::new(
            &config.auth.jwt_secret,
            config.auth.issuer.as_deref(),
        )),
    };

    let app = app(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let ip = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid server host {}", config.server.host))?;
    let addr = SocketAddr::new(ip, config.server.port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for handle in scheduled {
        handle.abort();
    }

    info!("Server shutdown complete");
    Ok(())
}
