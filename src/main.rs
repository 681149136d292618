use {
    paysub_sync::{
        AppState,
        adapters::signature::SignatureVerifier,
        config::Config,
        infra::postgres::PgStore,
        router,
        services::maintenance::{run_expiry_sweep, run_reaper},
    },
    sqlx::postgres::PgPoolOptions,
    std::{sync::Arc, time::Duration},
    tokio::{signal, sync::watch},
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("invalid configuration");

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    let store = PgStore::new(pool, config.lock_timeout);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = tokio::spawn(run_reaper(
        store.clone(),
        config.reaper_interval,
        config.stale_event_after,
        shutdown_rx.clone(),
    ));
    let sweep = tokio::spawn(run_expiry_sweep(
        store.clone(),
        config.reaper_interval,
        shutdown_rx,
    ));

    let state = AppState {
        store,
        verifier: Arc::new(SignatureVerifier::new(
            &config.webhook_secret,
            config.signature_tolerance_secs,
        )),
        max_attempts: config.max_event_attempts,
    };
    let app = router(state, config.request_timeout);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("failed to bind");
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(reaper, sweep);
    tracing::info!("shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
