use std::{process, sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use wallwise::{
    application::{error::AppError, repos::Repositories},
    cache::{CacheConfig, CacheState, SharedClock, SystemClock},
    config,
    infra::{error::InfraError, http, telemetry},
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let clock: SharedClock = Arc::new(SystemClock);
    let cache_config = CacheConfig::from(&settings.cache);
    let store = cache_config.build_store(clock.clone())?;
    let cache = CacheState::new(cache_config, store, clock.clone());
    let repos = Repositories::new(clock);

    let sweep_handle = spawn_expiry_sweep(cache.clone());
    let result = serve_http(&settings, &repos, &cache).await;

    sweep_handle.abort();
    let _ = sweep_handle.await;

    result
}

fn spawn_expiry_sweep(cache: CacheState) -> JoinHandle<()> {
    let period = cache.config().sweep_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            cache.sweep_expired().await;
        }
    })
}

async fn serve_http(
    settings: &config::Settings,
    repos: &Repositories,
    cache: &CacheState,
) -> Result<(), AppError> {
    let router = http::build_router(repos, cache);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        addr = %settings.server.addr,
        backend = cache.store().backend(),
        "Wallwise listening"
    );

    let grace = settings.server.graceful_shutdown;
    let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            shutdown_signal().await;
            let _ = drain_tx.send(());
        },
    );
    let server = tokio::spawn(async move { server.await });

    tokio::select! {
        joined = server => joined
            .map_err(|err| AppError::from(InfraError::server(err.to_string())))?
            .map_err(|err| AppError::from(InfraError::from(err)))?,
        () = drain_deadline(drain_rx, grace) => {
            warn!(grace_seconds = grace.as_secs(), "Graceful shutdown timed out; exiting");
        }
    }

    info!("Wallwise stopped");
    Ok(())
}

/// Resolves once shutdown has begun and the grace period has run out.
async fn drain_deadline(started: tokio::sync::oneshot::Receiver<()>, grace: Duration) {
    if started.await.is_err() {
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(grace).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received; draining connections");
}
