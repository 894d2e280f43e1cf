//! tokenwright server binary.
//!
//! Loads configuration and seed data, wires the grant dispatcher to its stores
//! and serves the OAuth endpoints until Ctrl+C or SIGTERM.

use anyhow::Result;
use std::{env, sync::Arc};
use tokenwright::{
    config::{Config, SeedDocument, load_seed},
    http::{AppState, build_router},
    oauth::{
        AuthServer, CleanupSettings, DPoPSettings, HttpWechatSessionProvider, ServerSettings,
        run_cleanup_loop,
    },
    storage::{MemoryOAuthStorage, OAuthStorage, create_replay_store, parse_storage_backend},
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tokenwright=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().pretty())
        .init();

    let version = tokenwright::config::version()?;

    env::args().for_each(|arg| {
        if arg == "--version" {
            println!("{version}");
            std::process::exit(0);
        }
    });

    tracing::info!(?version, "Starting tokenwright");

    let config = Config::new()?;

    // Build HTTP client with certificate bundles
    let mut client_builder = reqwest::Client::builder();
    for ca_certificate in config.certificate_bundles.as_ref() {
        tracing::info!("Loading CA certificate: {:?}", ca_certificate);
        let cert = std::fs::read(ca_certificate)?;
        let cert = reqwest::Certificate::from_pem(&cert)?;
        client_builder = client_builder.add_root_certificate(cert);
    }

    client_builder = client_builder
        .user_agent(config.user_agent.clone())
        .timeout(*config.http_client_timeout.as_ref());
    let http_client = client_builder.build()?;

    let seed = match &config.seed_path {
        Some(path) => {
            tracing::info!(path, "Loading seed document");
            load_seed(path)?
        }
        None => {
            tracing::warn!("SEED_PATH is not set, starting with empty stores");
            SeedDocument::default()
        }
    };

    let storage: Arc<dyn OAuthStorage> = Arc::new(MemoryOAuthStorage::from_seed(seed.storage)?);

    let storage_backend =
        parse_storage_backend(&config.storage_backend, config.redis_url.as_deref())?;
    let replay_store = create_replay_store(storage_backend).await?;

    let wechat = Arc::new(HttpWechatSessionProvider::new(
        http_client,
        &config.wechat_api_base,
        seed.wechat_providers,
    ));

    // Setup graceful shutdown
    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    let auth_server = Arc::new(AuthServer::new(
        storage.clone(),
        replay_store,
        wechat,
        ServerSettings {
            origin: config.external_base.clone(),
            dpop: DPoPSettings {
                iat_tolerance: *config.dpop_iat_tolerance.as_ref(),
                jti_lifetime: *config.dpop_jti_lifetime.as_ref(),
                sweep_interval: *config.dpop_sweep_interval.as_ref(),
            },
            device_code_expiration: config.device_code_expiration.as_chrono(),
        },
        token.clone(),
    ));

    let app = build_router(AppState {
        config: Arc::new(config.clone()),
        auth_server: auth_server.clone(),
    });

    {
        let tracker = tracker.clone();
        let inner_token = token.clone();

        let ctrl_c = async {
            if let Err(err) = signal::ctrl_c().await {
                tracing::error!("failed to install Ctrl+C handler: {}", err);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(err) => {
                    tracing::error!("failed to install signal handler: {}", err);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::spawn(async move {
            tokio::select! {
                () = inner_token.cancelled() => { },
                _ = terminate => {},
                _ = ctrl_c => {},
            }

            tracker.close();
            inner_token.cancel();
        });
    }

    // Expired token and device authorization cleanup
    tracker.spawn(run_cleanup_loop(
        storage,
        auth_server.device().clone(),
        CleanupSettings {
            interval: *config.token_cleanup_interval.as_ref(),
            token_retention: config.token_retention.as_chrono(),
        },
        token.clone(),
    ));

    // Start HTTP server
    {
        let http_port = *config.http_port.as_ref();
        let inner_token = token.clone();
        tracker.spawn(async move {
            let bind_address = format!("0.0.0.0:{http_port}");
            tracing::info!("Starting server on {bind_address}");
            let listener = match TcpListener::bind(&bind_address).await {
                Ok(listener) => listener,
                Err(err) => {
                    tracing::error!("failed to bind {bind_address}: {}", err);
                    inner_token.cancel();
                    return;
                }
            };

            let shutdown_token = inner_token.clone();
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                    tracing::info!("axum graceful shutdown complete");
                })
                .await;
            if let Err(err) = result {
                tracing::error!("axum task failed: {}", err);
            }

            inner_token.cancel();
        });
    }

    tracker.wait().await;

    Ok(())
}
