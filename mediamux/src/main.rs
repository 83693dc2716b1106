//! `mediamux` binary (C9): loads configuration, constructs the
//! [`PathManager`] and wire drivers, and runs them under one `tokio`
//! runtime with graceful shutdown and `SIGHUP` hot-reload — the wiring the
//! teacher's `synctv` binary does for its own server components, adapted to
//! this relay's component set.

mod admin;
mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mediamux_core::config::RelayConfig;
use mediamux_core::path_manager::PathManager;
use mediamux_engine::flv::http::{self as flv_http, HttpFlvState};
use mediamux_engine::hls::{self, HlsHttpState};
use mediamux_engine::rtmp::RtmpServer;
use mediamux_engine::storage::{FileStorage, HlsStorage};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::admin::AdminState;
use crate::cli::Cli;

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match RelayConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    if cli.check_config {
        println!("configuration OK: {} path pattern(s)", config.paths.len());
        std::process::exit(0);
    }

    let log_level = cli.log_level.as_deref().unwrap_or(&config.global.log_level);
    init_tracing(log_level);

    if let Err(e) = run(cli, config).await {
        error!(error = %e, "mediamux exited with an error");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: RelayConfig) -> anyhow::Result<()> {
    let manager = Arc::new(PathManager::new(&config)?);
    let shutdown = CancellationToken::new();
    let mut tasks = tokio::task::JoinSet::new();

    let rtmp_server = if config.global.rtmp {
        let server = Arc::new(RtmpServer::new(manager.clone(), Duration::from_secs(10)));
        let addr = config.global.rtmp_address;
        let run_server = server.clone();
        let cancel = shutdown.child_token();
        tasks.spawn(async move {
            if let Err(e) = run_server.run(addr, cancel).await {
                error!(error = %e, "rtmp server stopped");
            }
        });
        info!(%addr, "rtmp ingest/playback enabled");
        Some(server)
    } else {
        None
    };

    if config.global.hls {
        let storage: Arc<dyn HlsStorage> = Arc::new(FileStorage::new(cli.hls_dir.clone()));
        tokio::fs::create_dir_all(&cli.hls_dir).await.ok();
        let hls_state = HlsHttpState::new(manager.clone(), storage);
        let flv_state = HttpFlvState::new(manager.clone());
        let app = hls::router(hls_state).merge(flv_http::router(flv_state));
        let addr = config.global.hls_address;
        let cancel = shutdown.child_token();
        tasks.spawn(async move {
            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(%addr, error = %e, "failed to bind hls listener");
                    return;
                }
            };
            info!(%addr, "hls pull and http-flv egress enabled");
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await;
        });
    }

    if config.global.api {
        let rtmp_connections = match &rtmp_server {
            Some(server) => server.registry(),
            None => mediamux_engine::rtmp::ConnectionRegistry::new(),
        };
        let admin_state = Arc::new(AdminState {
            manager: manager.clone(),
            config: RwLock::new(config.clone()),
            config_path: cli.config.clone(),
            rtmp_connections,
        });
        let app = admin::router(admin_state);
        let addr = config.global.api_address;
        let cancel = shutdown.child_token();
        tasks.spawn(async move {
            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(%addr, error = %e, "failed to bind admin api listener");
                    return;
                }
            };
            info!(%addr, "admin api enabled");
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await;
        });
    }

    wait_for_shutdown(&config, &manager, &cli, &shutdown).await;

    shutdown.cancel();
    while tasks.join_next().await.is_some() {}
    info!("mediamux shut down cleanly");
    Ok(())
}

/// Blocks until `SIGINT`/`SIGTERM`, reloading configuration in place on
/// every `SIGHUP` in the meantime (§4.5, §6's `config/reload`).
async fn wait_for_shutdown(config: &RelayConfig, manager: &Arc<PathManager>, cli: &Cli, shutdown: &CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
        let _ = config;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => { info!("received SIGINT, shutting down"); break; }
                _ = sigterm.recv() => { info!("received SIGTERM, shutting down"); break; }
                _ = sighup.recv() => {
                    info!("received SIGHUP, reloading configuration");
                    match RelayConfig::load(&cli.config) {
                        Ok(new) => {
                            if let Err(e) = manager.apply_config(&new).await {
                                warn!(error = %e, "configuration reload rejected");
                            }
                        }
                        Err(e) => warn!(error = %e, "configuration reload failed to parse"),
                    }
                }
                () = shutdown.cancelled() => break,
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (config, manager, cli);
        let _ = tokio::signal::ctrl_c().await;
        info!("received ctrl-c, shutting down");
    }
}
