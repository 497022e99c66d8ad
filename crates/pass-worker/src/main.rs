// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pass worker binary: the store host behind a Unix socket, running on the
//! in-memory backend.

use anyhow::Result;
use clap::Parser;
use pass_app_core::config::ConfigService;
use pass_app_core::ports::CachePort;
use pass_app_core::prefs::{WorkerPrefs, WORKER_PREFS_KEY};
use pass_config_fs::{FsCacheStore, FsConfigStore};
use pass_session_proto::default_socket_path;
use pass_worker::memory::{MemoryApi, PlainCrypto};
use pass_worker::{server, Collaborators, WorkerContext};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UnixListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Pass store host over a Unix socket")]
struct Args {
    /// Unix socket to listen on (overrides the saved preference)
    #[arg(long)]
    socket: Option<PathBuf>,
    /// Encrypted cache file (overrides the saved preference)
    #[arg(long)]
    cache: Option<PathBuf>,
    /// Share feed polling interval in milliseconds
    #[arg(long)]
    share_interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let args = Args::parse();

    // Config (best-effort), defaults persisted once
    let config: Option<ConfigService<FsConfigStore>> =
        FsConfigStore::new().map(ConfigService::new).ok();
    let mut prefs: WorkerPrefs = config
        .as_ref()
        .map(|c| c.load_or_init(WORKER_PREFS_KEY))
        .unwrap_or_default();
    if let Some(ms) = args.share_interval_ms {
        prefs.polling.share_interval_ms = ms;
    }

    let socket_path = args
        .socket
        .or_else(|| prefs.socket_path.clone().map(PathBuf::from))
        .unwrap_or_else(default_socket_path);
    let cache: Arc<dyn CachePort> = match args.cache.or_else(|| prefs.cache_path.clone().map(PathBuf::from)) {
        Some(path) => Arc::new(FsCacheStore::at(path)),
        None => Arc::new(FsCacheStore::new()?),
    };

    let ctx = WorkerContext::start(
        Collaborators {
            api: Arc::new(MemoryApi::demo()),
            crypto: Arc::new(PlainCrypto::default()),
            cache,
        },
        prefs,
    )
    .await?;

    // Remove stale socket if present
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)?;
    info!("pass worker listening at {}", socket_path.display());

    tokio::select! {
        served = server::serve(Arc::clone(&ctx), listener) => served?,
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
    ctx.shutdown().await;
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}
