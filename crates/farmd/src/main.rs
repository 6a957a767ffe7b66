//! farmd: cluster farm deployer daemon.
//!
//! Watches a directory for web-application archives, replicates them to the
//! other cluster members over TCP and deploys what the members send.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use farm_core::config::FarmConfig;
use farm_core::message::MemberId;
use farm_services::{
    ChangeSource, LocalDeploymentOps, LocalHost, MessageDispatcher, ReplicationCoordinator,
    Scheduler, SessionRegistry, WarWatcher,
};

mod transport;

use transport::{SendWorker, TcpChannel};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    let config = match std::env::args().nth(1) {
        Some(path) => FarmConfig::load_from(&PathBuf::from(path))?,
        None => {
            if let Err(e) = FarmConfig::write_default_if_missing() {
                tracing::warn!(error = %e, "failed to write default config");
            }
            FarmConfig::load().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to load config, using defaults");
                FarmConfig::default()
            })
        }
    };
    let deployer = &config.deployer;
    let local = MemberId::new(config.cluster.member_name.clone());
    tracing::info!(member = %local, peers = config.cluster.peers.len(), "farmd starting");

    // Directories
    let deploy_dir = deployer.deploy_dir_path();
    let temp_dir = deployer.temp_dir_path();
    let config_base = deployer.config_base_path();
    for dir in [&deploy_dir, &temp_dir, &config_base] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    tracing::info!(
        deploy = %deploy_dir.display(),
        temp = %temp_dir.display(),
        config_base = %config_base.display(),
        "deployer directories ready"
    );

    // Local host
    let host = Arc::new(LocalHost::new(
        &deploy_dir,
        &config_base,
        &deployer.archive_suffix,
    ));
    let found = host.scan().context("failed to scan deploy directory")?;
    tracing::info!(units = found, "existing applications registered");

    // Transport
    let peers: Vec<(MemberId, String)> = config
        .cluster
        .peers
        .iter()
        .map(|p| (MemberId::new(p.name.clone()), p.addr.clone()))
        .collect();
    let (channel, outbound_rx) = TcpChannel::new(
        local.clone(),
        peers.iter().map(|(name, _)| name.clone()).collect(),
    );
    let channel = Arc::new(channel);

    // Shared state
    let sessions = Arc::new(SessionRegistry::new(Duration::from_secs(
        deployer.max_valid_time,
    )));
    let ops = Arc::new(LocalDeploymentOps::new(
        host.clone(),
        &deploy_dir,
        &config_base,
        &deployer.archive_suffix,
    ));
    let dispatcher = Arc::new(MessageDispatcher::new(
        sessions.clone(),
        host.clone(),
        ops.clone(),
        &temp_dir,
    ));
    let coordinator = Arc::new(ReplicationCoordinator::new(channel, host.clone(), ops));

    // Watcher
    let watcher: Option<Box<dyn ChangeSource>> = if deployer.watch_enabled {
        let watch_dir = deployer.watch_dir_path();
        std::fs::create_dir_all(&watch_dir)
            .with_context(|| format!("failed to create {}", watch_dir.display()))?;
        tracing::info!(dir = %watch_dir.display(), "watching for archives");
        Some(Box::new(WarWatcher::new(watch_dir, &deployer.archive_suffix)))
    } else {
        tracing::info!("watching disabled");
        None
    };

    // ── Shutdown ─────────────────────────────────────────────────────────────

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Tasks ────────────────────────────────────────────────────────────────

    let listener = TcpListener::bind(&config.cluster.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.cluster.listen_addr))?;

    let listener_task = tokio::spawn(transport::listener_loop(
        listener,
        dispatcher,
        shutdown_tx.subscribe(),
    ));

    let send_worker_task = tokio::spawn(
        SendWorker::new(peers, outbound_rx, shutdown_tx.subscribe()).run(),
    );

    let scheduler = Scheduler::new(
        sessions,
        coordinator,
        watcher,
        deployer.process_deploy_frequency,
    );
    let scheduler_task = tokio::spawn(scheduler.run(
        Duration::from_millis(deployer.tick_interval_ms),
        shutdown_tx.subscribe(),
    ));

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = listener_task       => tracing::error!("listener exited: {:?}", r),
        r = send_worker_task    => tracing::error!("send worker exited: {:?}", r),
        r = scheduler_task      => tracing::error!("scheduler exited: {:?}", r),
    }

    Ok(())
}
