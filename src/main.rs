//! Engine entry point: CLI dispatch, tracing init, scheduler startup.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use zephyr_engine::alerts::{AlertStore, AlertTracker, ConnectivityWindow};
use zephyr_engine::app::cli::{filter_for_level, Args};
use zephyr_engine::app::logging::{init_tracing, reload_filter};
use zephyr_engine::bmc::{ExecPolicy, Executor, IpmitoolTransport};
use zephyr_engine::config::persistence::load_config;
use zephyr_engine::credentials::{CredentialResolver, StaticResolver};
use zephyr_engine::engine::{self, EngineContext, JobScheduler, LogSink};
use zephyr_engine::notify::{Dispatcher, HttpSender, NotifyPolicy};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Priority: --log-level flag, LOG_LEVEL env, config file, default.
    // The config value is applied through the reload handle once loaded.
    let initial_level = args
        .log_level
        .clone()
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string());
    init_tracing(filter_for_level(&initial_level));

    info!("Zephyr engine v{} starting", env!("CARGO_PKG_VERSION"));

    let cfg = load_config(Path::new(&args.config)).await?;
    if args.log_level.is_none() && std::env::var("LOG_LEVEL").is_err() {
        reload_filter(filter_for_level(&cfg.settings.log_level));
    }

    if args.check {
        println!(
            "Configuration OK: {} servers, {} notification channels",
            cfg.servers.len(),
            cfg.channels.len()
        );
        return Ok(());
    }

    let resolver: Arc<dyn CredentialResolver> =
        Arc::new(StaticResolver::new(cfg.secrets.clone()));
    let settings = cfg.settings.clone();
    let ctx = Arc::new(EngineContext {
        executor: Executor::new(
            Arc::new(IpmitoolTransport),
            ExecPolicy {
                attempt_timeout: Duration::from_secs(settings.command_timeout_secs),
                retries: settings.command_retries,
                backoff_base: Duration::from_millis(settings.retry_backoff_ms),
            },
        ),
        resolver: Arc::clone(&resolver),
        tracker: AlertTracker::new(Arc::new(AlertStore::new())),
        dispatcher: Arc::new(Dispatcher::new(
            Arc::new(HttpSender::new()),
            resolver,
            NotifyPolicy {
                timeout: Duration::from_secs(settings.notify_timeout_secs),
                retries: settings.notify_retries,
                backoff_base: Duration::from_millis(settings.retry_backoff_ms),
            },
        )),
        sink: Arc::new(LogSink),
        channels: cfg.channels.clone(),
        settings,
    });

    // User-triggered channel test: single attempt, immediate feedback.
    if let Some(channel_id) = args.test_channel {
        let Some(channel) = cfg.channels.iter().find(|c| c.id == channel_id) else {
            anyhow::bail!("no notification channel with id {channel_id}");
        };
        let outcome = ctx.dispatcher.send_test(channel).await;
        match outcome.result {
            Ok(()) => println!("Channel '{}' OK", channel.name),
            Err(e) => {
                println!("Channel '{}' failed: {e}", channel.name);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    // Single poll cycle per server, mostly for bring-up and cron checks.
    if args.once {
        for server in &cfg.servers {
            let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
            let mut window = ConnectivityWindow::default();
            if let Some(run) = engine::poll::run_tick(&ctx, server, &mut window, &cancel_rx).await
            {
                info!("{}: {:?} - {}", server.name, run.status, run.message);
            }
        }
        return Ok(());
    }

    let scheduler = JobScheduler::new(Arc::clone(&ctx));
    let mut scheduled = 0usize;
    for server in cfg.servers.clone() {
        let name = server.name.clone();
        match scheduler.schedule(server).await {
            Ok(()) => scheduled += 1,
            Err(e) => error!("Server {name} not scheduled: {e}"),
        }
    }
    info!(
        "Engine started: {scheduled} poll jobs, worker pool of {}",
        ctx.settings.worker_pool_size
    );

    // SIGHUP reloads the log level from the config file.
    #[cfg(unix)]
    {
        let config_path = args.config.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let Ok(mut sighup) = signal(SignalKind::hangup()) else {
                return;
            };
            loop {
                sighup.recv().await;
                info!("SIGHUP received, reloading log level");
                match load_config(Path::new(&config_path)).await {
                    Ok(new_cfg) => {
                        if reload_filter(filter_for_level(&new_cfg.settings.log_level)) {
                            info!(
                                "Log level reloaded: {}",
                                new_cfg.settings.log_level.to_uppercase()
                            );
                        }
                    }
                    Err(e) => error!("Failed to reload config: {e}"),
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received (Ctrl+C)");
    scheduler.shutdown().await;
    if scheduler.dropped_ticks() > 0 {
        warn!(
            "{} ticks were dropped waiting for a worker",
            scheduler.dropped_ticks()
        );
    }
    info!("Engine shutdown complete");
    Ok(())
}
