//! vpn-monitor - VPN endpoint monitor
//!
//! Periodically brings up a tunnel to every configured server, records how
//! it went, and tears it down again.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vpnmon::config::{Cli, MonitorConfig, RunMode};
use vpnmon::{PingProbe, PublicIpResolver, Scheduler, TestCycle, VERSION, health, identity, logging};
use vpnmon_daemon::{
    ConfigGenerator, DaemonController, L2tpDriver, StrongSwanBackend, TunnelMonitor,
};
use vpnmon_store::{ResultStore, SqliteStore};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match logging::init(cli.log_format, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("vpn-monitor: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = format!("{e:#}"), "vpn-monitor failed to start");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = MonitorConfig::from_cli(cli).context("invalid configuration")?;
    info!(
        version = VERSION,
        mode = ?config.mode,
        servers = config.servers.len(),
        db = %config.db_path.display(),
        "starting vpn-monitor"
    );

    let mut backend = StrongSwanBackend::new().with_program_path(config.ipsec_bin.clone());
    if !config.ipsec_only {
        backend = backend.with_l2tp(
            L2tpDriver::new()
                .with_program_path(config.xl2tpd_bin.clone())
                .with_control_path(config.l2tp_control_path.clone()),
        );
    }
    let controller = DaemonController::new(backend);

    if config.mode == RunMode::HealthCheck {
        return Ok(health_check(&config, &controller).await);
    }

    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("cannot open result store {}", config.db_path.display()))?;
    store.ping().context("result store unreachable at startup")?;

    std::fs::create_dir_all(&config.ipsec_config_dir).with_context(|| {
        format!(
            "cannot create daemon config directory {}",
            config.ipsec_config_dir.display()
        )
    })?;

    if let Some(control_dir) = config
        .l2tp_control_path
        .parent()
        .filter(|dir| !config.ipsec_only && !dir.as_os_str().is_empty())
    {
        std::fs::create_dir_all(control_dir).with_context(|| {
            format!("cannot create l2tp control directory {}", control_dir.display())
        })?;
    }

    let identity = identity::discover(config.monitor_id.as_deref());
    info!(
        computer = %identity.computer_identifier,
        user = %identity.system_username,
        os = %identity.operating_system,
        "monitor identity"
    );
    let public_ip = if config.public_ip_lookup {
        PublicIpResolver::default().resolve().await
    } else {
        None
    };

    let cycle = TestCycle::new(
        ConfigGenerator::new(&config.ipsec_config_dir),
        TunnelMonitor::new(config.poll_interval),
        config.timeout,
        identity,
        PingProbe::new(),
    )
    .with_public_ip(public_ip);
    let mut scheduler = Scheduler::new(controller, cycle);

    let cancel = CancellationToken::new();
    let signal_task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            wait_for_shutdown_signal().await;
            info!("shutdown requested, finishing current cycle");
            cancel.cancel();
        }
    });

    let report = scheduler
        .run(&config.servers, config.effective_interval(), &store, &cancel)
        .await;
    signal_task.abort();

    if report.recording_errors > 0 {
        warn!(
            recording_errors = report.recording_errors,
            "some results could not be recorded"
        );
    }
    info!("vpn-monitor stopped");
    Ok(ExitCode::SUCCESS)
}

async fn health_check(
    config: &MonitorConfig,
    controller: &DaemonController<StrongSwanBackend>,
) -> ExitCode {
    let report = match SqliteStore::open_existing(&config.db_path) {
        Ok(store) => health::check(&store as &dyn ResultStore, controller).await,
        Err(e) => {
            error!(error = %e, "result store unavailable");
            health::HealthReport {
                store: "sqlite",
                store_error: Some(e.to_string()),
                daemon: controller.backend_name(),
                daemon_installed: controller.is_installed().await,
            }
        }
    };

    match serde_json::to_string(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => warn!(error = %e, "cannot render health report"),
    }

    if report.is_healthy() {
        info!("health check passed");
        ExitCode::SUCCESS
    } else {
        error!("health check failed");
        ExitCode::FAILURE
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            return;
        }
    }

    let _ = tokio::signal::ctrl_c().await;
}
