//! maya-upgrade - upgrades storage resources with a CAS template

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use kube::CustomResourceExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use maya_common::crd::{CasTemplate, RunTask, UpgradeResult};
use maya_common::kube_utils::LazyClient;
use maya_common::telemetry::{init_telemetry, TelemetryConfig};
use maya_upgrade::{Collaborators, Executor, PodIdentity, UpgradeConfig};

/// Upgrade storage resources by running a CAS template against each of them
#[derive(Parser, Debug)]
#[command(name = "maya-upgrade", version, about, long_about = None)]
struct Cli {
    /// Path of the upgrade config YAML
    #[arg(long, env = "UPGRADE_CONFIG", default_value = "/etc/maya-upgrade/config.yaml")]
    config: PathBuf,

    /// Keep upgrading the remaining resources after one fails
    #[arg(long, env = "UPGRADE_CONTINUE_ON_ERROR")]
    continue_on_error: bool,

    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Name of the pod running the upgrade
    #[arg(long, env = "POD_NAME")]
    pod_name: Option<String>,

    /// Namespace of the pod running the upgrade
    #[arg(long, env = "POD_NAMESPACE")]
    pod_namespace: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    if cli.crd {
        for crd in [CasTemplate::crd(), RunTask::crd(), UpgradeResult::crd()] {
            let yaml = serde_yaml::to_string(&crd).context("failed to serialize CRD")?;
            println!("---\n{yaml}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    init_telemetry(TelemetryConfig {
        service_name: "maya-upgrade".to_string(),
        ..Default::default()
    })?;

    let pod = PodIdentity::new(cli.pod_name, cli.pod_namespace)?;
    let mut config = UpgradeConfig::load(&cli.config)?;
    config.continue_on_error |= cli.continue_on_error;

    let cancel = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
        warn!("cancelling upgrade");
        on_signal.cancel();
    });

    let executor = Executor::new(config, pod, Collaborators::kube(Arc::new(LazyClient::new())))?;
    let report = executor.run(&cancel).await?;

    info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        skipped = report.skipped.len(),
        "upgrade finished"
    );
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
