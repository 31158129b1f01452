use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use vmsteward_controller::template::DEFAULT_LAUNCHER_IMAGE;
use vmsteward_controller::{
    ApiClient, ApiEventRecorder, ClusterClient, EventRecorder, Informer, LauncherTemplateService,
    Reflector, ReflectorConfig, TracingRecorder, VmController, VmControllerConfig,
};
use vmsteward_core::{Pod, VirtualMachine};

#[derive(Parser)]
#[command(name = "vmsteward", about = "VirtualMachine launcher pod controller")]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, env = "VMSTEWARD_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the VirtualMachine controller against an API server
    Run {
        /// API server URL
        #[arg(long, default_value = "http://127.0.0.1:6443", env = "VMSTEWARD_API_URL")]
        api_url: String,
        /// Number of concurrent reconcile workers
        #[arg(long, default_value_t = 3, env = "VMSTEWARD_WORKERS")]
        workers: usize,
        /// Seconds between two full listings of VMs and pods
        #[arg(long, default_value_t = 5, env = "VMSTEWARD_RESYNC_INTERVAL_SECS")]
        resync_interval_secs: u64,
        /// Image of the launcher container
        #[arg(long, default_value = DEFAULT_LAUNCHER_IMAGE, env = "VMSTEWARD_LAUNCHER_IMAGE")]
        launcher_image: String,
        /// Post events to the API server instead of only logging them
        #[arg(long, env = "VMSTEWARD_RECORD_EVENTS")]
        record_events: bool,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Run {
            api_url,
            workers,
            resync_interval_secs,
            launcher_image,
            record_events,
        } => {
            if workers == 0 {
                return Err(miette::miette!("--workers must be at least 1"));
            }
            run_controller(
                &api_url,
                workers,
                Duration::from_secs(resync_interval_secs.max(1)),
                &launcher_image,
                record_events,
            )
            .await
        }
    }
}

/// Run the reflectors and the VM controller until ctrl-c
async fn run_controller(
    api_url: &str,
    workers: usize,
    resync_interval: Duration,
    launcher_image: &str,
    record_events: bool,
) -> miette::Result<()> {
    info!("Starting vmsteward against {}", api_url);

    let api_client = Arc::new(ApiClient::new(api_url));
    let client: Arc<dyn ClusterClient> = api_client.clone();
    let recorder: Arc<dyn EventRecorder> = if record_events {
        Arc::new(ApiEventRecorder::new(api_client.clone()))
    } else {
        Arc::new(TracingRecorder)
    };

    let vm_informer: Arc<Informer<VirtualMachine>> = Arc::new(Informer::new("virtualmachine"));
    let pod_informer: Arc<Informer<Pod>> = Arc::new(Informer::new("pod"));

    let controller = Arc::new(VmController::new(
        client.clone(),
        Arc::new(LauncherTemplateService::new(launcher_image)),
        recorder,
        vm_informer.clone(),
        pod_informer.clone(),
        VmControllerConfig {
            workers,
            ..Default::default()
        },
    ));

    let token = CancellationToken::new();
    let reflector_config = ReflectorConfig { resync_interval };

    // 1. Spawn reflectors feeding the caches
    let vm_reflector = Reflector::new(vm_informer, client.clone(), reflector_config.clone());
    let vm_token = token.clone();
    let vm_reflector_handle = tokio::spawn(async move { vm_reflector.run(vm_token).await });

    let pod_reflector = Reflector::new(pod_informer, client, reflector_config);
    let pod_token = token.clone();
    let pod_reflector_handle = tokio::spawn(async move { pod_reflector.run(pod_token).await });

    // 2. Spawn the controller; it waits for both caches before starting workers
    let controller_handle = tokio::spawn(controller.run(token.clone()));

    info!("All components started with {} workers", workers);

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;

    info!("Shutting down gracefully...");
    token.cancel();

    // Wait for all tasks to finish with a timeout
    let shutdown_timeout = Duration::from_secs(5);
    let joined = tokio::time::timeout(shutdown_timeout, async {
        tokio::join!(vm_reflector_handle, pod_reflector_handle, controller_handle)
    })
    .await;

    match joined {
        Ok((vms, pods, controller)) => {
            for result in [vms, pods, controller] {
                if let Err(e) = result {
                    error!("Task failed during shutdown: {}", e);
                }
            }
        }
        Err(_) => error!("Shutdown timed out after {:?}", shutdown_timeout),
    }

    info!("Shutdown complete");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["vmsteward", "run"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Text);
        match cli.command {
            Commands::Run {
                api_url,
                workers,
                resync_interval_secs,
                launcher_image,
                record_events,
            } => {
                assert_eq!(api_url, "http://127.0.0.1:6443");
                assert_eq!(workers, 3);
                assert_eq!(resync_interval_secs, 5);
                assert_eq!(launcher_image, DEFAULT_LAUNCHER_IMAGE);
                assert!(!record_events);
            }
        }
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "vmsteward",
            "--log-format",
            "json",
            "run",
            "--api-url",
            "http://api:6443",
            "--workers",
            "8",
            "--record-events",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        let Commands::Run {
            api_url,
            workers,
            record_events,
            ..
        } = cli.command;
        assert_eq!(api_url, "http://api:6443");
        assert_eq!(workers, 8);
        assert!(record_events);
    }
}
