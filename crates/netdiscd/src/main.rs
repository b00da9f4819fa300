// # netdiscd - Network Discovery Daemon
//
// Thin integration layer:
// 1. Reading configuration (JSON file + environment overrides)
// 2. Initializing logging and the runtime
// 3. Registering probers and device stores
// 4. Running the inventory engine, or a one-shot command
//
// No discovery, classification or status logic lives here; all of it is in
// netdisc-core.
//
// ## Usage
//
// ```text
// netdiscd                     scheduled daemon (monitor + optional discovery)
// netdiscd discover <target>   one discovery run; target is CIDR, a-b range or "all"
// netdiscd monitor             one status monitor cycle
// ```
//
// One-shot commands print their summary as JSON on stdout.
//
// ## Configuration
//
// - `NETDISC_CONFIG`: Path to a JSON `DiscoveryConfig` (optional)
// - `NETDISC_SUBNETS`: Comma-separated CIDRs for "all configured subnets"
// - `NETDISC_SNMP_COMMUNITIES`: Comma-separated community strings, tried in order
// - `NETDISC_CONCURRENCY`: Maximum probes in flight
// - `NETDISC_MONITOR_INTERVAL_SECS`: Status monitor cadence
// - `NETDISC_DISCOVERY_INTERVAL_SECS`: Scheduled discovery cadence (0 = off)
// - `NETDISC_STORE_PATH`: Use the file store at this path
// - `NETDISC_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export NETDISC_SUBNETS=192.168.10.0/24,192.168.20.0/24
// export NETDISC_STORE_PATH=/var/lib/netdisc/inventory.json
// export NETDISC_DISCOVERY_INTERVAL_SECS=3600
//
// netdiscd
// ```

use anyhow::{Context, Result};
use netdisc_core::config::{DiscoveryConfig, StoreConfig};
use netdisc_core::{ComponentRegistry, InventoryEngine, InventoryEvent, ScanTarget};
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Time allowed for in-flight probes and the final flush after a signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum NetdiscExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<NetdiscExitCode> for ExitCode {
    fn from(code: NetdiscExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// What the process was asked to do
#[derive(Debug)]
enum Command {
    Daemon,
    Discover(ScanTarget),
    Monitor,
}

impl Command {
    fn from_args(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let command = match args.next().as_deref() {
            None | Some("daemon") => Command::Daemon,
            Some("discover") => {
                let target = args.next().unwrap_or_else(|| "all".to_string());
                Command::Discover(ScanTarget::from_str(&target)?)
            }
            Some("monitor") => Command::Monitor,
            Some(other) => anyhow::bail!(
                "Unknown command '{}'. Usage: netdiscd [daemon | discover <target> | monitor]",
                other
            ),
        };
        if let Some(extra) = args.next() {
            anyhow::bail!("Unexpected argument '{}'", extra);
        }
        Ok(command)
    }
}

/// Application settings
struct Settings {
    discovery: DiscoveryConfig,
    log_level: String,
    command: Command,
}

impl Settings {
    /// Load the JSON config (if any), then apply environment overrides
    fn from_env() -> Result<Self> {
        let mut discovery = match env::var("NETDISC_CONFIG") {
            Ok(path) if !path.is_empty() => DiscoveryConfig::from_file(&path)?,
            _ => DiscoveryConfig::default(),
        };

        if let Some(subnets) = list_var("NETDISC_SUBNETS") {
            discovery.subnets = subnets;
        }
        if let Some(communities) = list_var("NETDISC_SNMP_COMMUNITIES") {
            discovery.probe.snmp_communities = communities;
        }
        if let Some(concurrency) = parsed_var("NETDISC_CONCURRENCY")? {
            discovery.engine.concurrency = concurrency;
        }
        if let Some(secs) = parsed_var("NETDISC_MONITOR_INTERVAL_SECS")? {
            discovery.engine.monitor_interval_secs = secs;
        }
        if let Some(secs) = parsed_var("NETDISC_DISCOVERY_INTERVAL_SECS")? {
            discovery.engine.discovery_interval_secs = secs;
        }
        if let Ok(path) = env::var("NETDISC_STORE_PATH") {
            discovery.store = StoreConfig::File { path };
        }

        Ok(Self {
            discovery,
            log_level: env::var("NETDISC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            command: Command::from_args(env::args().skip(1))?,
        })
    }

    /// Validate the settings
    ///
    /// Checks the log level, then delegates to `DiscoveryConfig::validate`
    /// (CIDRs, regexes, limits), and checks the file store directory.
    fn validate(&self) -> Result<()> {
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "NETDISC_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        self.discovery.validate()?;

        if let StoreConfig::File { path } = &self.discovery.store {
            if path.is_empty() {
                anyhow::bail!("NETDISC_STORE_PATH cannot be empty");
            }
            if let Some(parent) = std::path::Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                anyhow::bail!(
                    "Store directory does not exist: {}. \
                        Create it first: sudo mkdir -p {}",
                    parent.display(),
                    parent.display()
                );
            }
        }

        if matches!(self.command, Command::Discover(ScanTarget::AllConfigured))
            && self.discovery.subnets.is_empty()
        {
            anyhow::bail!(
                "No subnets configured for 'discover all'. \
                Set NETDISC_SUBNETS or pass a CIDR/range target"
            );
        }

        Ok(())
    }
}

fn list_var(name: &str) -> Option<Vec<String>> {
    let value = env::var(name).ok()?;
    Some(
        value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    )
}

fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} has an invalid value '{}'", name, value)),
        Err(_) => Ok(None),
    }
}

fn main() -> ExitCode {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return NetdiscExitCode::ConfigError.into();
        }
    };

    if let Err(e) = settings.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return NetdiscExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match settings.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout carries command output; logs go to stderr
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return NetdiscExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return NetdiscExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        let (engine, events) = match build_engine(settings.discovery).await {
            Ok(built) => built,
            Err(e) => {
                error!("Startup error: {:#}", e);
                return NetdiscExitCode::ConfigError;
            }
        };

        if let Err(e) = execute(settings.command, engine, events).await {
            error!("Runtime error: {:#}", e);
            NetdiscExitCode::RuntimeError
        } else {
            NetdiscExitCode::CleanShutdown
        }
    });

    code.into()
}

/// Build prober, store and engine from configuration
async fn build_engine(
    config: DiscoveryConfig,
) -> Result<(InventoryEngine, mpsc::Receiver<InventoryEvent>)> {
    let registry = ComponentRegistry::with_builtin_stores();

    #[cfg(feature = "net")]
    {
        debug!("Registering network prober");
        netdisc_probe_net::register(&registry);
    }

    let prober = registry
        .create_prober(&config)
        .with_context(|| format!("Cannot create prober '{}'", config.prober.type_name()))?;
    let store = registry
        .create_store(&config.store)
        .await
        .with_context(|| format!("Cannot open store '{}'", config.store.type_name()))?;

    info!(
        "Using prober '{}', store '{}', {} configured subnet(s)",
        prober.prober_name(),
        config.store.type_name(),
        config.subnets.len()
    );

    Ok(InventoryEngine::new(prober, store, config)?)
}

async fn execute(
    command: Command,
    engine: InventoryEngine,
    events: mpsc::Receiver<InventoryEvent>,
) -> Result<()> {
    let logger = tokio::spawn(log_events(events));

    // Each arm consumes the engine, which owns every event sender
    let result = match command {
        Command::Discover(target) => discover_once(engine, &target).await,
        Command::Monitor => monitor_once(engine).await,
        Command::Daemon => run_daemon(engine).await,
    };

    if tokio::time::timeout(Duration::from_secs(5), logger).await.is_err() {
        warn!("Event logger did not drain in time");
    }
    result
}

async fn discover_once(engine: InventoryEngine, target: &ScanTarget) -> Result<()> {
    info!("Discovering {}", target);
    let summary = engine.discover(target).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn monitor_once(engine: InventoryEngine) -> Result<()> {
    let summary = engine.monitor_once().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Run the scheduled engine until SIGTERM/SIGINT
async fn run_daemon(engine: InventoryEngine) -> Result<()> {
    info!("Starting netdiscd daemon");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let mut engine_task =
        tokio::spawn(async move { engine.run_with_shutdown(Some(shutdown_rx)).await });

    let result = tokio::select! {
        joined = &mut engine_task => {
            warn!("Engine stopped without a shutdown signal");
            joined.context("Engine task panicked")?.map_err(anyhow::Error::from)
        }
        signal = wait_for_shutdown() => {
            let signal = signal?;
            info!("Received shutdown signal: {}", signal);
            let _ = shutdown_tx.send(());

            match tokio::time::timeout(SHUTDOWN_GRACE, &mut engine_task).await {
                Ok(joined) => joined.context("Engine task panicked")?.map_err(anyhow::Error::from),
                Err(_) => {
                    engine_task.abort();
                    Err(anyhow::anyhow!("Shutdown timeout after {:?}", SHUTDOWN_GRACE))
                }
            }
        }
    };

    info!("Shutting down daemon");
    result
}

/// Stand-in notifier: one structured log line per inventory event
async fn log_events(mut events: mpsc::Receiver<InventoryEvent>) {
    while let Some(event) = events.recv().await {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Cannot serialize event: {}", e);
                continue;
            }
        };
        match event {
            InventoryEvent::StatusChanged(_)
            | InventoryEvent::DeviceDiscovered { .. }
            | InventoryEvent::ClassificationChanged(_) => info!(target: "netdisc::events", "{}", line),
            _ => debug!(target: "netdisc::events", "{}", line),
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;
    use netdisc_core::MemoryDeviceStore;
    use netdisc_core::traits::{Liveness, ProbeResult, Prober};
    use std::net::IpAddr;

    /// Nothing answers
    struct DarkNetwork;

    #[async_trait::async_trait]
    impl Prober for DarkNetwork {
        async fn probe(&self, _ip: IpAddr) -> netdisc_core::Result<ProbeResult> {
            Ok(ProbeResult::Unreachable)
        }

        async fn ping(&self, _ip: IpAddr) -> netdisc_core::Result<Liveness> {
            Ok(Liveness::Dead)
        }

        fn prober_name(&self) -> &'static str {
            "dark"
        }
    }

    #[tokio::test]
    async fn test_one_shot_commands_drain_events() {
        let mut config = DiscoveryConfig::default();
        config.probe.resolve_hostnames = false;
        config.engine.event_channel_capacity = 1;

        let (engine, events) = InventoryEngine::new(
            Box::new(DarkNetwork),
            Box::new(MemoryDeviceStore::new()),
            config,
        )
        .unwrap();
        let target = ScanTarget::from_str("10.99.0.0/28").unwrap();

        // Shorter than the drain timeout: the logger must end on its own
        // once the engine and its senders are gone
        let run = execute(Command::Discover(target), engine, events);
        let result = tokio::time::timeout(Duration::from_secs(3), run)
            .await
            .expect("one-shot discover returns");
        assert!(result.is_ok());
    }

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_command_parsing() {
        assert!(matches!(Command::from_args(args(&[])).unwrap(), Command::Daemon));
        assert!(matches!(
            Command::from_args(args(&["monitor"])).unwrap(),
            Command::Monitor
        ));
        assert!(matches!(
            Command::from_args(args(&["discover", "10.0.0.0/24"])).unwrap(),
            Command::Discover(ScanTarget::Cidr(_))
        ));
        assert!(matches!(
            Command::from_args(args(&["discover"])).unwrap(),
            Command::Discover(ScanTarget::AllConfigured)
        ));
    }

    #[test]
    fn test_command_rejects_garbage() {
        assert!(Command::from_args(args(&["scan"])).is_err());
        assert!(Command::from_args(args(&["discover", "10.0.0.0/33"])).is_err());
        assert!(Command::from_args(args(&["monitor", "now"])).is_err());
    }

    #[test]
    fn test_discover_all_needs_subnets() {
        let settings = Settings {
            discovery: DiscoveryConfig::default(),
            log_level: "info".to_string(),
            command: Command::Discover(ScanTarget::AllConfigured),
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let settings = Settings {
            discovery: DiscoveryConfig::default(),
            log_level: "verbose".to_string(),
            command: Command::Monitor,
        };
        assert!(settings.validate().is_err());
    }
}
