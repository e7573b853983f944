use clap::Parser;
use log::{error, info, warn};
use sensor_broadcast::config::{Config, load_dotenv};
use sensor_broadcast::input::{SimulatedSource, build_sources};
use sensor_broadcast::lifecycle::{Availability, Controllable, ControllableEvent};
use sensor_broadcast::sensors::{Consumer, Producer, Value};
use sensor_broadcast::sources::{Source, SourceAggregator, SourceProviderEvent};
use std::sync::Arc;
use tokio::signal;

#[derive(Parser)]
#[command(name = "sensor-broadcast")]
#[command(about = "Run simulated sensor sources and log every broadcast")]
struct Cli {
    /// Sampling period in milliseconds
    #[arg(long, env = "BROADCAST_SAMPLE_INTERVAL_MS")]
    interval_ms: Option<u64>,

    /// Simulated permission prompt latency in milliseconds
    #[arg(long, env = "BROADCAST_PERMISSION_DELAY_MS")]
    permission_delay_ms: Option<u64>,

    /// Comma-separated source names
    #[arg(long, env = "BROADCAST_SOURCES")]
    sources: Option<String>,

    /// Comma-separated sources to deny permission
    #[arg(long, env = "BROADCAST_DENIED_SOURCES")]
    deny: Option<String>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,
}

/// Logs readings, lifecycle events and membership changes.
struct LogConsumer;

impl Consumer<Value<f64>, SimulatedSource> for LogConsumer {
    fn receive(&self, value: &Value<f64>, source: &SimulatedSource) {
        info!(
            "[{}] level = {:.2} at {}",
            source.name(),
            value.data,
            value.timestamp.format("%H:%M:%S%.3f")
        );
    }
}

impl Consumer<Value<bool>, SimulatedSource> for LogConsumer {
    fn receive(&self, value: &Value<bool>, source: &SimulatedSource) {
        info!("[{}] active = {}", source.name(), value.data);
    }
}

impl Consumer<ControllableEvent, SimulatedSource> for LogConsumer {
    fn receive(&self, event: &ControllableEvent, source: &SimulatedSource) {
        info!("[{}] lifecycle: {:?}", source.name(), event);
    }
}

impl Consumer<ControllableEvent, Arc<dyn Source>> for LogConsumer {
    fn receive(&self, event: &ControllableEvent, source: &Arc<dyn Source>) {
        if let ControllableEvent::AvailabilityUpdated(Availability::Unavailable(reason)) = event {
            warn!("[{}] unavailable: {}", source.name(), reason);
        }
    }
}

impl Consumer<SourceProviderEvent, SourceAggregator> for LogConsumer {
    fn receive(&self, event: &SourceProviderEvent, _sender: &SourceAggregator) {
        info!("Sources: {:?}", event);
    }
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

/// Environment configuration with the command line applied on top.
///
/// Each flag falls back to its `BROADCAST_*` variable through clap, so an
/// absent flag leaves the environment value in place.
fn load_config(cli: &Cli) -> Config {
    let mut config = Config::from_env();
    config.apply_overrides(|key| match key {
        "BROADCAST_SAMPLE_INTERVAL_MS" => cli.interval_ms.map(|ms| ms.to_string()),
        "BROADCAST_PERMISSION_DELAY_MS" => cli.permission_delay_ms.map(|ms| ms.to_string()),
        "BROADCAST_SOURCES" => cli.sources.clone(),
        "BROADCAST_DENIED_SOURCES" => cli.deny.clone(),
        _ => None,
    });
    config
}

#[tokio::main]
async fn main() {
    load_dotenv();
    init_logger();
    let cli = Cli::parse();

    let config = load_config(&cli);
    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(2);
    }
    if cli.print_config {
        match serde_json::to_string_pretty(&config) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to serialize configuration: {}", e),
        }
        return;
    }

    info!("Starting sensor broadcast");
    info!("  Sources: {}", config.simulation.sources.join(", "));
    info!("  Sample interval: {:?}", config.simulation.sample_interval());

    // The registries only hold this weakly, so it must outlive the run
    let logger = Arc::new(LogConsumer);

    let aggregator = SourceAggregator::new("all-sources");
    aggregator.subscribe::<SourceProviderEvent, _>(&logger);
    aggregator
        .lifecycle()
        .subscribe::<Arc<dyn Source>, _>(&logger);

    for source in build_sources(&config.simulation) {
        source.subscribe::<Value<f64>, _>(&logger);
        source.subscribe::<Value<bool>, _>(&logger);
        source.lifecycle().subscribe::<SimulatedSource, _>(&logger);
        if let Err(e) = aggregator.add(source) {
            error!("Failed to register source: {}", e);
        }
    }

    aggregator.start_updating().await;
    let updating = aggregator
        .sources()
        .iter()
        .filter(|source| source.lifecycle().is_updating())
        .count();
    info!(
        "{} of {} sources updating, press Ctrl+C to exit",
        updating,
        aggregator.len()
    );

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    aggregator.stop_updating().await;
    info!("Sensor broadcast stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from([
            "sensor-broadcast",
            "--interval-ms",
            "20",
            "--sources",
            "motion,screen",
            "--deny",
            "screen",
        ]);
        let config = load_config(&cli);

        assert_eq!(config.simulation.sample_interval_ms, 20);
        assert_eq!(config.simulation.sources, vec!["motion", "screen"]);
        assert!(config.simulation.is_denied("screen"));
    }
}
