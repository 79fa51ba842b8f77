use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use laser::config as config_store;
use laser::control_plane;
use laser::layout::Layout;
use laser::partition_table::PartitionTable;
use laser::reconfigure;
use laser_config::Config;
use tokio::signal::ctrl_c;
use tracing::{error, info};

/// Laser is a distributed, persistent key-value store for high-throughput
/// read-mostly workloads populated from offline batch datasets.
#[derive(Parser, Debug)]
#[command(name = "laser", version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "laser.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Start the node (default if no subcommand is given).
    Run,

    /// Load the configuration file and report whether it parses.
    Configcheck,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.clone().unwrap_or(Commands::Run) {
        Commands::Configcheck => config_check(&cli.config),
        Commands::Run => run(&cli.config).await,
    }
}

fn config_check(path: &PathBuf) {
    match Config::load(path) {
        Ok(_) => info!(?path, "configuration is valid"),
        Err(err) => {
            error!(?path, %err, "configuration is invalid");
            std::process::exit(1);
        }
    }
}

async fn run(path: &PathBuf) {
    let config = Config::load(path).unwrap_or_else(|err| {
        error!(?path, %err, "failed to load configuration, using defaults");
        Config::default()
    });
    let general = &config.general;

    let layout = Arc::new(Layout::new(
        general.data_dir.clone(),
        general.laser_hdfs_data_dir.clone(),
        &general.group_name,
        general.node_id,
    ));

    let partitions = Arc::new(PartitionTable::new(layout));
    partitions.set_finish_wait(general.finish_rocksdb_processing_operation_time());

    let store = config_store::store();
    let control_plane_addr = SocketAddr::from(([0, 0, 0, 0], general.http_port));
    let reconfigure_interval = general.rocksdb_options_check_interval();

    let control_plane_partitions = partitions.clone();
    let control_plane_task = tokio::spawn(async move {
        if let Err(err) = control_plane::serve(control_plane_addr, control_plane_partitions).await {
            error!(%err, "control plane server exited");
        }
    });

    let reconfigure_partitions = partitions.clone();
    let reconfigure_task = tokio::spawn(reconfigure::run(
        reconfigure_partitions,
        store,
        reconfigure_interval,
    ));

    partitions.set_service_server(control_plane_addr);
    info!(%control_plane_addr, "laser node started");

    tokio::select! {
        _ = ctrl_c() => {
            info!("shutdown signal received");
        }
        _ = control_plane_task => {
            error!("control plane task ended unexpectedly");
        }
        _ = reconfigure_task => {
            error!("reconfigure task ended unexpectedly");
        }
    }
}
