use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ecocity::{
    city::CityState,
    config::{ConfigLoader, GameConfig},
    replay::Replay,
    serial::SerialInputDecoder,
    snapshot::{CitySnapshot, SnapshotWriter},
    web,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "ecocity grid game core")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, global = true, default_value = "configs/ecocity.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP/SSE control server, optionally reading a serial board
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// Serial source override: a tty/FIFO path or tcp://host:port
        #[arg(long)]
        serial: Option<String>,
    },
    /// Play a recorded serial capture into a fresh city
    Replay {
        /// Capture file of "<cell>,<ohms>" lines
        capture: PathBuf,

        /// End a turn after every N records (0 never ends turns)
        #[arg(long, default_value_t = 0)]
        end_turn_every: u64,

        /// Directory for snapshots (uses the config's snapshot dir when omitted)
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,
    },
}

fn load_config(path: &Path) -> Result<GameConfig> {
    if path.exists() {
        ConfigLoader::new(".").load(path)
    } else {
        Ok(GameConfig::default())
    }
}

fn init_tracing(level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;
    init_tracing(&config.logging.level);

    match cli.command {
        Command::Serve { host, port, serial } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if serial.is_some() {
                config.serial.source = serial;
            }
            web::run(config).await
        }
        Command::Replay {
            capture,
            end_turn_every,
            snapshot_dir,
        } => {
            let snapshot_dir = snapshot_dir.unwrap_or(config.snapshot.output_dir);
            let mut city = CityState::new();
            let mut replay =
                Replay::new(SerialInputDecoder::with_max_line_bytes(config.serial.max_line_bytes))
                    .with_end_turn_every(end_turn_every)
                    .with_snapshots(SnapshotWriter::new(
                        snapshot_dir,
                        config.snapshot.interval_turns,
                    ));
            let report = replay.run_file(&mut city, &capture)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            println!(
                "{}",
                serde_json::to_string_pretty(&CitySnapshot::capture(&city))?
            );
            Ok(())
        }
    }
}
