//! Binary entrypoint for the GCodeBridge server.
//!
//! Loads the configuration, connects to the controller (or the built-in
//! simulator), and serves the HTTP and WebSocket API until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use gcodebridge::{
    default_config_path, init_logging, list_ports, serve, shutdown_signal, verbosity_level,
    AppState, Config, ConnectOptions, Controller, EventBus, LinkOpener, LogFormat, SerialBridge,
    SerialPortOpener, SimulatorOpener, BUILD_DATE, VERSION,
};

#[derive(Parser, Debug)]
#[command(name = "gcodebridge")]
#[command(about = "Forward HTTP G-code commands to a GRBL controller over serial")]
#[command(version)]
struct Cli {
    /// Configuration file (.toml or .json); defaults to the platform config directory
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Serial port, or "auto" to detect it
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Address to listen on, e.g. 0.0.0.0:5000
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Use the built-in GRBL simulator instead of a serial port
    #[arg(long)]
    simulate: bool,

    /// Print the detected serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Log output format (pretty, json, compact)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Do not retry the connection while disconnected
    #[arg(long)]
    no_reconnect: bool,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    write_config: bool,

    /// Verbose logging (-v, -vv for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Ok(default_config_path()?),
        }
    }

    /// Apply command-line overrides on top of the file configuration
    fn apply(&self, config: &mut Config) {
        if let Some(port) = &self.port {
            config.connection.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.connection.baud_rate = baud;
        }
        if let Some(listen) = &self.listen {
            config.server.listen = listen.clone();
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(level) = verbosity_level(self.verbose) {
            config.logging.level = level.to_string();
        }
        if self.no_reconnect {
            config.connection.auto_reconnect = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config_path()?;
    let mut config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    cli.apply(&mut config);
    config.validate()?;

    if cli.write_config {
        config.save_to_file(&config_path)?;
        println!("Configuration written to {}", config_path.display());
        return Ok(());
    }

    if cli.list_ports {
        let ports = list_ports()?;
        if ports.is_empty() {
            println!("No serial ports found");
        }
        for port in ports {
            match port.known_board() {
                Some(board) => println!("{}\t{} ({})", port.port_name, port.description, board),
                None => println!("{}\t{}", port.port_name, port.description),
            }
        }
        return Ok(());
    }

    init_logging(&config.logging)?;
    tracing::info!("GCodeBridge v{} (built {})", VERSION, BUILD_DATE);

    let opener: Arc<dyn LinkOpener> = if cli.simulate {
        tracing::info!("Using the built-in GRBL simulator");
        Arc::new(SimulatorOpener)
    } else {
        Arc::new(SerialPortOpener)
    };

    let bridge = Arc::new(SerialBridge::new(
        config.bridge_config(),
        config.connection_params(),
        opener,
        Arc::new(EventBus::new()),
    ));

    if let Err(e) = bridge.connect(ConnectOptions::default()).await {
        tracing::warn!("Starting without a controller: {}", e);
    }

    let supervisor = config
        .reconnect_interval()
        .map(|interval| bridge.spawn_supervisor(interval));

    let listen = config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {}", listen))?;

    serve(listener, AppState::new(bridge.clone()), shutdown_signal()).await?;

    if let Some(supervisor) = supervisor {
        supervisor.abort();
    }
    bridge.shutdown().await;

    Ok(())
}
