// src/main.rs
//
// portbridge command line: list / scan / extract / run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use portbridge::logging::init_tracing;
use portbridge::scan::DEFAULT_SCAN_WINDOW;
use portbridge::settings::{load_or_default, WatchdogSettings};
use portbridge::{
    list_serial_ports, lowest_numbered_port, scan_ports, write_playback_file, BridgeController, BridgeError,
    BridgeMode, FrameLog, LineSettings, Result, WatchdogPolicy,
};

#[derive(Parser)]
#[command(name = "portbridge", version, about = "Serial-port bridge and frame logger")]
struct Cli {
    /// Debug-level diagnostics (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports
    List {
        #[arg(long)]
        json: bool,
    },
    /// Listen on every port and report which ones produce data
    Scan {
        #[arg(long, default_value_t = 9600)]
        baud: u32,
        #[arg(long, default_value_t = DEFAULT_SCAN_WINDOW.as_secs())]
        window_secs: u64,
        #[arg(long)]
        json: bool,
    },
    /// Build a playback source from the RX records of frame logs
    Extract {
        #[arg(required = true)]
        logs: Vec<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Run a bridge session, sending hex lines typed on stdin
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Settings file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    port: Option<String>,
    #[arg(long)]
    baud: Option<u32>,
    #[arg(long)]
    frame_size: Option<usize>,
    #[arg(long, value_parser = parse_mode)]
    mode: Option<BridgeMode>,
    #[arg(long)]
    forward_port: Option<String>,
    #[arg(long, value_parser = parse_policy, requires = "watchdog_secs")]
    watchdog_policy: Option<WatchdogPolicy>,
    #[arg(long)]
    watchdog_secs: Option<u64>,
    #[arg(long)]
    playback_file: Option<PathBuf>,
    #[arg(long)]
    replay_interval_ms: Option<u64>,
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn parse_mode(s: &str) -> std::result::Result<BridgeMode, String> {
    match s.replace('-', "_").as_str() {
        "receive_only" | "receive" => Ok(BridgeMode::ReceiveOnly),
        "forward" => Ok(BridgeMode::Forward),
        "playback" => Ok(BridgeMode::Playback),
        other => Err(format!("unknown mode '{}' (receive_only, forward, playback)", other)),
    }
}

fn parse_policy(s: &str) -> std::result::Result<WatchdogPolicy, String> {
    match s.replace('-', "_").as_str() {
        "from_open" => Ok(WatchdogPolicy::FromOpen),
        "from_first_frame" => Ok(WatchdogPolicy::FromFirstFrame),
        other => Err(format!("unknown watchdog policy '{}' (from_open, from_first_frame)", other)),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::List { json } => list(json),
        Command::Scan { baud, window_secs, json } => scan(baud, window_secs, json).await,
        Command::Extract { logs, out } => extract(&logs, &out),
        Command::Run(args) => run(args).await,
    };

    // Exit explicitly: a pending stdin read would otherwise hold up runtime shutdown
    let code = match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{}", e);
            1
        }
    };
    std::process::exit(code);
}

fn list(json: bool) -> Result<()> {
    let ports = list_serial_ports()?;
    if json {
        println!("{}", to_json(&ports)?);
        return Ok(());
    }
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for p in &ports {
        let detail = [p.manufacturer.as_deref(), p.product.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        println!("{:<24} {:<10} {}", p.port_name, p.port_type, detail);
    }
    Ok(())
}

async fn scan(baud: u32, window_secs: u64, json: bool) -> Result<()> {
    let ports: Vec<String> = list_serial_ports()?.into_iter().map(|p| p.port_name).collect();
    let line = LineSettings::with_baud(baud);
    let window = Duration::from_secs(window_secs);

    let results = tokio::task::spawn_blocking(move || scan_ports(&ports, &line, window))
        .await
        .map_err(|e| BridgeError::config(format!("scan task failed: {}", e)))?;

    if json {
        println!("{}", to_json(&results)?);
        return Ok(());
    }
    for r in &results {
        match (&r.first_bytes, &r.error) {
            (Some(bytes), _) => println!("{:<24} active   {}", r.port, bytes),
            (None, Some(e)) => println!("{:<24} error    {}", r.port, e),
            (None, None) => println!("{:<24} silent", r.port),
        }
    }
    Ok(())
}

fn extract(logs: &[PathBuf], out: &std::path::Path) -> Result<()> {
    let count = write_playback_file(logs, out)?;
    println!("{} records written to {}", count, out.display());
    Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
    let mut settings = load_or_default(args.config.as_deref())?;

    if let Some(port) = args.port {
        settings.port = Some(port);
    }
    if let Some(baud) = args.baud {
        settings.baud_rate = baud;
    }
    if let Some(frame_size) = args.frame_size {
        settings.frame_size = frame_size;
    }
    if let Some(mode) = args.mode {
        settings.mode = mode;
    }
    if let Some(forward_port) = args.forward_port {
        settings.forward_port = Some(forward_port);
    }
    if let Some(timeout_secs) = args.watchdog_secs {
        let policy = args
            .watchdog_policy
            .or(settings.watchdog.as_ref().map(|w| w.policy))
            .unwrap_or(WatchdogPolicy::FromFirstFrame);
        settings.watchdog = Some(WatchdogSettings { policy, timeout_secs });
    }
    if let Some(file) = args.playback_file {
        settings.playback_file = Some(file);
    }
    if let Some(ms) = args.replay_interval_ms {
        settings.replay_interval_ms = ms;
    }
    if let Some(dir) = args.log_dir {
        settings.log_dir = dir;
    }

    if settings.port.is_none() {
        let names: Vec<String> = list_serial_ports()?.into_iter().map(|p| p.port_name).collect();
        let port = lowest_numbered_port(&names)
            .ok_or_else(|| BridgeError::config("no --port given and no serial ports found"))?;
        info!("[bridge] No port given, using {}", port);
        settings.port = Some(port);
    }

    let config = settings.to_config()?;
    let frame_log = Arc::new(FrameLog::create_in_dir(&settings.log_dir)?);
    let mut bridge = BridgeController::new(config, frame_log)?;
    bridge.start().await?;

    println!("Type hex bytes to send (e.g. 'A9 9A 01 0D 0A'), 'exit' or 'q' to quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("stdin: {}", e);
                        break;
                    }
                };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("q") {
                    break;
                }
                // The write blocks on the port; let the runtime move other tasks off this worker
                match tokio::task::block_in_place(|| bridge.send_hex(input)) {
                    Ok(bytes) => println!("sent {} bytes", bytes.len()),
                    Err(e) => eprintln!("{}", e),
                }
            }
            _ = bridge.closed() => break,
        }
    }

    bridge.stop().await;
    if let Some(reason) = bridge.stop_reason() {
        info!("[bridge] Session ended: {}", reason);
    }
    let stats = bridge.stats();
    println!("{}", to_json(&stats)?);
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| BridgeError::config(format!("JSON encoding failed: {}", e)))
}
