//! emWave Agent CLI
//!
//! Bridges the emWave sensor application to a host process over stdio.

use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::thread;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use emwave_agent::{
    config::Config,
    control::write_event,
    decode_frame,
    diagnostics::create_shared_log_with_persistence,
    AgentEvent, ConnectionManager, ConnectionState, ConnectionStatus, ControlCommand,
    EmWaveSupervisor, EventPrinter, SensorProcess, SessionHandle, VERSION,
};

#[derive(Parser)]
#[command(name = "emwave-agent")]
#[command(version = VERSION)]
#[command(about = "Heart-rate telemetry bridge for paced-breathing sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch emWave, connect, and stream events as JSON lines on stdout
    Run {
        /// Sensor host (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Sensor port (overrides config)
        #[arg(long)]
        port: Option<u16>,

        /// Connect to an already running emWave instead of launching it
        #[arg(long)]
        no_launch: bool,
    },

    /// Decode a single protocol frame and print the result
    Decode {
        /// Frame text, e.g. '<IBI> 1139 </IBI>'
        frame: String,
    },

    /// Show cumulative diagnostics from previous runs
    Status,

    /// Show configuration
    Config,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            host,
            port,
            no_launch,
        } => {
            cmd_run(host, port, no_launch);
        }
        Commands::Decode { frame } => {
            cmd_decode(&frame);
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Config => {
            cmd_config();
        }
    }
}

/// Log to stderr so stdout stays a clean event stream.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_run(host: Option<String>, port: Option<u16>, no_launch: bool) {
    let mut config = Config::load().unwrap_or_else(|e| {
        warn!(error = %e, "could not load config; using defaults");
        Config::default()
    });
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Err(e) = config.ensure_directories() {
        warn!(error = %e, "could not create data directory");
    }

    info!(version = VERSION, address = %config.address(), "starting emWave agent");

    let diagnostics = create_shared_log_with_persistence(config.data_path.join("diagnostics.json"));

    // Launch the vendor app first; an unsupported platform ends the session here
    let mut launched = None;
    if !no_launch {
        let mut supervisor = match EmWaveSupervisor::new(&config) {
            Ok(supervisor) => supervisor,
            Err(e) => {
                eprintln!("Error: {e}");
                print_event(&AgentEvent::Status(ConnectionStatus::ConnectionFailure));
                std::process::exit(1);
            }
        };
        match supervisor.start() {
            Ok(process) => {
                info!(pid = process.pid(), path = ?supervisor.app_path(), "started emWave");
                if let Err(e) = supervisor.hide(&process) {
                    warn!(error = %e, "could not hide emWave window");
                }
                launched = Some((supervisor, process));
            }
            Err(e) => {
                eprintln!("Error starting emWave: {e}");
                print_event(&AgentEvent::Status(ConnectionStatus::ConnectionFailure));
                std::process::exit(1);
            }
        }
    }

    let (manager, handle, events) = ConnectionManager::new(&config, diagnostics.clone());

    let ctrlc_handle = handle.clone();
    if let Err(e) = ctrlc::set_handler(move || ctrlc_handle.shutdown()) {
        warn!(error = %e, "could not install Ctrl+C handler");
    }

    let printer = EventPrinter::spawn(events, std::io::stdout());

    let control_handle = handle.clone();
    thread::spawn(move || read_control_lines(control_handle));

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error starting async runtime: {e}");
            std::process::exit(1);
        }
    };
    let final_state = runtime.block_on(manager.run());
    info!(state = ?final_state, "sensor link closed");

    handle.shutdown();
    // Boundary events (final status, last coherence) must reach the host before exit
    if let Err(e) = printer.finish() {
        warn!(error = %e, "could not deliver events to host");
    }
    if let Some((mut supervisor, process)) = launched {
        let pid = process.pid();
        if !supervisor.terminate(process) {
            warn!(pid, "could not terminate emWave");
        }
    }

    if let Err(e) = diagnostics.save() {
        warn!(error = %e, "could not save diagnostics");
    }
    eprintln!();
    eprintln!("{}", diagnostics.summary());

    if final_state == ConnectionState::PermanentFailure {
        std::process::exit(2);
    }
}

/// Apply control lines from stdin until `quit` or end of input.
fn read_control_lines(handle: SessionHandle) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "could not read control input");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<ControlCommand>() {
            Ok(ControlCommand::Quit) => break,
            Ok(command) => {
                if let Err(e) = command.apply(&handle) {
                    eprintln!("Error: {e}");
                }
            }
            Err(e) => eprintln!("Error: {e}"),
        }
    }

    // Host closed its end; tear the session down
    handle.shutdown();
}

fn print_event(event: &AgentEvent) {
    if let Err(e) = write_event(&mut std::io::stdout(), event) {
        warn!(error = %e, "could not deliver event to host");
    }
}

fn cmd_decode(frame: &str) {
    let event = decode_frame(frame);
    println!(
        "{}",
        serde_json::to_string_pretty(&event).unwrap_or_else(|_| "Error".to_string())
    );
}

fn cmd_status() {
    let config = Config::load().unwrap_or_default();

    println!("emWave Agent Status");
    println!("===================");
    println!();
    println!("Sensor address: {}", config.address());
    println!(
        "Emits sensor error above {} artifacts in {} samples",
        config.artifact_limit, config.artifact_window
    );
    println!();

    let stats_path = config.data_path.join("diagnostics.json");
    if stats_path.exists() {
        if let Ok(content) = std::fs::read_to_string(&stats_path) {
            if let Ok(stats) = serde_json::from_str::<serde_json::Value>(&content) {
                println!("Cumulative Diagnostics:");
                for key in [
                    "frames_decoded",
                    "samples_forwarded",
                    "samples_dropped",
                    "artifact_samples",
                    "sensor_errors",
                    "regimes_finalized",
                    "regimes_discarded",
                ] {
                    if let Some(value) = stats.get(key) {
                        println!("  {}: {value}", key.replace('_', " "));
                    }
                }
            }
        }
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_config() {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}
