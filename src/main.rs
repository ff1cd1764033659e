//! CrossControl CLI
//!
//! Headless access to the action store, device registry, listen mode and
//! serial port discovery.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use crosscontrol_core::cli::{print_exit_codes, CliResult, ExitCodes};
use crosscontrol_core::core::device::ConflictPolicy;
use crosscontrol_core::core::transport::{list_ports, SendReport};
use crosscontrol_core::utils::logging;
use crosscontrol_core::{
    AppConfig, Device, Error, Gateway, ImportOptions, InterchangeFormat, MonitorEvent,
    ProtocolKind, SendTarget,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

/// CLI output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format for scripting
    Json,
}

/// CrossControl CLI
#[derive(Parser, Debug)]
#[command(
    name = "crosscontrol",
    version,
    about = "Device connectivity toolkit: actions, devices, listeners and ports",
    long_about = None
)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "CROSSCONTROL_CONFIG")]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, env = "CROSSCONTROL_DB")]
    db: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage saved actions
    Action {
        #[command(subcommand)]
        action: ActionCommand,
    },

    /// Manage devices
    Device {
        #[command(subcommand)]
        action: DeviceCommand,
    },

    /// Listen on a TCP or UDP port and print traffic
    Listen {
        /// Protocol (tcp, udp)
        #[arg(short, long, value_parser = parse_kind, default_value = "tcp")]
        kind: ProtocolKind,

        /// Port number
        #[arg(short, long)]
        port: u16,

        /// Print payloads as hex
        #[arg(long)]
        hex: bool,

        /// Send every received chunk back to its sender
        #[arg(long)]
        echo: bool,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },

    /// List available serial ports
    Ports,

    /// Print the exit code table
    ExitCodes,
}

#[derive(Subcommand, Debug)]
enum ActionCommand {
    /// List actions
    List {
        /// Only this protocol
        #[arg(short, long, value_parser = parse_kind)]
        kind: Option<ProtocolKind>,
    },
    /// Show one action
    Show { id: String },
    /// Save a new action
    Save {
        /// Action name
        name: String,
        /// Protocol
        #[arg(short, long, value_parser = parse_kind)]
        kind: ProtocolKind,
        /// JSON payload, or @file
        #[arg(short, long)]
        payload: String,
    },
    /// Rename an action
    Rename { id: String, name: String },
    /// Replace an action's payload
    Update {
        id: String,
        /// JSON payload, or @file
        #[arg(short, long)]
        payload: String,
    },
    /// Delete an action
    Delete { id: String },
    /// Export an action to a JSON file
    Export { id: String, file: PathBuf },
    /// Import an action from a JSON file
    Import {
        file: PathBuf,
        /// Protocol for bare legacy payloads
        #[arg(short, long, value_parser = parse_kind)]
        kind: Option<ProtocolKind>,
    },
    /// Execute an action and print the reply
    Run {
        id: String,
        /// Print the reply as hex
        #[arg(long)]
        hex: bool,
    },
    /// Upgrade stored payloads to the current schema
    Migrate,
}

#[derive(Subcommand, Debug)]
enum DeviceCommand {
    /// List devices
    List,
    /// Show one device
    Show { id: String },
    /// Add a device
    Add {
        /// Unique id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
        /// Display name
        #[arg(long)]
        name: String,
        /// Protocol
        #[arg(short, long, value_parser = parse_kind)]
        kind: ProtocolKind,
        /// Endpoint address
        #[arg(short, long, default_value = "")]
        endpoint: String,
        /// Owner
        #[arg(long, default_value = "")]
        owner: String,
        /// Group
        #[arg(long, default_value = "")]
        group: String,
        /// Metadata JSON object
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Remove a device and close its sessions
    Remove { id: String },
    /// Import devices from a file
    Import {
        file: PathBuf,
        /// File format (guessed from the extension when omitted)
        #[arg(long, value_parser = parse_format)]
        file_format: Option<InterchangeFormat>,
        /// Duplicate id handling (regenerate, skip, overwrite)
        #[arg(long, value_parser = parse_policy, default_value = "regenerate")]
        on_conflict: ConflictPolicy,
        /// Open a session for every imported device
        #[arg(long)]
        auto_connect: bool,
    },
    /// Export all devices to a file
    Export {
        file: PathBuf,
        /// File format (guessed from the extension when omitted)
        #[arg(long, value_parser = parse_format)]
        file_format: Option<InterchangeFormat>,
    },
    /// Test reachability of one device, or all when no id is given
    Test { id: Option<String> },
    /// Send data to a device
    Send {
        id: String,
        /// Data to send
        data: String,
        /// Data is hex encoded
        #[arg(long)]
        hex: bool,
    },
}

fn parse_kind(s: &str) -> Result<ProtocolKind, String> {
    s.parse::<ProtocolKind>().map_err(|e| e.message)
}

fn parse_format(s: &str) -> Result<InterchangeFormat, String> {
    s.parse::<InterchangeFormat>().map_err(|e| e.detail())
}

fn parse_policy(s: &str) -> Result<ConflictPolicy, String> {
    s.parse::<ConflictPolicy>().map_err(|e| e.detail())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };
    let _log_guard = logging::init(&config.logging, cli.verbose);
    tracing::debug!("Starting CrossControl v{}", env!("CARGO_PKG_VERSION"));

    let result = match run(&cli, &config).await {
        Ok(result) => result,
        Err(err) => match err.downcast_ref::<Error>() {
            Some(e) => CliResult::from(e),
            None => CliResult::error(ExitCodes::ERROR, format!("{err:#}")),
        },
    };

    match (&result, result.message()) {
        (CliResult::Error(..), Some(msg)) => eprintln!("error: {msg}"),
        (CliResult::Success(_), Some(msg)) if !cli.quiet => eprintln!("{msg}"),
        _ => {}
    }
    result.to_exit_code()
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if let Some(db) = &cli.db {
        config.storage.db_path = Some(db.clone());
    }
    Ok(config)
}

async fn run(cli: &Cli, config: &AppConfig) -> anyhow::Result<CliResult> {
    match &cli.command {
        Commands::Ports => list_serial_ports(cli),
        Commands::ExitCodes => {
            print_exit_codes();
            Ok(CliResult::success())
        }
        Commands::Action { action } => {
            let gateway = open_gateway(config)?;
            handle_action(cli, &gateway, action).await
        }
        Commands::Device { action } => {
            let gateway = open_gateway(config)?;
            let result = handle_device(cli, &gateway, action).await;
            gateway.shutdown().await;
            result
        }
        Commands::Listen {
            kind,
            port,
            hex,
            echo,
            duration,
        } => {
            let gateway = open_gateway(config)?;
            listen(cli, &gateway, *kind, *port, *hex, *echo, *duration).await
        }
    }
}

fn open_gateway(config: &AppConfig) -> anyhow::Result<Gateway> {
    if config.storage.db_path.is_none() {
        crosscontrol_core::config::init_directories()
            .context("failed to create application directories")?;
    }
    Ok(Gateway::from_config(config)?)
}

fn read_payload(arg: &str) -> anyhow::Result<serde_json::Value> {
    let text = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("cannot read {path}"))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&text).context("payload is not valid JSON")
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn resolve_format(path: &Path, explicit: Option<InterchangeFormat>) -> anyhow::Result<InterchangeFormat> {
    explicit
        .or_else(|| InterchangeFormat::from_path(path))
        .with_context(|| format!("cannot tell the format of {}, pass --file-format", path.display()))
}

fn render_bytes(data: &[u8], hex: bool) -> String {
    if hex {
        hex::encode(data)
    } else {
        String::from_utf8_lossy(data).into_owned()
    }
}

async fn handle_action(
    cli: &Cli,
    gateway: &Gateway,
    command: &ActionCommand,
) -> anyhow::Result<CliResult> {
    let actions = gateway.actions();
    match command {
        ActionCommand::List { kind } => {
            let list = actions.list(*kind)?;
            if cli.format == OutputFormat::Json {
                print_json(&list)?;
            } else {
                for a in &list {
                    println!(
                        "{:<36}  {:<6}  v{}  {}",
                        a.id,
                        a.protocol_kind.as_str(),
                        a.schema_version,
                        a.name
                    );
                }
            }
        }
        ActionCommand::Show { id } => {
            let action = actions.get(id)?;
            if cli.format == OutputFormat::Json {
                print_json(&action)?;
            } else {
                println!("{} ({}, schema v{})", action.name, action.protocol_kind, action.schema_version);
                println!("{}", serde_json::to_string_pretty(&action.payload)?);
            }
        }
        ActionCommand::Save {
            name,
            kind,
            payload,
        } => {
            let id = actions.save(name, *kind, &read_payload(payload)?)?;
            println!("{id}");
        }
        ActionCommand::Rename { id, name } => {
            actions.rename(id, name)?;
            return Ok(CliResult::success_with_message(format!("renamed {id}")));
        }
        ActionCommand::Update { id, payload } => {
            actions.update_payload(id, &read_payload(payload)?)?;
            return Ok(CliResult::success_with_message(format!("updated {id}")));
        }
        ActionCommand::Delete { id } => {
            actions.delete(id)?;
            return Ok(CliResult::success_with_message(format!("deleted {id}")));
        }
        ActionCommand::Export { id, file } => {
            actions.export(id, file)?;
            return Ok(CliResult::success_with_message(format!(
                "exported {id} to {}",
                file.display()
            )));
        }
        ActionCommand::Import { file, kind } => {
            let id = actions.import(file, *kind)?;
            println!("{id}");
        }
        ActionCommand::Run { id, hex } => {
            let report = gateway.execute_action(id).await?;
            print_send_report(cli, &report, *hex)?;
        }
        ActionCommand::Migrate => {
            let report = actions.migrate()?;
            if cli.format == OutputFormat::Json {
                print_json(&report)?;
            } else {
                println!("migrated: {}, not migrated: {}", report.migrated, report.not_migrated);
                for (id, reason) in &report.failures {
                    println!("  {id}: {reason}");
                }
            }
            if report.not_migrated > 0 {
                return Ok(CliResult::error(
                    ExitCodes::PARTIAL_FAILURE,
                    format!("{} action(s) left at their old version", report.not_migrated),
                ));
            }
        }
    }
    Ok(CliResult::success())
}

fn print_send_report(cli: &Cli, report: &SendReport, hex: bool) -> anyhow::Result<()> {
    let reply = report.reply.as_deref().map(|r| render_bytes(r, hex));
    if cli.format == OutputFormat::Json {
        print_json(&serde_json::json!({
            "written": report.written,
            "status": report.status,
            "reply": reply,
        }))?;
    } else {
        if let Some(status) = report.status {
            println!("status: {status}");
        }
        if let Some(reply) = reply {
            println!("{reply}");
        }
    }
    Ok(())
}

async fn handle_device(
    cli: &Cli,
    gateway: &Gateway,
    command: &DeviceCommand,
) -> anyhow::Result<CliResult> {
    match command {
        DeviceCommand::List => {
            let devices = gateway.list_devices()?;
            if cli.format == OutputFormat::Json {
                print_json(&devices)?;
            } else {
                for d in &devices {
                    println!(
                        "{:<20}  {:<6}  {:<9}  {:<28}  {}",
                        d.id,
                        d.protocol_kind.as_str(),
                        d.reachability.as_str(),
                        d.endpoint,
                        d.name
                    );
                }
            }
        }
        DeviceCommand::Show { id } => print_json(&gateway.get_device(id)?)?,
        DeviceCommand::Add {
            id,
            name,
            kind,
            endpoint,
            owner,
            group,
            metadata,
        } => {
            let id = id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let mut device = Device::new(id, name.clone(), *kind)
                .endpoint(endpoint.clone())
                .owned_by(owner.clone(), group.clone());
            if let Some(metadata) = metadata {
                device.metadata_json = metadata.clone();
            }
            gateway.devices().add(&device)?;
            println!("{}", device.id);
        }
        DeviceCommand::Remove { id } => {
            gateway.remove_device(id).await?;
            return Ok(CliResult::success_with_message(format!("removed {id}")));
        }
        DeviceCommand::Import {
            file,
            file_format,
            on_conflict,
            auto_connect,
        } => {
            let format = resolve_format(file, *file_format)?;
            let options = ImportOptions {
                auto_connect: *auto_connect,
                on_conflict: *on_conflict,
            };
            let report = gateway.import_devices(file, format, &options).await?;
            if cli.format == OutputFormat::Json {
                print_json(&report)?;
            } else {
                println!(
                    "imported: {}, skipped: {}, errors: {}",
                    report.imported_count,
                    report.skipped_count,
                    report.per_record_errors.len()
                );
                for e in report.per_record_errors.iter().chain(&report.connect_errors) {
                    println!("  record {}: {}", e.record, e.message);
                }
            }
            if !report.per_record_errors.is_empty() || !report.connect_errors.is_empty() {
                return Ok(CliResult::error(
                    ExitCodes::PARTIAL_FAILURE,
                    "some records were not imported or connected",
                ));
            }
        }
        DeviceCommand::Export { file, file_format } => {
            let format = resolve_format(file, *file_format)?;
            let count = gateway.devices().export(file, format)?;
            return Ok(CliResult::success_with_message(format!(
                "exported {count} device(s) to {}",
                file.display()
            )));
        }
        DeviceCommand::Test { id: Some(id) } => {
            let result = gateway.test_device(id).await?;
            if cli.format == OutputFormat::Json {
                print_json(&result)?;
            } else {
                println!("{}: {}", result.device_id, result.summary());
            }
            if !result.is_success() {
                return Ok(CliResult::error(ExitCodes::CONNECTION_FAILED, result.summary()));
            }
        }
        DeviceCommand::Test { id: None } => {
            let summary = gateway.test_all_devices().await?;
            if cli.format == OutputFormat::Json {
                print_json(&summary)?;
            } else {
                for r in &summary.results {
                    println!("{:<20}  {}", r.device_id, r.summary());
                }
                println!("{} ok, {} failed, {} total", summary.success, summary.fail, summary.total);
            }
            if summary.fail > 0 {
                return Ok(CliResult::error(
                    ExitCodes::PARTIAL_FAILURE,
                    format!("{} device(s) unreachable", summary.fail),
                ));
            }
        }
        DeviceCommand::Send { id, data, hex } => {
            let bytes = if *hex {
                hex::decode(data.replace(' ', "")).context("invalid hex data")?
            } else {
                data.as_bytes().to_vec()
            };
            let written = gateway.send_to_device(id, &bytes).await?;
            if !cli.quiet {
                eprintln!("sent {written} byte(s)");
            }
        }
    }
    Ok(CliResult::success())
}

async fn listen(
    cli: &Cli,
    gateway: &Gateway,
    kind: ProtocolKind,
    port: u16,
    hex: bool,
    echo: bool,
    duration: Option<u64>,
) -> anyhow::Result<CliResult> {
    let monitor = gateway.monitor();
    let mut events = monitor.subscribe();
    let listener = monitor.start_listen(kind, port).await?;
    if !cli.quiet {
        let local = monitor
            .session(listener)
            .and_then(|info| info.local)
            .unwrap_or_default();
        eprintln!("Listening on {kind} {local}. Press Ctrl+C to stop.");
    }

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            () = &mut deadline => break,
            event = events.recv() => match event {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event stream lagged");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        };

        print_event(cli, &event, hex)?;
        if let (true, MonitorEvent::Data { session, bytes, .. }) = (echo, &event) {
            if let Err(e) = monitor.send_to(&SendTarget::Session(*session), bytes).await {
                tracing::warn!(%session, error = %e, "echo failed");
            }
        }
    }

    monitor.shutdown().await;
    Ok(CliResult::success())
}

fn print_event(cli: &Cli, event: &MonitorEvent, hex: bool) -> anyhow::Result<()> {
    let timestamp = chrono::Utc::now().to_rfc3339();
    match (cli.format, event) {
        (OutputFormat::Json, MonitorEvent::Data { session, peer, bytes }) => print_json(&serde_json::json!({
            "time": timestamp,
            "session": session,
            "peer": peer,
            "data": render_bytes(bytes, hex),
        }))?,
        (OutputFormat::Json, MonitorEvent::StateChanged { session, state }) => print_json(&serde_json::json!({
            "time": timestamp,
            "session": session,
            "state": state,
        }))?,
        (OutputFormat::Json, MonitorEvent::Error { session, message }) => print_json(&serde_json::json!({
            "time": timestamp,
            "session": session,
            "error": message,
        }))?,
        (OutputFormat::Text, MonitorEvent::Data { peer, bytes, .. }) => {
            println!("[{timestamp}] {}: {}", peer.as_deref().unwrap_or("?"), render_bytes(bytes, hex));
        }
        (OutputFormat::Text, MonitorEvent::StateChanged { session, state }) => {
            if !cli.quiet {
                eprintln!("[{timestamp}] session {session} {state}");
            }
        }
        (OutputFormat::Text, MonitorEvent::Error { message, .. }) => {
            eprintln!("[{timestamp}] error: {message}");
        }
    }
    Ok(())
}

fn list_serial_ports(cli: &Cli) -> anyhow::Result<CliResult> {
    let ports = list_ports().map_err(Error::from)?;

    if cli.format == OutputFormat::Json {
        print_json(&ports)?;
    } else if ports.is_empty() {
        if !cli.quiet {
            println!("No serial ports found.");
        }
    } else {
        for port in &ports {
            println!("{:<24} {}", port.name, port.description);
        }
    }
    Ok(CliResult::success())
}
