// rfd-setup -- configure RFD900 radio modems from a YAML network description.
//
// Each modem named on the command line is escaped into command mode,
// identified, given the common settings plus its own overrides, persisted
// and rebooted. All traffic is appended to a transcript file.
//
// Usage:
//   rfd-setup /dev/ttyUSB0
//   rfd-setup --config network.yaml --baudrate 115200 /dev/ttyUSB0 /dev/ttyUSB1
//   rfd-setup --parallel --deadline 60 /dev/ttyUSB0 /dev/ttyUSB1 /dev/ttyUSB2
//   rfd-setup --config network.yaml --dry-run --variant async
//
// Exit status: 0 when every modem was configured, 1 when any was not,
// 2 for usage or configuration file errors.

mod config_file;
mod transcript;

use std::fmt::Write as _;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rfdlib_at::{
    plan_commands, ConfigurationSet, DeviceId, RadioVariant, Session, SessionConfig,
    SessionOutcome, SessionReport,
};
use rfdlib_core::Transport;
use rfdlib_transport::serial::DEFAULT_BAUD_RATE;
use rfdlib_transport::{FlowControl, SerialConfig, SerialTransport};

use crate::config_file::NetworkFile;
use crate::transcript::TranscriptLog;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Configure RFD900 radio modems over their serial AT command interface.
#[derive(Parser, Debug)]
#[command(name = "rfd-setup", version, about)]
struct Cli {
    /// Serial ports of the modems to configure (e.g. /dev/ttyUSB0, COM3).
    #[arg(required_unless_present = "dry_run")]
    devices: Vec<String>,

    /// Serial baud rate.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baudrate: u32,

    /// Network description file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Enable RTS/CTS hardware flow control.
    #[arg(long, conflicts_with = "xonxoff")]
    rtscts: bool,

    /// Assert DTR after opening the port (DSR/DTR adapters).
    #[arg(long)]
    dsrdtr: bool,

    /// Enable XON/XOFF software flow control.
    #[arg(long)]
    xonxoff: bool,

    /// Transcript file. Every byte exchanged with each modem is appended.
    #[arg(long, default_value = "rfd900.log")]
    log: PathBuf,

    /// Do not write a transcript.
    #[arg(long)]
    no_log: bool,

    /// Give up on a modem after this many seconds.
    #[arg(long, value_name = "SECS")]
    deadline: Option<u64>,

    /// Configure all modems concurrently instead of one after another.
    #[arg(long)]
    parallel: bool,

    /// Skip the register listing after the settings are written.
    #[arg(long)]
    no_status: bool,

    /// Print the commands each device section would receive, then exit.
    /// No serial port is opened.
    #[arg(long)]
    dry_run: bool,

    /// Firmware variant to plan for with --dry-run (default: all).
    #[arg(long, requires = "dry_run", value_parser = parse_variant)]
    variant: Option<RadioVariant>,
}

fn parse_variant(s: &str) -> std::result::Result<RadioVariant, String> {
    s.parse()
}

impl Cli {
    fn serial_config(&self) -> SerialConfig {
        let flow_control = if self.rtscts {
            FlowControl::Hardware
        } else if self.xonxoff {
            FlowControl::Software
        } else {
            FlowControl::None
        };
        SerialConfig {
            baud_rate: self.baudrate,
            flow_control,
            assert_dtr: self.dsrdtr,
            ..Default::default()
        }
    }

    fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        SessionConfig {
            deadline: self.deadline.map(Duration::from_secs),
            status_lines: if self.no_status { 0 } else { defaults.status_lines },
            ..defaults
        }
    }
}

// ---------------------------------------------------------------------------
// Device sessions
// ---------------------------------------------------------------------------

fn failed_report(label: &str, outcome: SessionOutcome) -> SessionReport {
    SessionReport {
        label: label.to_string(),
        outcome,
        variant: None,
        device_id: None,
        commands: Vec::new(),
        elapsed: Duration::ZERO,
    }
}

/// Run one session on a freshly opened transport. A port that failed to
/// open is reported as a transport error for that device only.
async fn configure_device<T: Transport>(
    session: &Session<'_>,
    label: &str,
    opened: rfdlib_core::Result<T>,
    transcript: Option<&mut (dyn Write + Send)>,
) -> SessionReport {
    match opened {
        Ok(mut transport) => session.run(label, &mut transport, transcript).await,
        Err(e) => {
            warn!(port = label, error = %e, "cannot open port");
            failed_report(label, SessionOutcome::TransportError(e.to_string()))
        }
    }
}

async fn configure_sequential(
    cli: &Cli,
    network: &NetworkFile,
    mut log: Option<TranscriptLog>,
) -> Vec<SessionReport> {
    let session = Session::builder(&network.tables, &network.configuration)
        .config(cli.session_config())
        .build();
    let serial = cli.serial_config();

    let mut reports = Vec::with_capacity(cli.devices.len());
    for port in &cli.devices {
        let opened = SerialTransport::open_with_config(port, serial.clone()).await;
        let transcript = match log.as_mut().map(|log| log.begin(port)) {
            Some(Ok(writer)) => Some(writer as &mut (dyn Write + Send)),
            Some(Err(e)) => {
                warn!(error = %e, "transcript unavailable for this session");
                None
            }
            None => None,
        };
        reports.push(configure_device(&session, port, opened, transcript).await);
    }
    reports
}

async fn configure_parallel(
    cli: &Cli,
    network: NetworkFile,
    mut log: Option<TranscriptLog>,
) -> Vec<SessionReport> {
    let tables = Arc::new(network.tables);
    let configuration = Arc::new(network.configuration);
    let capture = log.is_some();

    let handles: Vec<_> = cli
        .devices
        .iter()
        .map(|port| {
            let port = port.clone();
            let tables = Arc::clone(&tables);
            let configuration = Arc::clone(&configuration);
            let serial = cli.serial_config();
            let config = cli.session_config();
            tokio::spawn(async move {
                let session = Session::builder(&tables, &configuration)
                    .config(config)
                    .build();
                let opened = SerialTransport::open_with_config(&port, serial).await;
                let mut traffic = Vec::<u8>::new();
                let sink = if capture {
                    Some(&mut traffic as &mut (dyn Write + Send))
                } else {
                    None
                };
                let report = configure_device(&session, &port, opened, sink).await;
                (report, traffic)
            })
        })
        .collect();

    // Await in command-line order so reports and transcript sections line up.
    let mut reports = Vec::with_capacity(handles.len());
    for (port, handle) in cli.devices.iter().zip(handles) {
        match handle.await {
            Ok((report, traffic)) => {
                if let Some(log) = log.as_mut() {
                    if let Err(e) = log.append(port, &traffic) {
                        warn!(error = %e, "failed to write transcript");
                    }
                }
                reports.push(report);
            }
            Err(e) => reports.push(failed_report(
                port,
                SessionOutcome::TransportError(format!("session task failed: {e}")),
            )),
        }
    }
    reports
}

fn print_summary(reports: &[SessionReport]) {
    for report in reports {
        let device_id = report
            .device_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".into());
        let variant = report
            .variant
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<16} {:<16} {:<10} {} ({:.1?})",
            report.label, device_id, variant, report.outcome, report.elapsed
        );
    }
}

// ---------------------------------------------------------------------------
// Dry run
// ---------------------------------------------------------------------------

/// Render the command plan for the common section and every device section.
/// Returns the text and whether every plan resolved.
fn render_plan(network: &NetworkFile, variant: Option<RadioVariant>) -> (String, bool) {
    let variants = match variant {
        Some(v) => vec![v],
        None => RadioVariant::ALL.to_vec(),
    };
    let common_only = ConfigurationSet::new(network.configuration.common().clone());
    let mut sections: Vec<(String, &ConfigurationSet, DeviceId)> =
        vec![("common".into(), &common_only, DeviceId::from_u64(0))];
    for (id, _) in network.configuration.devices() {
        sections.push((id.to_string(), &network.configuration, id));
    }

    let mut out = String::new();
    let mut ok = true;
    for variant in variants {
        for (name, configuration, id) in &sections {
            let _ = writeln!(out, "[{variant}] {name}");
            match plan_commands(variant, *id, configuration, &network.tables) {
                Ok(plan) => {
                    for command in plan {
                        let _ = writeln!(out, "    {:<20} {}", command.key, command.line);
                    }
                }
                Err(e) => {
                    ok = false;
                    let _ = writeln!(out, "    error: {e}");
                }
            }
        }
    }
    (out, ok)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

async fn run(cli: Cli) -> Result<ExitCode> {
    let network = config_file::load(&cli.config)?;

    if cli.dry_run {
        let (plan, ok) = render_plan(&network, cli.variant);
        print!("{plan}");
        return Ok(if ok { ExitCode::SUCCESS } else { ExitCode::from(1) });
    }

    let log = if cli.no_log {
        None
    } else {
        Some(TranscriptLog::open(&cli.log)?)
    };

    info!(
        devices = cli.devices.len(),
        config = %cli.config.display(),
        parallel = cli.parallel,
        "configuring modems"
    );
    let reports = if cli.parallel {
        configure_parallel(&cli, network, log).await
    } else {
        configure_sequential(&cli, &network, log).await
    };

    print_summary(&reports);
    let failed = reports.iter().filter(|r| !r.outcome.is_applied()).count();
    if failed == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(failed, total = reports.len(), "not every modem was configured");
        Ok(ExitCode::from(1))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}
