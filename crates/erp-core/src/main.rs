//! erp-sim - drive the recovery engine against a simulated fabric
//!
//! Builds one adapter with a set of ports and units, injects faults,
//! brings everything online and prints the resulting snapshot and event
//! journal as JSON on stdout. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use erp_common::{ErpError, Lun, PortStatus, Result, TargetRef, UnitStatus, Wwpn};
use erp_config::ErpConfig;
use erp_core::exit_codes::ExitCode;
use erp_core::logging::{
    event_names, init_logging, LogConfig, LogContext, LogFormat, LogLevel, Stage,
};
use erp_core::sim::{SimFabric, SimFaults};
use erp_core::{log_event, ErpEngine, ErpEvent, ErpSnapshot};
use serde::Serialize;

/// Fabric ERP simulator
#[derive(Parser, Debug)]
#[command(name = "erp-sim")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a config file (otherwise ERP_CONFIG, XDG, /etc, defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use short test timings instead of the configured ones
    #[arg(long)]
    fast: bool,

    /// Number of remote ports
    #[arg(long, default_value_t = 2)]
    ports: u32,

    /// Units behind each port
    #[arg(long, default_value_t = 2)]
    units: u32,

    /// Fail the next N unit opens
    #[arg(long, default_value_t = 0)]
    fail_unit_opens: u32,

    /// Fail the next N remote port opens
    #[arg(long, default_value_t = 0)]
    fail_port_opens: u32,

    /// Give the first N ports a WWPN the nameserver rejects
    #[arg(long, default_value_t = 0)]
    invalid_wwpn: u32,

    /// Let the next N nameserver lookups time out
    #[arg(long, default_value_t = 0)]
    timeout_lookups: u32,

    /// Refuse the next N submissions for lack of request memory
    #[arg(long, default_value_t = 0)]
    nomem: u32,

    /// Report the host connection as initializing on the next N exchanges
    #[arg(long, default_value_t = 0)]
    host_con_init: u32,

    /// How long to wait for recovery to settle, in milliseconds
    #[arg(long, default_value_t = 60_000)]
    settle_ms: u64,

    /// Log level (overrides ERP_LOG / RUST_LOG)
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,

    /// Log format on stderr (overrides ERP_LOG_FORMAT)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Print compact JSON instead of pretty
    #[arg(long)]
    compact: bool,
}

#[derive(Serialize)]
struct SimReport {
    run_id: String,
    adapter: String,
    settled: bool,
    failed_targets: Vec<TargetRef>,
    snapshot: ErpSnapshot,
    events: Vec<ErpEvent>,
}

const WWPN_BASE: u64 = 0x5005_0766_0000_0000;

fn main() {
    let cli = Cli::parse();
    let log_config = LogConfig::from_env(cli.log_level, cli.log_format);
    init_logging(&log_config);

    let code = match run(&cli, log_config.format) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("erp-sim: {}: {}", e.headline(), e);
            ExitCode::from(&e)
        }
    };
    std::process::exit(code.as_i32());
}

fn load_config(cli: &Cli) -> Result<ErpConfig> {
    let (config, resolved) =
        ErpConfig::load(cli.config.as_deref()).map_err(|e| ErpError::Config(e.to_string()))?;
    match (&resolved.path, resolved.source) {
        (Some(path), source) => tracing::info!(
            target: event_names::CONFIG_LOADED,
            path = %path.display(),
            source = %source,
            "config loaded"
        ),
        (None, _) => tracing::debug!(
            target: event_names::CONFIG_DEFAULT_USED,
            "no config file found, using defaults"
        ),
    }
    if cli.fast {
        return Ok(ErpConfig {
            event_history: config.event_history,
            ..ErpConfig::fast()
        });
    }
    Ok(config)
}

fn run(cli: &Cli, log_format: LogFormat) -> Result<ExitCode> {
    let config = load_config(cli)?;

    let wwpns: Vec<Wwpn> = (0..cli.ports)
        .map(|i| Wwpn(WWPN_BASE + ((u64::from(i) + 1) << 8)))
        .collect();
    let faults = SimFaults {
        fail_unit_opens: cli.fail_unit_opens,
        fail_port_opens: cli.fail_port_opens,
        invalid_wwpns: wwpns
            .iter()
            .take(cli.invalid_wwpn as usize)
            .copied()
            .collect(),
        timeout_lookups: cli.timeout_lookups,
        nomem: cli.nomem,
        host_con_init: cli.host_con_init,
        ..SimFaults::default()
    };

    let sim = Arc::new(SimFabric::with_faults(faults));
    let mut engine = ErpEngine::start("adapter0", config, sim.clone())?;
    sim.attach(engine.completion_handle());

    for wwpn in &wwpns {
        let port = engine.add_port(*wwpn)?;
        for lun in 0..cli.units {
            engine.add_unit(port, Lun(u64::from(lun)))?;
        }
    }
    engine.set_online(TargetRef::Adapter)?;
    let settled = engine.wait_for_quiescence_timeout(Duration::from_millis(cli.settle_ms));

    let snapshot = engine.snapshot();
    let failed_targets = failed_targets(&snapshot);
    let report = SimReport {
        run_id: engine.run_id().to_string(),
        adapter: engine.name().to_string(),
        settled,
        failed_targets,
        snapshot,
        events: engine.events(),
    };

    let ctx = LogContext::new(engine.run_id(), engine.name());
    summarize(&ctx, &report, &sim, log_format);

    let json = if cli.compact {
        serde_json::to_string(&report)?
    } else {
        serde_json::to_string_pretty(&report)?
    };
    println!("{}", json);

    engine.stop();
    Ok(if !report.settled {
        ExitCode::Unsettled
    } else if !report.failed_targets.is_empty() {
        ExitCode::TargetsFailed
    } else {
        ExitCode::Clean
    })
}

fn failed_targets(snapshot: &ErpSnapshot) -> Vec<TargetRef> {
    let mut failed = Vec::new();
    for port in &snapshot.ports {
        if port.status.contains(PortStatus::ERP_FAILED) {
            failed.push(TargetRef::port(port.id));
        }
        for unit in &port.units {
            if unit.status.contains(UnitStatus::ERP_FAILED) {
                failed.push(TargetRef::unit(port.id, unit.id));
            }
        }
    }
    failed
}

fn summarize(ctx: &LogContext, report: &SimReport, sim: &SimFabric, format: LogFormat) {
    let requests = sim.submitted().len();
    let registered = sim.registered().len();
    match format {
        LogFormat::Jsonl => {
            let event = ctx
                .info(event_names::SIM_FINISHED, "simulation finished")
                .with_field("settled", report.settled)
                .with_field("failed_targets", report.failed_targets.len())
                .with_field("requests", requests)
                .with_field("registered_units", registered);
            eprintln!("{}", event.to_jsonl());
        }
        LogFormat::Human => log_event!(
            ctx,
            INFO,
            event_names::SIM_FINISHED,
            Stage::Lifecycle,
            "simulation finished",
            settled = report.settled,
            failed_targets = report.failed_targets.len(),
            requests = requests,
            registered_units = registered
        ),
    }
}
