mod audit;
mod config;
mod feed;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use guard_fc::mav::{self, MavActuator};
use guard_fc::operator::StdinOperator;
use guard_fc::{
    AvoidanceController, AvoidancePolicy, ControlLoop, DryRunActuator, FcBackend, FlightActuator, StopReason,
};
use guard_link::{doctor as link_doctor, link, LatestRecord, TelemetryLink};

use config::{load_config, Config, OperatorSource};

#[derive(Debug, Parser)]
#[command(name = "rangeguard", version, about = "rangeguard - reactive obstacle avoidance for small multirotors")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the config and check the listen address is free.
    Doctor,
    /// Serve the sensor link and run the avoidance loop.
    Run,
    Fc { #[command(subcommand)] cmd: FcCmd },
    /// Replay recorded sensor lines into a running link.
    Feed {
        #[arg(long)]
        connect: String,
        #[arg(long)]
        file: String,
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
        /// Stop at end of file instead of looping.
        #[arg(long)]
        once: bool,
    },
}

#[derive(Debug, Subcommand)]
enum FcCmd {
    /// Wait for a MAVLink heartbeat on the configured link.
    Probe,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run => {
            let grounded = run(&cfg).await?;
            // stdin reader sits in a blocking read; don't wait on it
            std::process::exit(if grounded { 0 } else { 1 });
        }
        Command::Fc { cmd } => fc_cmd(&cfg, cmd).await?,
        Command::Feed { connect, file, interval_ms, once } => {
            let sent = feed::replay(&connect, &file, Duration::from_millis(interval_ms), once).await?;
            info!("feed: sent {} lines", sent);
        }
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    config::validate(cfg)?;
    link_doctor::check_bindable(&cfg.link.listen)?;
    if cfg.fc.backend == FcBackend::DryRun {
        warn!("doctor: fc.backend=dry-run, no vehicle will be commanded");
    }
    info!("doctor: OK");
    Ok(())
}

async fn fc_cmd(cfg: &Config, cmd: FcCmd) -> Result<()> {
    match cmd {
        FcCmd::Probe => {
            anyhow::ensure!(cfg.fc.backend == FcBackend::Mavlink, "fc.backend is not mavlink");
            let p = mav::probe(&cfg.fc).await?;
            println!("url={} hb={} {}ms note={}", p.url, p.hb_seen, p.elapsed_ms, p.note);
            // an unanswered recv keeps its blocking thread alive
            std::process::exit(if p.hb_seen { 0 } else { 1 });
        }
    }
}

fn open_actuator(cfg: &Config) -> Result<Box<dyn FlightActuator>> {
    match cfg.fc.backend {
        FcBackend::DryRun => {
            warn!("run: dry-run actuator, vehicle calls are only logged");
            Ok(Box::new(DryRunActuator::new()))
        }
        FcBackend::Mavlink => {
            let act = MavActuator::open(&cfg.fc).context("FC open")?;
            act.spawn_heartbeat(cfg.fc.send_heartbeat_hz.unwrap_or(1.0));
            Ok(Box::new(act))
        }
    }
}

/// Returns whether the vehicle is believed grounded at exit.
async fn run(cfg: &Config) -> Result<bool> {
    config::validate(cfg).context("invalid configuration")?;
    info!("run: starting");

    let listener = TelemetryLink::bind(&cfg.link.listen).await?;
    let cell = LatestRecord::new();
    tokio::spawn(link::serve(listener, cell.clone(), cfg.link.read_timeout()));

    let actuator = open_actuator(cfg)?;
    let controller = AvoidanceController::new(
        actuator,
        AvoidancePolicy::from(&cfg.avoid),
        cfg.fc.call_timeout(),
        cfg.control.debounce(),
    );

    let operator = match cfg.operator.source {
        OperatorSource::Stdin => StdinOperator::stdin(),
    };

    let mut control = ControlLoop::new(controller, operator, cell, cfg.control.tick());
    let mut writer = None;
    if let Some(a) = &cfg.audit {
        let (tx, rx) = mpsc::channel(256);
        writer = Some(audit::spawn_writer(&a.path, rx).await?);
        control = control.with_audit(tx);
        info!("run: audit trail -> {}", a.path);
    }

    let signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("run: cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let report = control.run(signal).await;

    match report.reason {
        StopReason::Fault => warn!("run: loop faulted after {} ticks", report.ticks),
        r => info!("run: stopped by {:?} after {} ticks", r, report.ticks),
    }
    if !report.grounded {
        warn!("run: exiting without a confirmed landing");
    }

    if let Some(w) = writer {
        if let Err(e) = w.await {
            warn!("run: audit writer failed: {}", e);
        }
    }
    Ok(report.grounded)
}
