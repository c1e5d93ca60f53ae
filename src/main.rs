// Main entrypoint for the cpsclient command line.

use cpsclient::app::App;
use cpsclient::config::{Config, ConfigTrait};
use cpsclient::orchestrator::Session;
use cpsclient::preference::{Pref, Preference};
use cpsclient::shutdown;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// cpsclient - latency-aware allocation client for a compute coordinator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Custom config file path
    #[arg(short, long, value_name = "FILE", global = true)]
    cfg: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the services known to the coordinator
    Services,
    /// Print the coordinator's CPS view
    View,
    /// Discover candidates for a service and measure them
    Probe {
        #[arg(short, long)]
        service: String,
    },
    /// Discover, measure, allocate and invoke; releases unless --hold is given
    Run {
        #[arg(short, long)]
        service: String,
        #[arg(short, long)]
        input: String,
        #[arg(long, value_enum)]
        cost: Option<Pref>,
        #[arg(long, value_enum)]
        delay: Option<Pref>,
        /// Keep the allocation instead of releasing it before exit
        #[arg(long)]
        hold: bool,
    },
    /// Inspect or change the persisted cost/delay preference
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },
}

#[derive(Subcommand, Debug)]
enum PrefsAction {
    Show,
    Set {
        #[arg(long, value_enum)]
        cost: Pref,
        #[arg(long, value_enum)]
        delay: Pref,
    },
}

/// Loads the configuration: explicit path, then local, then default file,
/// then built-in defaults. Returns the file actually used.
fn load_cfg(path: Option<PathBuf>) -> Result<(Config, Option<PathBuf>)> {
    Config::discover(path.as_deref())
        .with_context(|| format!("failed to load config (explicit: {:?})", path))
}

fn log_cfg_source(used: Option<&PathBuf>) {
    match used {
        Some(path) => info!(
            component = "config",
            event = "load_success",
            path = ?path,
            "config loaded"
        ),
        None => info!(
            component = "config",
            event = "defaults",
            "no config file found, using defaults"
        ),
    }
}

/// Configures structured logging based on configuration.
fn configure_logger(cfg: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let log_level = cfg
        .logs()
        .and_then(|logs| logs.level.as_ref())
        .map(|s| s.as_str())
        .unwrap_or("info");

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if cfg.is_prod() {
        // Production: JSON format
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        // Development: Pretty console format
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .init();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?
        .block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    let (cfg, used) = load_cfg(args.cfg)?;

    // Configure logger (must be done after config is loaded)
    configure_logger(&cfg);
    log_cfg_source(used.as_ref());

    let cancel = CancellationToken::new();
    let watcher = shutdown::watch_interrupt(cancel.clone());

    let app = App::new(cancel.clone(), cfg)?;
    let result = execute(&app, args.command, &mut std::io::stderr()).await;

    shutdown::stop_watcher(&cancel, watcher).await;

    if let Err(e) = &result {
        error!(
            component = "main",
            event = "command_failed",
            error = %e,
            "command failed"
        );
    }
    result
}

/// Runs `command`, then writes the network log to `log_out` whether or not
/// the command succeeded.
async fn execute(app: &App, command: Command, log_out: &mut impl Write) -> Result<()> {
    let result = dispatch(app, command).await;
    for line in app.network_log().lines() {
        if let Err(e) = writeln!(log_out, "{}", line) {
            warn!(
                component = "main",
                event = "network_log_write_failed",
                error = %e,
                "network log could not be written"
            );
            break;
        }
    }
    result
}

async fn dispatch(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Services => {
            for s in app.coordinator().services().await? {
                println!("{}\t{}\t{}", s.service_id, s.service_name, s.description);
            }
        }
        Command::View => {
            println!("CS-ID\tCSCI-ID\tGas\tCost\tComputingtime\tNetworkdelay");
            for row in app.coordinator().cps_view().await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    row.cs_id, row.csci_id, row.gas, row.cost, row.computing_time, row.network_delay
                );
            }
        }
        Command::Probe { service } => {
            let mut session = app.session();
            session.fetch_candidates(&service).await?;
            for m in session.measure().await? {
                match (m.delay_ms, &m.error) {
                    (Some(ms), _) => println!("{}\t{}\t{}\t{}ms", m.site_name, m.instance_id, m.address, ms),
                    (None, err) => println!(
                        "{}\t{}\t{}\tfailed: {}",
                        m.site_name,
                        m.instance_id,
                        m.address,
                        err.as_deref().unwrap_or("unknown")
                    ),
                }
            }
        }
        Command::Run {
            service,
            input,
            cost,
            delay,
            hold,
        } => {
            let mut session = app.session();
            if cost.is_some() || delay.is_some() {
                let current = session.preference();
                session.set_preference(Preference::new(
                    cost.unwrap_or(current.cost),
                    delay.unwrap_or(current.delay),
                ))?;
            }
            let outcome = session.run(&service, &input).await;
            if let Ok(out) = &outcome {
                println!("{}", out.output);
            }
            finish(&mut session, hold).await;
            outcome?;
        }
        Command::Prefs { action } => match action {
            PrefsAction::Show => {
                let p = app.store().load();
                println!("cost={} delay={}", p.cost, p.delay);
            }
            PrefsAction::Set { cost, delay } => {
                let mut session = app.session();
                session.set_preference(Preference::new(cost, delay))?;
                println!("{}", session.preference());
            }
        },
    }
    Ok(())
}

/// Ends a `run`: releases the allocation unless it is to be held. A held
/// allocation is always released when the run was interrupted.
async fn finish(session: &mut Session, hold: bool) {
    let Some(allocation) = session.allocation().cloned() else {
        return;
    };
    if hold && !session.cancel_token().is_cancelled() {
        info!(
            component = "main",
            event = "allocation_held",
            allocation_id = %allocation.allocation_id,
            addr = %allocation.chosen_address,
            "allocation kept"
        );
        println!("allocation {} held on {}", allocation.allocation_id, allocation.chosen_address);
        return;
    }
    if let Err(e) = session.release().await {
        warn!(
            component = "main",
            event = "release_failed",
            allocation_id = %allocation.allocation_id,
            error = %e,
            "allocation could not be released"
        );
    }
}
