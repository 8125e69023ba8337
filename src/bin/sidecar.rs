//! CLI launcher: loads a workload, connects to the simulator's socket, and
//! runs the EASY-backfill policy until the simulator hangs up. Mirrors
//! `launcher.py`'s argument surface (`<scheduler> <json_file> [-v] [-s
//! <socket>] [-p/--protect]`), with the scheduler selector narrowed to the
//! one policy this sidecar implements.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;

use bsidecar::policy::validate::ValidatingPolicy;
use bsidecar::policy::{EasyBackfill, Policy};
use bsidecar::session::Session;
use bsidecar::transport::UnixSocketTransport;
use bsidecar::workload;

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum Scheduler {
    /// The only policy this sidecar implements.
    EasyBackfill,
}

/// An EASY-backfill scheduling sidecar for a discrete-event HPC simulator.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Which scheduling policy to run.
    #[arg(value_enum)]
    scheduler: Scheduler,

    /// Path to the workload descriptor (JSON).
    #[arg(value_parser = clap::value_parser!(PathBuf))]
    workload: PathBuf,

    /// Be verbose. Repeat for more detail (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Unix domain socket to connect to.
    #[arg(short, long, default_value = "/tmp/bat_socket")]
    socket: PathBuf,

    /// Wrap the scheduler in an invariant-checking validator.
    #[arg(long)]
    validate: bool,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let Scheduler::EasyBackfill = args.scheduler;

    let wl = workload::load(&args.workload)
        .with_context(|| format!("loading workload {}", args.workload.display()))?;
    info!("loaded {} jobs over {} resources", wl.jobs.len(), wl.nb_res);

    info!("connecting to {}", args.socket.display());
    let transport = UnixSocketTransport::connect(&args.socket)
        .with_context(|| format!("connecting to {}", args.socket.display()))?;

    let policy: Box<dyn Policy> = if args.validate {
        Box::new(ValidatingPolicy::new(EasyBackfill::new(wl.nb_res)))
    } else {
        Box::new(EasyBackfill::new(wl.nb_res))
    };

    let mut session = Session::new(transport, policy, wl.jobs);
    session.run().context("running the protocol session")
}
