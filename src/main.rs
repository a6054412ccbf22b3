mod archive;
mod cache;
mod cli;
mod collaborators;
mod config;
mod control;
mod error;
mod graph;
mod identity;
mod logging;
mod manifest;
mod orchestrator;
mod pipeline;
mod pool;
mod registry;
mod reports;
mod satisfaction;
mod sync;
mod target;
mod types;
mod version;

use structopt::StructOpt;

use cli::Opt;
use error::FailureKind;

/// Maps an `anyhow::Error` that wraps a [`error::CoreError`] to its taxonomy
/// exit code (spec §6); anything else is `FailureKind::Unknown`.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<error::CoreError>() {
        Some(core_err) => core_err.kind.exit_code(),
        None => FailureKind::Unknown.exit_code(),
    }
}

fn main() {
    let args = Opt::from_args();
    if let Err(err) = cli::run(args) {
        eprintln!("error: {err:#}");
        std::process::exit(exit_code_for(&err));
    }
}
