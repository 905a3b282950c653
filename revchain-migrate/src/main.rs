//! revchain-migrate
//!
//! Applies the events app's revision chain. Supports interactive use and CI pipelines;
//! `--sql` renders a run offline for review.

use clap::Parser;
use revchain_migrate::{cli, revisions, Cli};
use std::process;

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    cli::init_logging(cli.verbose, cli.quiet);

    // Runs are sequential; one worker keeps the connection on one coroutine scheduler
    may::config().set_workers(1);

    match cli::run(&cli, revisions::all()) {
        Ok(()) => {
            if !cli.quiet {
                println!("✅ Success");
            }
            process::exit(0);
        }
        Err(e) => {
            eprintln!("❌ Error: {e:#}");
            process::exit(1);
        }
    }
}
