//! reglib command line: list, inspect and download from a Docker registry

use clap::Parser;
use reglib::cli::{Args, Runner};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    reglib::logging::init(args.verbose);

    if let Err(err) = Runner::new(args).run().await {
        error!(error = %err, "command failed");
        eprintln!("Error: {}", err);
        process::exit(1);
    }
}
