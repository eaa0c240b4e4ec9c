// capability-gateway - binary entry point

use clap::Parser;
use std::process::exit;

use capability_gateway::cli::{dispatch, Cli};

fn main() {
    let cli = Cli::parse();
    if let Err(e) = dispatch(cli) {
        eprintln!("error: {e:#}");
        exit(1);
    }
}
