use std::process::ExitCode;

use clap::Parser;
use layerlab::cli::{self, CliArgs};

fn main() -> ExitCode {
    cli::run(CliArgs::parse())
}
