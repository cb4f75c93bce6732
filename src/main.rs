use clap::Parser;
use std::process::ExitCode;
use tack::cli::{self, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    cli::init_logging();
    cli::run(cli).await
}
