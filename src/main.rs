use clap::Parser;
use tracing_subscriber::EnvFilter;

use trinity::api::{
    Cli, Command, INVALID_INPUT_EXIT_CODE, is_informational, rate_command, serve_command,
};

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if is_informational(&e) => e.exit(),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(INVALID_INPUT_EXIT_CODE);
        }
    };

    let result = match cli.command {
        Command::Rate(args) => {
            init_tracing("warn");
            rate_command(&args).map(|output| println!("{output}"))
        }
        Command::Serve(args) => {
            init_tracing("info");
            serve_command(args).await
        }
    };

    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(INVALID_INPUT_EXIT_CODE);
    }
}
