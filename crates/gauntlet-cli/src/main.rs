use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::args::Cli;
use cli::commands::dispatch;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    gauntlet_core::sandbox::install_interrupt_handler();
    init_logging();

    let cli = Cli::parse();
    let code = match dispatch(cli) {
        Ok(code) => code,
        Err(err) => match gauntlet_core::errors::fatal_exit_status(&err) {
            Some(status) => {
                eprintln!("gauntlet: {err}");
                status
            }
            // Anything that is not a Fatal is a programming error; let it
            // crash loudly instead of pretty-printing it.
            None => panic!("unexpected error: {err:?}"),
        },
    };
    std::process::exit(code);
}
