mod app;
mod auth;
mod cli;
mod config;
mod consts;
mod core;
mod error;
mod http;
mod output;
mod stream;
mod utils;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use config::Config;

/// RUST_LOG wins; otherwise warnings only, or everything from this crate with --debug.
fn init_tracing(debug: bool) {
    let default_filter = if debug { "riego=debug,warn" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    let config = if cli.debug {
        Config::load()
    } else {
        Config::load_quiet()
    };
    let cli = cli.with_config(&config);
    init_tracing(cli.debug);

    if let Err(err) = app::run(&cli) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
