use std::process;

use clap::CommandFactory;
use graphql_cache::{
    cache::CacheRegistry,
    config::{self, ClearArgs, Command},
    infra::{error::InfraError, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

fn main() {
    if let Err(error) = run() {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "graphql-cache failed");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "graphql-cache failed");
    });
}

fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    match cli_args.command {
        Some(Command::Clear(args)) => run_clear(settings, args),
        None => {
            config::CliArgs::command().print_help()?;
            Ok(())
        }
    }
}

fn run_clear(settings: config::Settings, args: ClearArgs) -> Result<(), InfraError> {
    let backend = settings.cache.build_backend();
    let registry = CacheRegistry::with_backend(settings.cache, backend);

    match args.zone {
        Some(zone) => {
            let cleared = registry.clear_zone(zone.clone());
            info!(zone = %zone, cleared, "clear command finished");
            println!("Cleared cache zone '{zone}'");
        }
        None => {
            let cleared = registry.clear();
            info!(cleared, "clear command finished");
            println!("All cache zones cleared");
        }
    }

    Ok(())
}
