use std::fs;
use std::io;
use std::path::Path;

use clap::{parser::ValueSource, ArgMatches, CommandFactory, FromArgMatches};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mzlfqer::{MzLfqer, MzLfqerError};

#[cfg(feature = "mimalloc")]
use mimalloc::MiMalloc;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn make_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy()
}

fn configure_log(log_file: Option<&Path>) -> io::Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(fs::File::create(path)?);
            let layer = fmt::layer()
                .compact()
                .with_ansi(false)
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_writer(writer)
                .with_filter(make_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_writer(io::stderr)
                .with_filter(make_filter()),
        )
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber).map_err(io::Error::other)?;
    tracing_log::LogTracer::init().map_err(io::Error::other)?;
    Ok(guard)
}

/// The arguments given on the command line, which take precedence over every other
/// configuration source
fn explicit_arguments(args: &MzLfqer, matches: &ArgMatches) -> Result<toml::Table, MzLfqerError> {
    let mut table = toml::Table::try_from(args)?;
    table.retain(|key, _| matches!(matches.value_source(key), Some(ValueSource::CommandLine)));
    Ok(table)
}

fn load_configuration() -> Result<MzLfqer, MzLfqerError> {
    let matches = MzLfqer::command().get_matches();
    let args = MzLfqer::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());
    let explicit = explicit_arguments(&args, &matches)?;

    let mut config = Figment::new()
        .merge(Serialized::defaults(&args))
        .merge(Toml::file("mzlfqer.toml"));
    if let Some(path) = args.config_file.as_ref() {
        config = config.merge(Toml::file_exact(path));
    }
    config = config
        .merge(Env::prefixed("MZLFQER_"))
        .merge(Serialized::defaults(explicit));
    Ok(config.extract()?)
}

fn main() -> Result<(), MzLfqerError> {
    let driver = load_configuration()?;
    let _guard = configure_log(driver.log_file.as_deref())?;

    if let Some(path) = driver.write_config.as_deref() {
        driver.write_config_to(path)?;
    }
    if let Err(e) = driver.main() {
        error!("{e}");
        return Err(e);
    }
    Ok(())
}
