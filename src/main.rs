//! `tessera` command line entry point.
//!
//! Log output goes to stderr. `-v`/`-q` pick the level and `TESSERA_LOG`
//! (env_logger filter syntax) refines it per module.

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;

use tessera::cli::args::TesseraArgs;
use tessera::cli::commands::execute_command;

fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

fn init_logging(verbosity: u8) {
    Builder::new()
        .filter_level(level_for(verbosity))
        .parse_env("TESSERA_LOG")
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

fn main() -> ExitCode {
    let args = TesseraArgs::parse();
    init_logging(args.verbosity());

    match execute_command(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::debug!("{e:?}");
            eprintln!("tessera: {e}");
            ExitCode::FAILURE
        }
    }
}
