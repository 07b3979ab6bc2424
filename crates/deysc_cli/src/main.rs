use std::path::Path;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use deysc_lib::{DecompileOptions, Diagnostic, NativeDb, ScriptUnit};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, DecompileCommand, TopLevel};

mod cli;

#[derive(Serialize)]
struct Report<'a> {
    unit: &'a str,
    diagnostics: &'a [Diagnostic],
}

fn init_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(f) => EnvFilter::new(f),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// A missing catalog is not fatal; natives are synthesized instead.
fn load_natives(natives: Option<&Path>, translations: Option<&Path>) -> NativeDb {
    let mut db = match natives {
        Some(path) => match NativeDb::load(path) {
            Ok(db) => {
                info!(path = %path.display(), natives = db.len(), "loaded native catalog");
                db
            }
            Err(e) => {
                warn!(path = %path.display(), "failed to load native catalog: {e}");
                NativeDb::new()
            }
        },
        None => NativeDb::new(),
    };
    if let Some(path) = translations {
        match db.load_translations(path) {
            Ok(copied) => info!(path = %path.display(), copied, "applied native translations"),
            Err(e) => warn!(path = %path.display(), "failed to load native translations: {e}"),
        }
    }
    db
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log.as_deref());

    match cli.command {
        Some(TopLevel::Decompile { command }) => match command {
            DecompileCommand::File {
                path,
                natives,
                translations,
                mode,
                annotate,
                optimize,
                diagnostics,
            } => {
                let unit = match ScriptUnit::load(&path) {
                    Ok(unit) => unit,
                    Err(e) => {
                        eprintln!("failed to read {path:?}: {e}");
                        return ExitCode::FAILURE;
                    }
                };
                let db = load_natives(natives.as_deref(), translations.as_deref());
                let options = DecompileOptions { mode: mode.into(), annotate, optimize };

                match deysc_lib::decompile_with_options(&unit, &db, options) {
                    Ok(out) => {
                        print!("{}", out.text);
                        if diagnostics {
                            let report = Report { unit: &unit.name, diagnostics: &out.diagnostics };
                            match serde_json::to_string_pretty(&report) {
                                Ok(json) => eprintln!("{json}"),
                                Err(e) => warn!("failed to serialize diagnostics: {e}"),
                            }
                        } else if !out.diagnostics.is_empty() {
                            info!(count = out.diagnostics.len(), "decompiled with diagnostics");
                        }
                    }
                    Err(e) => {
                        eprintln!("decompile error: {e}");
                        return ExitCode::FAILURE;
                    }
                }
            }
        },
        Some(TopLevel::Completion { shell }) => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
        }
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
