use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum, builder::{Styles, styling::{AnsiColor, Effects}}, crate_description, crate_name, crate_version};
use clap_complete::Shell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DecompileModeCli {
    Pseudo,
    Disasm,
}

impl From<DecompileModeCli> for deysc_lib::DecompileMode {
    fn from(mode: DecompileModeCli) -> Self {
        match mode {
            DecompileModeCli::Pseudo => deysc_lib::DecompileMode::Pseudo,
            DecompileModeCli::Disasm => deysc_lib::DecompileMode::Disasm,
        }
    }
}

#[derive(Parser)]
#[command(name = crate_name!(),
    version = crate_version!(),
    about = crate_description!(),
    styles = Styles::styled()
        .header(AnsiColor::BrightGreen.on_default() | Effects::BOLD | Effects::UNDERLINE)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default()))]
pub struct Cli {
    /// Log filter, e.g. `debug` or `deysc_lib=trace` (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Option<TopLevel>,
}

#[derive(Subcommand)]
pub enum TopLevel {
    /// Decompiles a compiled script unit
    Decompile {
        #[command(subcommand)]
        command: DecompileCommand,
    },
    /// Generate shell completion
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum DecompileCommand {
    /// Decompiles a script unit dumped as JSON
    File {
        /// Path to the script unit JSON
        path: PathBuf,

        /// Native catalog (JSON, keyed by category then hash)
        #[arg(long)]
        natives: Option<PathBuf>,

        /// Deflate-compressed hash translation table
        #[arg(long)]
        translations: Option<PathBuf>,

        /// Output mode
        #[arg(long, value_enum, default_value_t = DecompileModeCli::Pseudo)]
        mode: DecompileModeCli,

        /// Prefix each instruction's statements with its disassembly
        #[arg(long, default_value_t = false)]
        annotate: bool,

        /// Drop gotos that only fall through to the next block
        #[arg(long, default_value_t = false)]
        optimize: bool,

        /// Print collected diagnostics as JSON on stderr
        #[arg(long, default_value_t = false)]
        diagnostics: bool,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decompile_flags() {
        let cli = Cli::try_parse_from([
            "deysc", "decompile", "file", "unit.json", "--natives", "n.json", "--mode", "disasm", "--optimize",
        ])
        .unwrap();
        let Some(TopLevel::Decompile { command: DecompileCommand::File { path, natives, mode, optimize, annotate, .. } }) =
            cli.command
        else {
            panic!("expected decompile file");
        };
        assert_eq!(path, PathBuf::from("unit.json"));
        assert_eq!(natives, Some(PathBuf::from("n.json")));
        assert_eq!(mode, DecompileModeCli::Disasm);
        assert!(optimize && !annotate);
    }

    #[test]
    fn command_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
