use crate::ParseLimits;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "patchview", about = "Parse git diffs into a structured review model")]
pub struct Cli {
    /// Path to the git repository.
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,

    /// Increase log verbosity (repeat for more detail).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Diff of a commit against its first parent.
    Show(ShowArgs),
    /// Diff between two commits.
    Range(RangeArgs),
    /// Print the raw diff or patch text of a commit.
    Raw(RawArgs),
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Commit to show (any revision git can resolve).
    pub commit: String,

    #[command(flatten)]
    pub limits: LimitArgs,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Debug)]
pub struct RangeArgs {
    /// Older commit of the range.
    pub before: String,

    /// Newer commit of the range.
    pub after: String,

    #[command(flatten)]
    pub limits: LimitArgs,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Debug)]
pub struct RawArgs {
    /// Commit whose raw diff to print.
    pub commit: String,

    /// Raw output format.
    #[arg(long, value_enum, default_value_t = RawFormat::Diff)]
    pub format: RawFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum RawFormat {
    Diff,
    Patch,
}

#[derive(Args, Debug)]
pub struct LimitArgs {
    /// Lines parsed per file before the file is flagged truncated.
    #[arg(long, default_value_t = ParseLimits::default().max_lines_per_file)]
    pub max_lines: usize,

    /// Byte length of a single line before the file is flagged truncated.
    #[arg(long, default_value_t = ParseLimits::default().max_line_chars)]
    pub max_line_chars: usize,

    /// Files parsed before the rest of the diff is cut off.
    #[arg(long, default_value_t = ParseLimits::default().max_files)]
    pub max_files: usize,
}

impl LimitArgs {
    pub fn to_limits(&self) -> ParseLimits {
        ParseLimits {
            max_lines_per_file: self.max_lines,
            max_line_chars: self.max_line_chars,
            max_files: self.max_files,
        }
    }
}

#[derive(Args, Debug)]
pub struct OutputArgs {
    /// Print the parsed model as JSON.
    #[arg(long, conflicts_with = "html")]
    pub json: bool,

    /// Print inline-highlighted HTML table rows.
    #[arg(long)]
    pub html: bool,
}

/// Parse CLI arguments.
pub fn parse_args() -> Cli {
    Cli::parse()
}
