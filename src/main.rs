use anyhow::{Context, Result};
use log::LevelFilter;

use patchview::cli::{self, Commands, OutputArgs, RawFormat};
use patchview::git::{self, RawDiffFormat};
use patchview::inline::escape_html;
use patchview::{ChangeKind, Diff, LineKind};

/// Minimal logger writing straight to stderr.
struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        eprintln!("[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

fn main() -> Result<()> {
    let args = cli::parse_args();
    init_logging(args.verbose);

    match args.command {
        Commands::Show(show) => {
            let diff = git::diff_for_commit(&args.repo, &show.commit, show.limits.to_limits())
                .with_context(|| format!("failed to load diff for {}", show.commit))?;
            print_diff(&diff, &show.output)?;
        }
        Commands::Range(range) => {
            let diff = git::diff_for_range(
                &args.repo,
                &range.before,
                &range.after,
                range.limits.to_limits(),
            )
            .with_context(|| format!("failed to load diff for {}..{}", range.before, range.after))?;
            print_diff(&diff, &range.output)?;
        }
        Commands::Raw(raw) => {
            let format = match raw.format {
                RawFormat::Diff => RawDiffFormat::Diff,
                RawFormat::Patch => RawDiffFormat::Patch,
            };
            let text = git::raw_diff(&args.repo, &raw.commit, format)
                .with_context(|| format!("failed to load raw diff for {}", raw.commit))?;
            print!("{text}");
        }
    }

    Ok(())
}

fn print_diff(diff: &Diff, output: &OutputArgs) -> Result<()> {
    if output.json {
        println!("{}", serde_json::to_string_pretty(diff)?);
    } else if output.html {
        print_html(diff);
    } else {
        print_summary(diff);
    }
    Ok(())
}

/// Plain text summary: one line per file, totals footer.
fn print_summary(diff: &Diff) {
    for file in &diff.files {
        let letter = match file.change_kind {
            ChangeKind::Added => 'A',
            ChangeKind::Modified => 'M',
            ChangeKind::Deleted => 'D',
            ChangeKind::Renamed => 'R',
        };
        let name = match &file.old_name {
            Some(old) => format!("{old} -> {}", file.name),
            None => file.name.clone(),
        };
        let mut notes = String::new();
        if file.is_binary {
            notes.push_str("  (binary)");
        }
        if file.is_truncated {
            notes.push_str("  (truncated)");
        }
        println!(
            "{letter} {name}  +{} -{}{notes}",
            file.additions, file.deletions
        );
    }
    println!(
        "{} files changed, +{} -{}",
        diff.file_count(),
        diff.total_additions,
        diff.total_deletions
    );
    if diff.is_truncated {
        println!("diff too large, output truncated");
    }
}

/// One table per file, one row per line, with inline highlighting.
fn print_html(diff: &Diff) {
    for file in &diff.files {
        println!(
            "<table class=\"diff\" data-file=\"{}\">",
            escape_html(&file.name)
        );
        for section in &file.sections {
            for line in &section.lines {
                let class = match line.kind {
                    LineKind::Context => "context",
                    LineKind::Added => "added",
                    LineKind::Removed => "removed",
                    LineKind::HunkHeader => "hunk-header",
                };
                let left = if line.left_index > 0 {
                    line.left_index.to_string()
                } else {
                    String::new()
                };
                let right = if line.right_index > 0 {
                    line.right_index.to_string()
                } else {
                    String::new()
                };
                println!(
                    "<tr class=\"{class}\"><td>{left}</td><td>{right}</td><td>{}</td></tr>",
                    section.inline_diff_html(line)
                );
            }
        }
        println!("</table>");
    }
}
