use anyhow::{Context, Result};
use changeset_patcher::{
    load_from_str, Applied, ApplyReport, ChangeType, Changeset, ChangesetProcessor, MatchMode,
    PathSandbox, ProcessorOptions, SkipReason, WriteMode,
};
use clap::{Parser, Subcommand};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "changeset-patcher")]
#[command(about = "Apply JSON changesets to files on disk", long_about = None)]
#[command(version)]
struct Cli {
    /// Log every dispatched change to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a changeset to a root directory
    Apply {
        /// Root directory that all paths are confined to (defaults to CHANGESET_ROOT, then the current directory)
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Changeset JSON file, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Write files via tempfile + rename instead of in place
        #[arg(long)]
        atomic: bool,

        /// Match anchors byte-for-byte instead of ignoring surrounding whitespace
        #[arg(long)]
        exact: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Parse and validate a changeset without applying it
    Check {
        /// Changeset JSON file, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Apply {
            root,
            input,
            atomic,
            exact,
            diff,
        } => cmd_apply(root, &input, atomic, exact, diff),

        Commands::Check { input } => cmd_check(&input),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Resolve the root directory
///
/// Priority order:
/// 1. Explicit --root flag
/// 2. CHANGESET_ROOT environment variable
/// 3. Current directory
fn resolve_root(cli_root: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = cli_root {
        return path
            .canonicalize()
            .with_context(|| format!("root directory {} is not accessible", path.display()));
    }

    if let Ok(env_path) = env::var("CHANGESET_ROOT") {
        let path = PathBuf::from(&env_path);
        if path.is_dir() {
            return Ok(path.canonicalize()?);
        }
        eprintln!(
            "{}",
            format!(
                "Warning: CHANGESET_ROOT is set but is not a directory: {}",
                env_path
            )
            .yellow()
        );
    }

    Ok(env::current_dir()?)
}

fn read_input(input: &Path) -> Result<String> {
    if input == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read changeset from stdin")?;
        return Ok(buffer);
    }

    fs::read_to_string(input)
        .with_context(|| format!("failed to read changeset from {}", input.display()))
}

/// Files a changeset may touch, resolved against the root.
fn touched_files(changeset: &Changeset, sandbox: &PathSandbox) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for file in &changeset.files {
        files.push(sandbox.resolve(&file.path));
        for change in &file.changes {
            if change.change_type == ChangeType::RenameFile {
                files.push(sandbox.resolve(change.new_text()));
            }
        }
    }
    files
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (changed)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
        if change.missing_newline() {
            println!();
        }
    }
}

fn cmd_apply(
    root: Option<PathBuf>,
    input: &Path,
    atomic: bool,
    exact: bool,
    show_diff: bool,
) -> Result<()> {
    let root = resolve_root(root)?;
    let json = read_input(input)?;

    let changeset = load_from_str(&json).context("changeset rejected")?;

    println!("Root: {}", root.display());
    if !changeset.description.is_empty() {
        println!("Changeset: {}", changeset.description);
    }
    println!();

    // Capture contents before applying, for diff output
    let mut contents_before: BTreeMap<PathBuf, String> = BTreeMap::new();
    if show_diff {
        let sandbox = PathSandbox::new(&root)?;
        for file in touched_files(&changeset, &sandbox) {
            let content = fs::read_to_string(&file).unwrap_or_default();
            contents_before.entry(file).or_insert(content);
        }
    }

    let options = ProcessorOptions {
        match_mode: if exact {
            MatchMode::Exact
        } else {
            MatchMode::Trimmed
        },
        write_mode: if atomic {
            WriteMode::Atomic
        } else {
            WriteMode::Direct
        },
    };
    let mut processor =
        ChangesetProcessor::with_options(root.to_string_lossy().into_owned(), options);
    let report = processor.apply_changeset(&changeset)?;

    print_report(&report);

    if show_diff {
        for (file, before) in &contents_before {
            let after = fs::read_to_string(file).unwrap_or_default();
            if before != &after {
                display_diff(file, before, &after);
            }
        }
    }

    let summary = Summary::from_report(&report);
    println!();
    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", summary.applied).green());
    println!("  {} unchanged", format!("{}", summary.unchanged).yellow());
    println!("  {} skipped", format!("{}", summary.skipped).red());
    println!("  {} files written", summary.files_written);

    if summary.skipped > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn print_report(report: &ApplyReport) {
    for record in &report.records {
        let label = format!(
            "{}[{}] {}",
            record.path, record.change_index, record.change_type
        );
        match &record.outcome {
            Ok(applied @ Applied::Unchanged { .. }) => {
                println!("{} {}: {}", "⊙".yellow(), label, applied);
            }
            Ok(applied) => {
                println!("{} {}: {}", "✓".green(), label, applied);
            }
            Err(skipped) => {
                eprintln!("{} {}: {}", "✗".red(), label, skipped);

                match &skipped.reason {
                    SkipReason::AnchorNotFound { .. } => {
                        eprintln!("  {}", "CONFLICT: oldContent matched no location".red());
                        eprintln!("  Possible causes:");
                        eprintln!("    - An earlier change already rewrote these lines");
                        eprintln!("    - The file changed since the changeset was produced");
                        eprintln!("    - Indentation differs and --exact is set");
                    }
                    SkipReason::OutsideRoot { root } => {
                        eprintln!(
                            "  {}",
                            format!("SANDBOX: refused to leave {}", root.display()).red()
                        );
                    }
                    _ => {}
                }
            }
        }
    }
}

struct Summary {
    applied: usize,
    unchanged: usize,
    skipped: usize,
    files_written: usize,
}

impl Summary {
    fn from_report(report: &ApplyReport) -> Self {
        let unchanged = report
            .applied()
            .filter(|applied| matches!(applied, Applied::Unchanged { .. }))
            .count();
        Self {
            applied: report.applied().count() - unchanged,
            unchanged,
            skipped: report.skipped().count(),
            files_written: report.files_written,
        }
    }
}

fn cmd_check(input: &Path) -> Result<()> {
    let json = read_input(input)?;
    let changeset = load_from_str(&json).context("changeset rejected")?;

    println!("{}", "Changeset is valid".green().bold());
    if !changeset.description.is_empty() {
        println!("Description: {}", changeset.description);
    }
    println!(
        "{} file entries, {} changes",
        changeset.files.len(),
        changeset.change_count()
    );

    let mut by_type: BTreeMap<&'static str, usize> = BTreeMap::new();
    for change in changeset.files.iter().flat_map(|file| &file.changes) {
        *by_type.entry(change.change_type.as_str()).or_default() += 1;
    }
    for (change_type, count) in by_type {
        println!("  {:<16} {}", change_type, count);
    }

    Ok(())
}
