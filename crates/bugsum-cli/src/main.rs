#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use output::{OutputMode, resolve_output_mode};
use std::env;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    name = "bugsum",
    author,
    version,
    about = "bugsum: journal-backed bug summary counts",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (overrides `FORMAT` and the user config).
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Emit JSON output; shorthand for `--format json`.
    #[arg(long, global = true)]
    json: bool,

    /// Project root holding `.bugsum/` (defaults to the current directory).
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Create the config and summary database",
        long_about = "Write .bugsum/config.toml with defaults and create or migrate the summary database.",
        after_help = "EXAMPLES:\n    # Initialize in the current directory\n    bugsum init\n\n    # Reset config to defaults\n    bugsum init --force"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Fold journal deltas into the aggregate",
        long_about = "Run the rollup compactor once, or until the journal is empty. Exits 0 when another rollup holds the lock.",
        after_help = "EXAMPLES:\n    # One batch of the configured size\n    bugsum rollup\n\n    # Drain everything in 500-row batches\n    bugsum rollup --batch-size 500 --until-empty\n\n    # Emit machine-readable output\n    bugsum rollup --all --json"
    )]
    Rollup(cmd::rollup::RollupArgs),

    #[command(
        next_help_heading = "Read",
        about = "Count bug tasks for a partial location key",
        long_about = "Sum aggregate rows and pending journal deltas matching the given dimensions.",
        after_help = "EXAMPLES:\n    # Open public bugs on product 10, all tags collapsed\n    bugsum count --product 10 --no-tag --public\n\n    # Triaged bugs tagged crash in a distribution, package rows excluded\n    bugsum count --distribution 1 --no-package --tag crash --status triaged"
    )]
    Count(cmd::count::CountArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show journal backlog and last rollup",
        after_help = "EXAMPLES:\n    bugsum status\n    bugsum status --json"
    )]
    Status(cmd::status::StatusArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Compare the summary with a task snapshot",
        long_about = "Recount every location from a JSON array of bug task images and report keys whose current count differs. Exits non-zero on mismatch.",
        after_help = "EXAMPLES:\n    bugsum verify --tasks snapshot.json"
    )]
    Verify(cmd::verify::VerifyArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Journal corrections from a task snapshot",
        long_about = "Recount from a JSON array of bug task images and journal the difference. The next rollup applies it.",
        after_help = "EXAMPLES:\n    bugsum rebuild --tasks snapshot.json\n    bugsum rollup --until-empty"
    )]
    Rebuild(cmd::verify::RebuildArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("BUGSUM_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "bugsum_core=debug,bugsum=debug,info"
        } else {
            "bugsum_core=info,warn"
        })
    });

    let format = env::var("BUGSUM_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project_root = match &cli.root {
        Some(root) => root.clone(),
        None => env::current_dir()?,
    };
    let output = cli.output_mode();
    debug!(root = %project_root.display(), ?output, "bugsum starting");

    match &cli.command {
        Commands::Init(args) => cmd::init::run_init(args, output, &project_root),
        Commands::Rollup(args) => cmd::rollup::run_rollup(args, output, &project_root),
        Commands::Count(args) => cmd::count::run_count(args, output, &project_root),
        Commands::Status(args) => cmd::status::run_status(args, output, &project_root),
        Commands::Verify(args) => cmd::verify::run_verify(args, output, &project_root),
        Commands::Rebuild(args) => cmd::verify::run_rebuild(args, output, &project_root),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_parses_before_and_after_subcommand() {
        let cli = Cli::parse_from(["bugsum", "--json", "status"]);
        assert!(cli.json);
        let cli = Cli::parse_from(["bugsum", "status", "--json"]);
        assert!(cli.json);
    }

    #[test]
    fn format_flag_parses() {
        let cli = Cli::parse_from(["bugsum", "count", "--format", "text"]);
        assert_eq!(cli.format, Some(OutputMode::Text));
    }

    #[test]
    fn root_flag_parses() {
        let cli = Cli::parse_from(["bugsum", "--root", "/srv/bugs", "status"]);
        assert_eq!(cli.root, Some(PathBuf::from("/srv/bugs")));
    }

    #[test]
    fn rollup_flags_parse() {
        let cli = Cli::parse_from(["bugsum", "rollup", "--batch-size", "50", "--until-empty"]);
        let Commands::Rollup(args) = cli.command else {
            panic!("expected rollup");
        };
        assert_eq!(args.batch_size, Some(50));
        assert!(args.until_empty);
        assert!(!args.all);
    }

    #[test]
    fn rollup_batch_size_conflicts_with_all() {
        let result = Cli::try_parse_from(["bugsum", "rollup", "--batch-size", "5", "--all"]);
        assert!(result.is_err());
    }

    #[test]
    fn count_parses_enums_and_null_flags() {
        let cli = Cli::parse_from([
            "bugsum",
            "count",
            "--distribution",
            "1",
            "--no-package",
            "--status",
            "fix-released",
            "--importance",
            "high",
        ]);
        let Commands::Count(args) = cli.command else {
            panic!("expected count");
        };
        assert_eq!(args.distribution, Some(1));
        assert!(args.no_package);
        assert_eq!(
            args.status,
            Some(bugsum_core::model::BugTaskStatus::FixReleased)
        );
        assert_eq!(
            args.importance,
            Some(bugsum_core::model::BugTaskImportance::High)
        );
    }

    #[test]
    fn count_tag_conflicts_with_no_tag() {
        let result = Cli::try_parse_from(["bugsum", "count", "--tag", "ui", "--no-tag"]);
        assert!(result.is_err());
    }

    #[test]
    fn count_rejects_unknown_status() {
        let result = Cli::try_parse_from(["bugsum", "count", "--status", "sleeping"]);
        assert!(result.is_err());
    }

    #[test]
    fn verify_requires_tasks() {
        assert!(Cli::try_parse_from(["bugsum", "verify"]).is_err());
        assert!(Cli::try_parse_from(["bugsum", "verify", "--tasks", "t.json"]).is_ok());
        assert!(Cli::try_parse_from(["bugsum", "rebuild", "--tasks", "t.json"]).is_ok());
    }
}
