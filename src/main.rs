use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use fixture_patcher::builtin;
use fixture_patcher::config::{
    check_patches, load_all, read_fixture_version, run_patch_set, ApplicationError, Operation,
    PatchResult, PatchSet, Query,
};
use similar::{ChangeTag, TextDiff};
use std::env;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const BUILTIN_PREFIX: &str = "builtin:";

#[derive(Parser)]
#[command(name = "fixture-patcher")]
#[command(about = "Patch installed files into a known state for RBAC integration tests", long_about = None)]
#[command(version)]
struct Cli {
    /// Defaults to `apply` with the built-in rbac-white patch set
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Clone, Default)]
struct Target {
    /// Fixture root that patch paths resolve against (default: $FIXTURE_ROOT, then cwd)
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Patch set file, directory of patch sets, or builtin:<name> (repeatable)
    #[arg(short, long)]
    patches: Vec<PathBuf>,

    /// Fixture version checked against version_range (default: <root>/VERSION)
    #[arg(long)]
    target_version: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply patch sets to a fixture
    Apply {
        #[command(flatten)]
        target: Target,

        /// Dry run - show what would be changed without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Check status of patches without applying
    Status {
        #[command(flatten)]
        target: Target,
    },

    /// Succeed only if every patch is already applied
    Verify {
        #[command(flatten)]
        target: Target,
    },

    /// List patch sets and their patches
    List {
        /// Patch set file, directory of patch sets, or builtin:<name> (repeatable)
        #[arg(short, long)]
        patches: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        None => cmd_apply(Target::default(), false, false),
        Some(Commands::Apply {
            target,
            dry_run,
            diff,
        }) => cmd_apply(target, dry_run, diff),
        Some(Commands::Status { target }) => cmd_status(target),
        Some(Commands::Verify { target }) => cmd_verify(target),
        Some(Commands::List { patches }) => cmd_list(&patches),
    }
}

/// Diagnostics go to stderr, filtered by FIXTURE_PATCHER_LOG (default: warn).
fn init_tracing() {
    let filter = EnvFilter::try_from_env("FIXTURE_PATCHER_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Resolve the fixture root.
///
/// Priority order:
/// 1. Explicit --root flag
/// 2. FIXTURE_ROOT environment variable
/// 3. Current directory
fn resolve_root(cli_root: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = cli_root {
        return path
            .canonicalize()
            .with_context(|| format!("fixture root does not exist: {}", path.display()));
    }

    if let Ok(env_root) = env::var("FIXTURE_ROOT") {
        let path = PathBuf::from(&env_root);
        return path
            .canonicalize()
            .with_context(|| format!("FIXTURE_ROOT is set but path doesn't exist: {env_root}"));
    }

    Ok(env::current_dir()?)
}

/// Load the selected patch sets, defaulting to the built-in one.
fn load_sets(sources: &[PathBuf]) -> Result<Vec<(String, PatchSet)>> {
    if sources.is_empty() {
        let label = format!("{BUILTIN_PREFIX}{}", builtin::DEFAULT_SET);
        return Ok(vec![(label, builtin::rbac_white()?)]);
    }

    let mut sets = Vec::new();
    for source in sources {
        if let Some(name) = source.to_str().and_then(|s| s.strip_prefix(BUILTIN_PREFIX)) {
            let set = builtin::by_name(name).with_context(|| {
                format!(
                    "unknown built-in patch set '{name}' (available: {})",
                    builtin::names().collect::<Vec<_>>().join(", ")
                )
            })??;
            sets.push((source.display().to_string(), set));
            continue;
        }

        for (file, set) in load_all(source)? {
            sets.push((file.display().to_string(), set));
        }
    }

    Ok(sets)
}

fn fixture_version(target: &Target, root: &Path) -> Option<String> {
    target
        .target_version
        .clone()
        .or_else(|| read_fixture_version(root))
}

fn print_header(title: Option<&str>, root: &Path, version: Option<&str>) {
    if let Some(title) = title {
        println!("{}", title.bold());
    }
    println!("Fixture root: {}", root.display());
    println!("Version: {}", version.unwrap_or("unknown"));
    println!();
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

/// Explain why a patch could not find its target.
fn print_conflict(error: &ApplicationError) {
    match error {
        ApplicationError::NoMatch { file, hint } => {
            eprintln!("  {}", "CONFLICT: Query matched no locations".red());
            eprintln!("  File: {}", file.display());
            match hint {
                Some(hint) => {
                    eprintln!("  Closest line {}: {:?}", hint.line_number, hint.text);
                    eprintln!("  The target line probably drifted (whitespace or comment style)");
                }
                None => {
                    eprintln!("  Possible causes:");
                    eprintln!("    - The fixture was installed from a different version");
                    eprintln!("    - The target text was renamed or removed");
                }
            }
        }
        ApplicationError::AmbiguousMatch { file, count } => {
            eprintln!(
                "  {}",
                format!("CONFLICT: Query matched {} locations (expected 1)", count).red()
            );
            eprintln!("  File: {}", file.display());
            eprintln!("  Action: use scope = \"all\" or \"first\", or a more specific query");
        }
        ApplicationError::MissingFile { file } => {
            eprintln!("  Is the fixture installed? Expected {}", file.display());
        }
        _ => {}
    }
}

fn cmd_apply(target: Target, dry_run: bool, show_diff: bool) -> Result<()> {
    let root = resolve_root(target.root.clone())?;
    let sets = load_sets(&target.patches)?;
    let version = fixture_version(&target, &root);

    print_header(None, &root, version.as_deref());

    let mut total_applied = 0;
    let mut total_already_applied = 0;
    let mut total_skipped = 0;
    let mut total_failed = 0;

    for (label, set) in &sets {
        println!("Loading patches from {}...", label);
        if dry_run {
            println!("{}", "  [DRY RUN - showing what would be applied]".cyan());
        }

        let report = run_patch_set(set, &root, version.as_deref(), dry_run);

        for (patch_id, result) in &report.outcomes {
            match result {
                Ok(PatchResult::Applied { file }) => {
                    let verb = if dry_run { "Would apply to" } else { "Applied to" };
                    println!("{} {}: {} {}", "✓".green(), patch_id, verb, file.display());
                    total_applied += 1;
                }
                Ok(PatchResult::AlreadyApplied { file }) => {
                    println!(
                        "{} {}: Already applied to {}",
                        "⊙".yellow(),
                        patch_id,
                        file.display()
                    );
                    total_already_applied += 1;
                }
                Ok(PatchResult::SkippedVersion { reason }) => {
                    println!("{} {}: Skipped ({})", "⊘".cyan(), patch_id, reason);
                    total_skipped += 1;
                }
                Err(e) => {
                    eprintln!("{} {}: Error - {}", "✗".red(), patch_id, e);
                    print_conflict(e);
                    total_failed += 1;
                }
            }
        }

        if show_diff {
            for change in &report.changes {
                display_diff(&change.file, &change.before, &change.after);
            }
        }

        println!();
    }

    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", total_applied).green());
    println!(
        "  {} already applied",
        format!("{}", total_already_applied).yellow()
    );
    println!("  {} skipped", format!("{}", total_skipped).cyan());
    println!("  {} failed", format!("{}", total_failed).red());

    if total_failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_status(target: Target) -> Result<()> {
    let root = resolve_root(target.root.clone())?;
    let sets = load_sets(&target.patches)?;
    let version = fixture_version(&target, &root);

    print_header(Some("Patch Status Report"), &root, version.as_deref());

    let mut applied = Vec::new();
    let mut not_applied = Vec::new();
    let mut skipped = Vec::new();

    for (_, set) in &sets {
        for (patch_id, result) in check_patches(set, &root, version.as_deref()) {
            match result {
                Ok(PatchResult::Applied { .. }) => {
                    not_applied.push((patch_id, "target found but not yet applied".to_string()));
                }
                Ok(PatchResult::AlreadyApplied { .. }) => applied.push(patch_id),
                Ok(PatchResult::SkippedVersion { reason }) => skipped.push((patch_id, reason)),
                Err(e) => not_applied.push((patch_id, e.to_string())),
            }
        }
    }

    if !applied.is_empty() {
        println!(
            "{} {} ({} patches)",
            "✓".green(),
            "APPLIED".green().bold(),
            applied.len()
        );
        for id in &applied {
            println!("  - {}", id);
        }
        println!();
    }

    if !not_applied.is_empty() {
        println!(
            "{} {} ({} patches)",
            "⊙".yellow(),
            "NOT APPLIED".yellow().bold(),
            not_applied.len()
        );
        for (id, reason) in &not_applied {
            println!("  - {} ({})", id, reason.dimmed());
        }
        println!();
    }

    if !skipped.is_empty() {
        println!(
            "{} {} ({} patches)",
            "⊘".cyan(),
            "SKIPPED".cyan().bold(),
            skipped.len()
        );
        for (id, reason) in &skipped {
            println!("  - {} ({})", id, reason.dimmed());
        }
        println!();
    }

    Ok(())
}

fn cmd_verify(target: Target) -> Result<()> {
    let root = resolve_root(target.root.clone())?;
    let sets = load_sets(&target.patches)?;
    let version = fixture_version(&target, &root);

    print_header(Some("Verifying patches..."), &root, version.as_deref());

    let mut verified = 0;
    let mut mismatch = 0;
    let mut skipped = 0;

    for (_, set) in &sets {
        for (patch_id, result) in check_patches(set, &root, version.as_deref()) {
            match result {
                Ok(PatchResult::AlreadyApplied { .. }) => {
                    println!("{} {}: Verified (already applied)", "✓".green(), patch_id);
                    verified += 1;
                }
                Ok(PatchResult::Applied { file }) => {
                    eprintln!("{} {}: MISMATCH", "✗".red(), patch_id);
                    eprintln!("  Expected: patch already applied");
                    eprintln!("  Found: patch not yet applied");
                    eprintln!("  Location: {}", file.display());
                    mismatch += 1;
                }
                Ok(PatchResult::SkippedVersion { reason }) => {
                    println!("{} {}: Skipped ({})", "⊘".cyan(), patch_id, reason);
                    skipped += 1;
                }
                Err(e) => {
                    eprintln!("{} {}: MISMATCH", "✗".red(), patch_id);
                    eprintln!("  Error: {}", e);
                    mismatch += 1;
                }
            }
        }
    }

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} verified", format!("{}", verified).green());
    println!("  {} mismatch", format!("{}", mismatch).red());
    println!("  {} skipped", format!("{}", skipped).cyan());

    if mismatch > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_list(sources: &[PathBuf]) -> Result<()> {
    for (label, set) in load_sets(sources)? {
        let name = if set.meta.name.is_empty() {
            label.as_str()
        } else {
            set.meta.name.as_str()
        };
        println!("{} ({})", name.bold(), label.dimmed());
        if let Some(description) = &set.meta.description {
            println!("  {}", description);
        }
        if let Some(range) = &set.meta.version_range {
            println!("  version_range: {}", range);
        }

        for patch in &set.patches {
            let query = match &patch.query {
                Query::Text { .. } => "text",
                Query::Line { .. } => "line",
                Query::Regex { .. } => "regex",
            };
            let operation = match &patch.operation {
                Operation::Replace { .. } => "replace",
                Operation::InjectPolicies { .. } => "inject-policies",
            };
            println!(
                "  - {} [{} -> {}, {:?}] {}",
                patch.id,
                query,
                operation,
                patch.operation.scope(),
                patch.file
            );
        }
        println!();
    }

    Ok(())
}
