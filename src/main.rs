use anyhow::Result;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

use ascmhl_core::cli::{run_create, run_create_single_files, run_diff, run_info, run_verify, ToolInfo};
use ascmhl_core::hash::HashAlgorithm;
use ascmhl_core::logging::{init_logging, LogConfig};

#[derive(Parser)]
#[command(name = "ascmhl", version, about = "Media Hash List directory history tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Seal a directory tree, creating a new generation.
    Create {
        root: Utf8PathBuf,
        #[arg(long, default_value = "c4")]
        hash_format: HashAlgorithm,
        #[arg(long = "ignore")]
        ignore_patterns: Vec<String>,
        /// Seal only the named file(s)/folder(s) instead of walking the
        /// whole root: no directory-hash folding, no missing-file detection.
        #[arg(long = "single-file", num_args = 1..)]
        single_file: Vec<Utf8PathBuf>,
    },
    /// Re-hash every file against the existing history and report mismatches.
    Verify {
        root: Utf8PathBuf,
        #[arg(long = "ignore")]
        ignore_patterns: Vec<String>,
    },
    /// Presence-only comparison between the tree and the recorded history.
    Diff {
        root: Utf8PathBuf,
        #[arg(long = "ignore")]
        ignore_patterns: Vec<String>,
    },
    /// Print every generation's recorded hash entries for one file.
    Info {
        root: Utf8PathBuf,
        #[arg(long)]
        file: String,
    },
}

fn main() -> Result<()> {
    init_logging(&LogConfig::default())?;

    let cli = Cli::parse();
    match cli.command {
        Command::Create { root, hash_format, ignore_patterns, single_file } => {
            let tool = ToolInfo {
                tool_name: "ascmhl".to_string(),
                tool_version: env!("CARGO_PKG_VERSION").to_string(),
                host_name: hostname(),
                process_type: "in-place".to_string(),
            };
            let report = if single_file.is_empty() {
                run_create(&root, hash_format, &ignore_patterns, &tool)?
            } else {
                run_create_single_files(&root, &single_file, hash_format, &tool)?
            };
            println!(
                "sealed {} generation file(s): {} original, {} verified, {} failed, {} missing",
                report.generation_files.len(),
                report.original_count,
                report.verified_count,
                report.failed.len(),
                report.missing.len()
            );
            for (path, algorithm, expected, actual) in &report.failed {
                println!("FAILED {path} ({algorithm}): expected {expected}, got {actual}");
            }
            for path in &report.missing {
                println!("MISSING {path}");
            }
            if !report.failed.is_empty() {
                std::process::exit(1);
            }
            if !report.missing.is_empty() {
                std::process::exit(2);
            }
        }
        Command::Verify { root, ignore_patterns } => {
            let report = run_verify(&root, &ignore_patterns)?;
            println!(
                "verified {} file(s): {} mismatch(es), {} missing, {} new",
                report.verified.len(),
                report.mismatches.len(),
                report.missing.len(),
                report.new.len()
            );
            for (path, algorithm, expected, actual) in &report.mismatches {
                println!("MISMATCH {path} ({algorithm}): expected {expected}, got {actual}");
            }
            for path in &report.missing {
                println!("MISSING {path}");
            }
            for path in &report.new {
                println!("NEW {path}");
            }
            if !report.mismatches.is_empty() {
                std::process::exit(1);
            }
            if !report.missing.is_empty() {
                std::process::exit(2);
            }
            if !report.new.is_empty() {
                std::process::exit(3);
            }
        }
        Command::Diff { root, ignore_patterns } => {
            let report = run_diff(&root, &ignore_patterns)?;
            for path in &report.missing {
                println!("MISSING {path}");
            }
            for path in &report.new {
                println!("NEW {path}");
            }
            if !report.missing.is_empty() || !report.new.is_empty() {
                std::process::exit(2);
            }
        }
        Command::Info { root, file } => {
            let report = run_info(&root, &file)?;
            println!("{}", report.relative_path);
            for (generation, algorithm, digest, action) in &report.entries {
                println!("  generation {generation}: {algorithm} {digest} ({action:?})");
            }
        }
    }

    Ok(())
}

fn hostname() -> String {
    hostname_from_env().unwrap_or_else(|| "unknown-host".to_string())
}

fn hostname_from_env() -> Option<String> {
    std::env::var("HOSTNAME").ok().or_else(|| std::env::var("COMPUTERNAME").ok())
}
