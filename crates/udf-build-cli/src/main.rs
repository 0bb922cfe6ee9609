//! UDF Build CLI
//!
//! The `udf-build` command compiles a batch of user-defined functions into
//! the shared deployment JAR.
//!
//! ## Commands
//!
//! - `build`: Compile a JSON file of definitions and replace the archive
//! - `inspect`: Show the classes, digest and size of an existing archive

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};

use udf_build::{BuildConfig, CancelHandle, FunctionDefinition, JarArtifact, UdfJarBuilder};

#[derive(Parser)]
#[command(name = "udf-build")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile user-defined functions into a deployable JAR", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a batch of definitions and write the archive
    Build {
        /// JSON file holding an array of function definitions
        #[arg(short, long)]
        definitions: PathBuf,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Archive path (overrides config and UDF_BUILD_OUTPUT)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Maximum number of units compiled at once
        #[arg(short, long)]
        workers: Option<usize>,

        /// Per-unit time budget in seconds
        #[arg(long)]
        unit_timeout_secs: Option<u64>,

        /// Print the full build output as JSON instead of a summary
        #[arg(long)]
        json_report: bool,
    },

    /// Show what an archive contains
    Inspect {
        /// Path to the archive
        archive: PathBuf,
    },
}

/// Command-line overrides applied on top of file and environment config.
#[derive(Debug, Default)]
struct Overrides {
    output: Option<PathBuf>,
    workers: Option<usize>,
    unit_timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    udf_build::init_tracing(cli.json, level);

    match cli.command {
        Commands::Build {
            definitions,
            config,
            output,
            workers,
            unit_timeout_secs,
            json_report,
        } => {
            let overrides = Overrides {
                output,
                workers,
                unit_timeout_secs,
            };
            let config = load_config(config.as_deref(), overrides)?;
            cmd_build(config, &definitions, json_report).await
        }
        Commands::Inspect { archive } => cmd_inspect(&archive),
    }
}

fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<BuildConfig> {
    let base = match path {
        Some(path) => BuildConfig::from_toml_file(path)?,
        None => BuildConfig::default(),
    };
    let mut config = base
        .apply_env()
        .context("Invalid UDF_BUILD_* environment")?;

    if let Some(output) = overrides.output {
        config.output_path = output;
    }
    if let Some(workers) = overrides.workers {
        config.max_workers = workers;
    }
    if let Some(secs) = overrides.unit_timeout_secs {
        config.unit_timeout_ms = secs.saturating_mul(1000);
    }
    config.validate()?;
    Ok(config)
}

fn read_definitions(path: &Path) -> Result<Vec<FunctionDefinition>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid definitions in {}", path.display()))
}

async fn cmd_build(config: BuildConfig, definitions: &Path, json_report: bool) -> Result<()> {
    let defs = read_definitions(definitions)?;
    let builder = UdfJarBuilder::new(config).context("Failed to set up build")?;

    let cancel = CancelHandle::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling batch");
                cancel.cancel();
            }
        })
    };

    let result = builder.build_with_cancel(&defs, cancel.signal()).await;
    ctrl_c.abort();
    let output = result.context("Build batch failed")?;

    if json_report {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Batch: {}", output.batch_id);
        println!("Duration: {}ms", output.duration_ms);
        println!();
        println!("{}", output.summary());
        for failure in &output.failures {
            println!("  ✗ {} [{}]: {}", failure.class_name, failure.kind, failure.reason);
        }
    }

    info!(
        success = output.report.success.len(),
        failed = output.report.failed.len(),
        "build finished"
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct InspectOutput {
    path: PathBuf,
    classes: Vec<String>,
    digest: String,
    size_bytes: u64,
    entries: Vec<String>,
}

fn inspect(archive: &Path) -> Result<InspectOutput> {
    let artifact = JarArtifact::inspect(archive)
        .with_context(|| format!("Failed to read archive {}", archive.display()))?;
    let entries = artifact.entry_names()?;
    Ok(InspectOutput {
        path: artifact.path,
        classes: artifact.classes,
        digest: artifact.digest,
        size_bytes: artifact.size_bytes,
        entries,
    })
}

fn cmd_inspect(archive: &Path) -> Result<()> {
    let out = inspect(archive)?;
    println!("Archive: {}", out.path.display());
    println!("Digest: {}", out.digest);
    println!("Size: {} bytes", out.size_bytes);
    println!("Classes ({}):", out.classes.len());
    for class in &out.classes {
        println!("  {}", class);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_build_flags() {
        let cli = Cli::try_parse_from([
            "udf-build",
            "--verbose",
            "build",
            "--definitions",
            "defs.json",
            "--workers",
            "3",
            "--unit-timeout-secs",
            "5",
            "--json-report",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Build {
                definitions,
                workers,
                unit_timeout_secs,
                json_report,
                ..
            } => {
                assert_eq!(definitions, PathBuf::from("defs.json"));
                assert_eq!(workers, Some(3));
                assert_eq!(unit_timeout_secs, Some(5));
                assert!(json_report);
            }
            Commands::Inspect { .. } => panic!("expected build command"),
        }
    }

    #[test]
    fn test_overrides_win_over_config_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cfg_path = temp_dir.path().join("udf.toml");
        std::fs::write(
            &cfg_path,
            "output_path = \"/srv/udf/from-file.jar\"\nmax_workers = 2\n",
        )
        .unwrap();

        let overrides = Overrides {
            output: Some(temp_dir.path().join("cli.jar")),
            workers: None,
            unit_timeout_secs: Some(7),
        };
        let config = load_config(Some(&cfg_path), overrides).unwrap();
        assert_eq!(config.output_path, temp_dir.path().join("cli.jar"));
        assert_eq!(config.unit_timeout_ms, 7_000);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let overrides = Overrides {
            workers: Some(0),
            ..Overrides::default()
        };
        assert!(load_config(None, overrides).is_err());
    }

    #[test]
    fn test_read_definitions_uses_camel_case_keys() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("defs.json");
        std::fs::write(
            &path,
            r#"[{"name": "t1", "className": "udfs.lower", "dialect": "python", "code": "def lower(s):\n    return s\n"}]"#,
        )
        .unwrap();

        let defs = read_definitions(&path).unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].class_name, "udfs.lower");
        assert_eq!(defs[0].dialect, "python");
    }

    #[test]
    fn test_read_definitions_rejects_bad_json() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("defs.json");
        std::fs::write(&path, "{not json").unwrap();

        let msg = format!("{:#}", read_definitions(&path).unwrap_err());
        assert!(msg.contains("Invalid definitions"), "unexpected error: {msg}");
    }

    #[tokio::test]
    async fn test_build_then_inspect_python_batch() {
        let temp_dir = tempfile::tempdir().unwrap();
        let defs_path = temp_dir.path().join("defs.json");
        std::fs::write(
            &defs_path,
            r#"[{"name": "t1", "className": "udfs.lower", "dialect": "python", "code": "def lower(s):\n    return s.lower()\n"}]"#,
        )
        .unwrap();

        let config = BuildConfig {
            workspace_root: temp_dir.path().join("work"),
            max_workers: 1,
            ..BuildConfig::with_output(temp_dir.path().join("udf.jar"))
        };
        cmd_build(config, &defs_path, true).await.unwrap();

        let out = inspect(&temp_dir.path().join("udf.jar")).unwrap();
        assert_eq!(out.classes, vec!["udfs.lower"]);
        assert_eq!(out.digest.len(), 64);
        assert!(out.entries.contains(&"udf/py/udfs/lower.py".to_string()));
    }

    #[test]
    fn test_inspect_missing_archive_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = inspect(&temp_dir.path().join("absent.jar")).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read archive"));
    }
}
