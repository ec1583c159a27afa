//! stagehand CLI
//!
//! Entry point for the `stagehand` command-line tool.

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Map, Value};
use stagehand::config::EffectiveConfig;
use stagehand::logging::{init_logging, LogFormat};
use stagehand::remote::{shell_for, DirectoryFetcher, HttpDav, RemoteEndpoint, RemotePathOperator, RemoteShell};
use stagehand::{ExitCode, Janitor, ShutdownSignal, StagehandConfig, StagingOptions, StagingOrchestrator};
use std::env;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(about = "Work-directory janitor and remote staging", version)]
struct Cli {
    /// Config file (default: $STAGEHAND_CONFIG or ~/.config/stagehand/stagehand.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Log as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one retention pass over the work tree
    Janitor {
        /// Work tree root
        #[arg(long)]
        root: Option<PathBuf>,

        /// Lock file guarding against concurrent janitors
        #[arg(long)]
        lock_path: Option<PathBuf>,

        /// Report candidates without deleting
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remote staging operations
    Stage {
        #[command(subcommand)]
        action: StageCommands,
    },

    /// Recursively download a WebDAV collection
    Fetch {
        /// Collection URL (dav://, davs://, http://, https://)
        url: String,

        /// Local destination directory
        #[arg(long, default_value = ".")]
        dest: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum StageCommands {
    /// Upload a local product and write its done marker
    Upload {
        /// Local file or directory
        local: PathBuf,

        /// Destination (ssh://user@host/path, user@host:/path, file:///path)
        remote: String,

        /// Re-upload even if the marker already exists
        #[arg(long)]
        force: bool,

        /// Print the receipt as JSON
        #[arg(long)]
        json: bool,
    },

    /// Move a path on the remote host, replacing any existing destination
    Move {
        /// Host endpoint (ssh://user@host, file://)
        endpoint: String,
        src: String,
        dest: String,

        /// Write the destination's done marker after the move
        #[arg(long)]
        mark: bool,
    },

    /// Remove a remote path
    Remove {
        remote: String,

        /// Empty the directory but keep it
        #[arg(long)]
        contents: bool,
    },

    /// Copy a remote path into a local directory
    Pull {
        remote: String,

        /// Local destination directory
        #[arg(long, default_value = ".")]
        dest: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration and its sources
    Show,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            process::exit(parse_exit_code(&e).as_i32());
        }
    };

    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    if let Err(e) = init_logging(cli.verbose, format) {
        eprintln!("Error: {}", e);
        process::exit(ExitCode::Failure.as_i32());
    }

    let code = match cli.command {
        Commands::Janitor {
            root,
            lock_path,
            dry_run,
            json,
        } => run_janitor(cli.config, root, lock_path, dry_run, json),
        Commands::Stage { action } => run_stage(cli.config, action),
        Commands::Fetch { url, dest, json } => run_fetch(cli.config, &url, &dest, json),
        Commands::Config { action } => match action {
            ConfigCommands::Show => run_config_show(cli.config),
        },
    };
    process::exit(code.as_i32());
}

/// `--help` and `--version` also arrive as parse errors.
fn parse_exit_code(err: &clap::Error) -> ExitCode {
    if err.use_stderr() {
        ExitCode::Usage
    } else {
        ExitCode::Success
    }
}

fn fail(context: &str, e: impl Display) -> ExitCode {
    eprintln!("Error: {}: {}", context, e);
    ExitCode::Failure
}

fn load_config(path: Option<PathBuf>, overrides: Option<Value>) -> Result<EffectiveConfig, ExitCode> {
    EffectiveConfig::load(path.as_deref(), overrides).map_err(|e| fail("loading config", e))
}

fn print_json(value: &impl Serialize) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(s) => {
            println!("{}", s);
            ExitCode::Success
        }
        Err(e) => fail("serializing output", e),
    }
}

/// CLI flags as a config layer; only flags actually given are present.
fn janitor_overrides(root: Option<PathBuf>, lock_path: Option<PathBuf>, dry_run: bool) -> Option<Value> {
    let mut janitor = Map::new();
    if let Some(root) = root {
        janitor.insert("root".to_string(), json!(absolute(&root).to_string_lossy()));
    }
    if let Some(lock_path) = lock_path {
        janitor.insert("lock_path".to_string(), json!(absolute(&lock_path).to_string_lossy()));
    }
    if dry_run {
        janitor.insert("dry_run".to_string(), json!(true));
    }
    if janitor.is_empty() {
        None
    } else {
        Some(json!({ "janitor": janitor }))
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn run_janitor(
    config_path: Option<PathBuf>,
    root: Option<PathBuf>,
    lock_path: Option<PathBuf>,
    dry_run: bool,
    json: bool,
) -> ExitCode {
    let config = match load_config(config_path, janitor_overrides(root, lock_path, dry_run)) {
        Ok(c) => c.into_typed(),
        Err(code) => return code,
    };

    let shutdown = ShutdownSignal::new();
    if let Err(e) = shutdown.install() {
        return fail("installing signal handler", e);
    }

    let janitor = match Janitor::from_config(&config, shutdown) {
        Ok(j) => j,
        Err(e) => return fail("configuring janitor", e),
    };

    let report = janitor.run();
    if json {
        if print_json(&report) == ExitCode::Failure {
            return ExitCode::Failure;
        }
    } else {
        println!("{}", report.human_summary());
        if let Some(gc) = &report.gc {
            for candidate in &gc.candidates {
                println!("  {}{}", if gc.dry_run { "would delete " } else { "deleted " }, candidate.display());
            }
        }
    }
    ExitCode::from_i32(report.exit_code).unwrap_or(ExitCode::Failure)
}

/// Resolve a shell for `url` and hand back the path part.
fn shell_and_path(config: &StagehandConfig, url: &str) -> Result<(Box<dyn RemoteShell>, String), ExitCode> {
    let endpoint = RemoteEndpoint::parse(url).map_err(|e| fail("parsing endpoint", e))?;
    let shell = shell_for(&endpoint, &config.ssh, config.transfer).map_err(|e| fail("connecting", e))?;
    Ok((shell, endpoint.path().to_string()))
}

fn run_stage(config_path: Option<PathBuf>, action: StageCommands) -> ExitCode {
    let config = match load_config(config_path, None) {
        Ok(c) => c.into_typed(),
        Err(code) => return code,
    };

    match action {
        StageCommands::Upload {
            local,
            remote,
            force,
            json,
        } => {
            let (shell, path) = match shell_and_path(&config, &remote) {
                Ok(v) => v,
                Err(code) => return code,
            };
            let staging = StagingOrchestrator::new(shell, StagingOptions { force });
            match staging.stage_for_ingest(&local, &path) {
                Ok(receipt) if json => print_json(&receipt),
                Ok(receipt) => {
                    println!("{:?} {} (marker {})", receipt.outcome, receipt.remote_path, receipt.marker_path);
                    ExitCode::Success
                }
                Err(e) => fail("upload", e),
            }
        }
        StageCommands::Move {
            endpoint,
            src,
            dest,
            mark,
        } => {
            let (shell, _) = match shell_and_path(&config, &endpoint) {
                Ok(v) => v,
                Err(code) => return code,
            };
            if mark {
                let staging = StagingOrchestrator::new(shell, StagingOptions::default());
                match staging.publish(&src, &dest) {
                    Ok(receipt) => {
                        println!("{} (marker {})", receipt.remote_path, receipt.marker_path);
                        ExitCode::Success
                    }
                    Err(e) => fail("move", e),
                }
            } else {
                match RemotePathOperator::new(shell).move_path(&src, &dest) {
                    Ok(moved) => {
                        println!("{}", moved);
                        ExitCode::Success
                    }
                    Err(e) => fail("move", e),
                }
            }
        }
        StageCommands::Remove { remote, contents } => {
            let (shell, path) = match shell_and_path(&config, &remote) {
                Ok(v) => v,
                Err(code) => return code,
            };
            let operator = RemotePathOperator::new(shell);
            let result = if contents {
                operator.remove_path_contents(&path)
            } else {
                operator.remove_path(&path)
            };
            match result {
                Ok(()) => ExitCode::Success,
                Err(e) => fail("remove", e),
            }
        }
        StageCommands::Pull { remote, dest } => {
            let (shell, path) = match shell_and_path(&config, &remote) {
                Ok(v) => v,
                Err(code) => return code,
            };
            let staging = StagingOrchestrator::new(shell, StagingOptions::default());
            match staging.pull(&path, &dest) {
                Ok(local) => {
                    println!("{}", local.display());
                    ExitCode::Success
                }
                Err(e) => fail("pull", e),
            }
        }
    }
}

fn run_fetch(config_path: Option<PathBuf>, url: &str, dest: &Path, json: bool) -> ExitCode {
    let config = match load_config(config_path, None) {
        Ok(c) => c.into_typed(),
        Err(code) => return code,
    };

    let endpoint = match RemoteEndpoint::parse(url) {
        Ok(e) => e,
        Err(e) => return fail("parsing URL", e),
    };
    let transport = match HttpDav::for_endpoint(&endpoint, config.transfer) {
        Ok(t) => t,
        Err(e) => return fail("building HTTP client", e),
    };

    match DirectoryFetcher::new(transport, dest).fetch(&endpoint) {
        Ok(report) if json => print_json(&report),
        Ok(report) => {
            println!(
                "{} ({} files, {} bytes)",
                report.local_root.display(),
                report.files.len(),
                report.bytes
            );
            ExitCode::Success
        }
        Err(e) => fail("fetch", e),
    }
}

fn run_config_show(config_path: Option<PathBuf>) -> ExitCode {
    match load_config(config_path, None) {
        Ok(config) => print_json(&config),
        Err(code) => code,
    }
}
