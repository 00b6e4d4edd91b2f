//! Thin CLI front-end: one `clap` subcommand per `EnvironmentManager`
//! method, `env_logger` installed here and nowhere else in the crate.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use gestvenv::diagnostic::DiagnosticMode;
use gestvenv::lifecycle::CreateOptions;
use gestvenv::models::BackendPreference;
use gestvenv::{EnvironmentManager, GestvenvError};

#[derive(Parser)]
#[command(name = "gestvenv", author, version, about = "Create, inspect, repair, and destroy Python virtual environments")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Override the application data directory (defaults to the
    /// platform-conventional location).
    #[arg(global = true, long)]
    app_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new environment.
    Create {
        name: String,
        #[arg(long, default_value = "3.11")]
        python: String,
        #[arg(long)]
        pyproject: Option<PathBuf>,
        #[arg(long, value_enum)]
        backend: Option<BackendChoice>,
        #[arg(long = "package")]
        packages: Vec<String>,
    },
    /// List every registered environment.
    List,
    /// Print the activation command for an environment.
    Activate { name: String },
    /// Clear the active-environment pointer.
    Deactivate,
    /// Delete an environment and its on-disk directory.
    Delete { name: String },
    /// Show one environment's record.
    Info { name: String },
    /// Install a requirement into an environment.
    Install {
        name: String,
        requirement: String,
        #[arg(long)]
        force_online: bool,
    },
    /// Reconcile an environment's packages with its pyproject.toml.
    Sync {
        name: String,
        #[arg(long = "group")]
        groups: Vec<String>,
        #[arg(long)]
        strict: bool,
    },
    /// Run the Diagnostic & Repair Engine, optionally applying fixes.
    Check {
        name: String,
        #[arg(long)]
        full: bool,
        #[arg(long)]
        fix: bool,
    },
    /// List the package backends available on this machine.
    Backend,
    /// Print the current configuration.
    Config,
    /// Print the CLI version.
    Version,
}

#[derive(Clone, clap::ValueEnum)]
enum BackendChoice {
    Auto,
    Pip,
    Uv,
    Poetry,
    Pdm,
}

impl From<BackendChoice> for BackendPreference {
    fn from(choice: BackendChoice) -> Self {
        match choice {
            BackendChoice::Auto => Self::Auto,
            BackendChoice::Pip => Self::Pip,
            BackendChoice::Uv => Self::Uv,
            BackendChoice::Poetry => Self::Poetry,
            BackendChoice::Pdm => Self::Pdm,
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let app_dir = cli
        .app_dir
        .clone()
        .unwrap_or_else(gestvenv::platform_adapter::app_data_dir);

    match run(cli, &app_dir) {
        Ok(()) => ExitCode::from(0),
        Err(error) => {
            log::error!("{error}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli, app_dir: &std::path::Path) -> Result<(), GestvenvError> {
    let mut manager = EnvironmentManager::open(app_dir)?;

    match cli.command {
        Command::Create {
            name,
            python,
            pyproject,
            backend,
            packages,
        } => {
            let outcome = manager.create(
                &name,
                &python,
                CreateOptions {
                    preference: backend.map(BackendPreference::from).unwrap_or_default(),
                    pyproject_path: pyproject,
                    initial_packages: packages,
                    ..CreateOptions::default()
                },
            )?;
            println!("created {name:?} at {:?}", outcome.environment.path);
            for (requirement, reason) in &outcome.failed_packages {
                log::warn!("failed to install {requirement:?}: {reason}");
            }
        }
        Command::List => {
            for environment in manager.list() {
                println!(
                    "{}\t{}\t{:?}\t{}",
                    environment.name,
                    environment.python_version,
                    environment.health,
                    environment.path.display()
                );
            }
        }
        Command::Activate { name } => {
            println!("{}", manager.activate(&name)?);
        }
        Command::Deactivate => manager.deactivate()?,
        Command::Delete { name } => manager.delete(&name)?,
        Command::Info { name } => {
            let environment = manager.info(&name)?;
            println!("{}", serde_json::to_string_pretty(&environment).unwrap_or_default());
        }
        Command::Install {
            name,
            requirement,
            force_online,
        } => {
            let installed = manager.install_package(&name, &requirement, force_online)?;
            println!("installed {} {}", installed.name, installed.version);
        }
        Command::Sync { name, groups, strict } => manager.sync(&name, &groups, strict)?,
        Command::Check { name, full, fix } => {
            let mode = if full { DiagnosticMode::Full } else { DiagnosticMode::Quick };
            if fix {
                let outcome = manager.repair(&name, true)?;
                println!(
                    "repair {}: {} action(s) taken",
                    if outcome.success { "succeeded" } else { "incomplete" },
                    outcome.actions_taken.len()
                );
            } else {
                let report = manager.diagnose(&name, mode)?;
                println!("{:?}: {} issue(s)", report.overall_status, report.issues.len());
                for issue in &report.issues {
                    println!("  [{:?}] {}: {}", issue.level, issue.category, issue.description);
                }
            }
        }
        Command::Backend => {
            for backend in manager.available_backends() {
                println!("{backend}");
            }
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(manager.config()).unwrap_or_default());
        }
        Command::Version => println!(env!("CARGO_PKG_VERSION")),
    }

    Ok(())
}
