//! tenantfs operator commands.
//!
//! ## Usage
//!
//! ```bash
//! # Create the root and trash directories of a configured tenant
//! tenantfs init alice.example.net
//!
//! # Check a tenant; findings are printed as JSON lines on stdout
//! tenantfs check fs alice.example.net
//! tenantfs check fs alice.example.net --files-consistency --fail-fast
//!
//! # Disk usage and quota
//! tenantfs du alice.example.net
//! tenantfs set-disk-quota alice.example.net 10737418240
//! ```
//!
//! Logs go to stderr (`RUST_LOG` overrides the default `info` level).

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tenantfs_vfs::config::DEFAULT_CONFIG_FILE;
use tenantfs_vfs::{Deployment, FsckOptions, TenantfsConfig, fsck};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Operator commands for a tenantfs deployment.
#[derive(Parser, Debug)]
#[command(name = "tenantfs")]
#[command(about = "Operator commands for tenantfs deployments")]
struct Cli {
    /// Deployment configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the reserved directories and storage namespace of a tenant
    Init {
        domain: String,
    },
    /// Consistency checks
    Check {
        #[command(subcommand)]
        what: CheckCommand,
    },
    /// Print disk usage and quota of a tenant
    Du {
        domain: String,
    },
    /// Set the disk quota of a tenant, in bytes (0 = unlimited)
    SetDiskQuota {
        domain: String,
        quota: u64,
    },
}

#[derive(Subcommand, Debug)]
enum CheckCommand {
    /// Check the tree index and its agreement with stored content
    Fs(FsckArgs),
}

#[derive(Args, Debug)]
struct FsckArgs {
    domain: String,

    /// Only check the index tree
    #[arg(long)]
    index_integrity: bool,

    /// Only check index against stored content
    #[arg(long)]
    files_consistency: bool,

    /// Stop at the first finding
    #[arg(long)]
    fail_fast: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = TenantfsConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Command::Init { domain } => {
            let vfs = Deployment::new(config).open(&domain)?;
            vfs.init().await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Check {
            what: CheckCommand::Fs(args),
        } => check_fs(config, args).await,
        Command::Du { domain } => {
            let vfs = Deployment::new(config).open(&domain)?;
            let usage = vfs.disk_usage().await?;
            match vfs.disk_quota() {
                0 => println!("{usage}\tunlimited"),
                quota => println!("{usage}\t{quota}"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::SetDiskQuota { domain, quota } => {
            let mut config = config;
            config.instance_mut(&domain)?.disk_quota = quota;
            config
                .save(&cli.config)
                .with_context(|| format!("saving {}", cli.config.display()))?;
            info!(%domain, quota, "disk quota saved");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn check_fs(config: TenantfsConfig, args: FsckArgs) -> Result<ExitCode> {
    let deployment = Deployment::new(config);
    let vfs = deployment.open(&args.domain)?;
    let opts = FsckOptions::from_flags(args.index_integrity, args.files_consistency, args.fail_fast);

    let mut out = std::io::stdout();
    let mut write_err = None;
    let summary = fsck(&vfs, opts, |log| {
        if write_err.is_some() {
            return;
        }
        let line = serde_json::to_string(&log).map_err(anyhow::Error::from);
        if let Err(e) = line.and_then(|l| writeln!(out, "{l}").map_err(anyhow::Error::from)) {
            write_err = Some(e);
        }
    })
    .await?;
    deployment.shutdown().await;
    if let Some(e) = write_err {
        return Err(e.context("writing fsck findings"));
    }

    if summary.findings > 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_check_fs() {
        let cli = Cli::try_parse_from([
            "tenantfs",
            "check",
            "fs",
            "alice.example.net",
            "--fail-fast",
            "--index-integrity",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        let Command::Check {
            what: CheckCommand::Fs(args),
        } = cli.command
        else {
            panic!("expected check fs");
        };
        assert_eq!(args.domain, "alice.example.net");
        assert!(args.fail_fast && args.index_integrity && !args.files_consistency);
    }

    #[test]
    fn test_parse_set_disk_quota() {
        let cli = Cli::try_parse_from([
            "tenantfs",
            "--config",
            "/etc/tenantfs.toml",
            "set-disk-quota",
            "alice.example.net",
            "1024",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/tenantfs.toml"));
        assert!(matches!(
            cli.command,
            Command::SetDiskQuota { quota: 1024, .. }
        ));
    }
}
