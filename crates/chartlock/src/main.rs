//! chartlock command-line interface

use anyhow::Context;
use chartlock::{ChartDownloader, HttpGetter, Manager, Report, Settings, VerifyPolicy};
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chartlock")]
#[command(about = "Resolve, lock and fetch chart dependencies", long_about = None)]
#[command(version)]
struct Cli {
    /// Home directory for repository configuration and caches
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage a chart's dependencies
    Dep {
        #[command(subcommand)]
        command: DepCommands,
    },

    /// Manage chart repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },

    /// Download a chart by URL or repo/chart reference
    Fetch {
        /// URL or repo/chart
        reference: String,
        /// Version constraint for repo/chart references
        #[arg(long)]
        version: Option<String>,
        /// Directory to write the archive into
        #[arg(short, long, default_value = ".")]
        destination: PathBuf,
        #[command(flatten)]
        network: NetworkArgs,
    },
}

#[derive(Subcommand)]
enum DepCommands {
    /// Resolve requirements.yaml, download charts and rewrite requirements.lock
    Update {
        /// Chart directory
        #[arg(default_value = ".")]
        chart: PathBuf,
        #[command(flatten)]
        network: NetworkArgs,
    },
    /// Download the charts pinned in requirements.lock
    Build {
        /// Chart directory
        #[arg(default_value = ".")]
        chart: PathBuf,
        #[command(flatten)]
        network: NetworkArgs,
    },
    /// Show declared dependencies and their state in charts/
    List {
        /// Chart directory
        #[arg(default_value = ".")]
        chart: PathBuf,
    },
}

#[derive(Subcommand)]
enum RepoCommands {
    /// Refresh the cached index of every configured repository
    Sync {
        /// Per-request timeout in seconds
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,
    },
}

#[derive(Args)]
struct NetworkArgs {
    /// Do not refresh repository caches first
    #[arg(long)]
    skip_refresh: bool,
    /// Provenance verification: never, if-possible or always
    #[arg(long)]
    verify: Option<VerifyPolicy>,
    /// Public keys used for verification
    #[arg(long)]
    keyring: Option<PathBuf>,
    /// Per-request timeout in seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,
}

impl NetworkArgs {
    fn apply(&self, settings: &mut Settings) {
        if self.skip_refresh {
            settings.skip_refresh = true;
        }
        if let Some(verify) = self.verify {
            settings.verify = verify;
        }
        if let Some(keyring) = &self.keyring {
            settings.keyring = keyring.clone();
        }
        if let Some(secs) = self.timeout {
            settings.timeout = std::time::Duration::from_secs(secs);
        }
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        for cause in e.chain().skip(1) {
            eprintln!("  {cause}");
        }
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env = if cli.debug {
        Env::default().default_filter_or("debug")
    } else {
        Env::default().default_filter_or("info")
    };
    env_logger::Builder::from_env(env).format_timestamp(None).init();

    let mut settings = Settings::load(cli.home).context("failed to load settings")?;

    match cli.command {
        Commands::Dep { command } => match command {
            DepCommands::Update { chart, network } => {
                network.apply(&mut settings);
                let getter = HttpGetter::new(settings.timeout)?;
                let report = Manager::new(&chart, &settings, &getter).update()?;
                print_report(&report);
                println!("Wrote {}", chart.join(chartlock::lockfile::LOCK_FILE).display());
            }
            DepCommands::Build { chart, network } => {
                network.apply(&mut settings);
                let getter = HttpGetter::new(settings.timeout)?;
                let report = Manager::new(&chart, &settings, &getter).build()?;
                print_report(&report);
            }
            DepCommands::List { chart } => {
                let rows = chartlock::manager::list(&chart)?;
                if rows.is_empty() {
                    println!("No requirements found in {}", chart.display());
                    return Ok(());
                }
                println!(
                    "{:<24} {:<16} {:<12} {:<44} STATUS",
                    "NAME", "VERSION", "LOCKED", "REPOSITORY"
                );
                for row in rows {
                    println!(
                        "{:<24} {:<16} {:<12} {:<44} {}",
                        row.name,
                        if row.version.is_empty() { "*" } else { row.version.as_str() },
                        row.locked.as_deref().unwrap_or("-"),
                        row.repository,
                        row.status
                    );
                }
            }
        },
        Commands::Repo { command } => match command {
            RepoCommands::Sync { timeout } => {
                if let Some(secs) = timeout {
                    settings.timeout = std::time::Duration::from_secs(secs);
                }
                let repositories = settings.repositories()?;
                if repositories.is_empty() {
                    anyhow::bail!(
                        "no repositories configured in {}",
                        settings.repository_config.display()
                    );
                }
                let getter = HttpGetter::new(settings.timeout)?;
                // Per-repository failures are already logged as warnings
                chartlock::repo::sync_all(&repositories, &getter);
            }
        },
        Commands::Fetch {
            reference,
            version,
            destination,
            network,
        } => {
            network.apply(&mut settings);
            let getter = HttpGetter::new(settings.timeout)?;
            let fetched = ChartDownloader::new(&getter, &settings).fetch(
                &reference,
                version.as_deref(),
                &destination,
            )?;
            println!("Saved {}", fetched.path.display());
            if let Some(digest) = fetched.verification {
                println!("Verified {}", digest);
            }
        }
    }

    Ok(())
}

fn print_report(report: &Report) {
    for saved in &report.downloads.saved {
        println!("  {} {} -> {}", saved.name, saved.version, saved.path.display());
    }
    for skipped in &report.downloads.skipped {
        println!("  {} {} skipped: {}", skipped.name, skipped.version, skipped.reason);
    }
    println!(
        "{} saved, {} skipped, {} removed",
        report.downloads.saved.len(),
        report.downloads.skipped.len(),
        report.downloads.removed.len()
    );
}
