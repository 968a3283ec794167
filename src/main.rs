use clap::{Parser, Subcommand};
use colored::Colorize;
use m365_preflight::cmd::{self, GlobalOptions};
use m365_preflight::error::{self, PreflightError};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "m365-preflight",
    about = "Check Microsoft 365 connections and app permissions before you run admin tooling",
    version,
    long_about = "Connection and permission preflight for Microsoft 365\n\n\
                  Authenticates to Microsoft Graph and Exchange Online with the configured\n\
                  certificate, client secret or interactive sign-in, then reports which\n\
                  required permissions the app registration is missing."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding config.json / config.local.json
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Per-call timeout in seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    /// Never fall back to interactive sign-in
    #[arg(long, global = true)]
    no_interactive: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to both services and report permission gaps (default)
    Check(cmd::check::CheckArgs),

    /// Check the Microsoft Graph connection only
    Graph,

    /// Check the Exchange Online connection and run cmdlet probes
    Exchange(cmd::check::ExchangeArgs),

    /// Show the effective configuration and authentication plan
    Config,

    /// List certificates in the trusted certificate store
    Certs,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if !matches!(e, PreflightError::NotConnected(_)) {
            eprintln!("  {} {}", "→".cyan(), e.diagnosis());
        }
        std::process::exit(1);
    }
}

const VERBOSE_FILTER: &str = "m365_preflight=debug";

/// `RUST_LOG` wins when set; `--verbose` alone enables crate debug output.
fn log_filter(verbose: bool, env: Option<String>) -> Option<EnvFilter> {
    env.filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| verbose.then(|| EnvFilter::new(VERBOSE_FILTER)))
}

fn init_logging(verbose: bool) {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    if let Some(filter) = log_filter(verbose, env) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run() -> error::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let opts = GlobalOptions {
        config_dir: cli.config_dir,
        timeout_secs: cli.timeout,
        no_interactive: cli.no_interactive,
    };

    match cli.command.unwrap_or(Commands::Check(Default::default())) {
        Commands::Check(args) => cmd::check::check(&opts, args).await?,
        Commands::Graph => cmd::check::graph(&opts).await?,
        Commands::Exchange(args) => cmd::check::exchange(&opts, args).await?,
        Commands::Config => cmd::config::show(&opts).await?,
        Commands::Certs => cmd::config::certs(&opts).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_off_by_default() {
        assert!(log_filter(false, None).is_none());
        assert!(log_filter(false, Some("  ".into())).is_none());
    }

    #[test]
    fn test_verbose_enables_crate_debug() {
        let filter = log_filter(true, None).unwrap();
        assert_eq!(filter.to_string().to_ascii_lowercase(), VERBOSE_FILTER);
    }

    #[test]
    fn test_rust_log_enables_logging_without_verbose() {
        let filter = log_filter(false, Some("m365_preflight=trace".into())).unwrap();
        assert_eq!(filter.to_string().to_ascii_lowercase(), "m365_preflight=trace");

        let filter = log_filter(true, Some("warn".into())).unwrap();
        assert_eq!(filter.to_string().to_ascii_lowercase(), "warn");
    }
}
