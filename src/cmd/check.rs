use super::GlobalOptions;
use super::progress;
use crate::config::truncate_id;
use crate::error::{PreflightError, Result};
use crate::report;
use crate::session::{ConnectionState, ServiceKind, Sessions};
use crate::validator::Validator;
use clap::Args;
use colored::Colorize;

#[derive(Args, Debug, Default)]
pub struct CheckArgs {
    /// Skip the Exchange Online cmdlet probes
    #[arg(long)]
    pub skip_probes: bool,
}

#[derive(Args, Debug, Default)]
pub struct ExchangeArgs {
    /// Skip the cmdlet probes and only check the connection and permissions
    #[arg(long)]
    pub skip_probes: bool,
}

/// Connect both services and report permission gaps.
pub async fn check(opts: &GlobalOptions, args: CheckArgs) -> Result<()> {
    run(opts, &ServiceKind::ALL, !args.skip_probes).await
}

/// Directory service only.
pub async fn graph(opts: &GlobalOptions) -> Result<()> {
    run(opts, &[ServiceKind::Directory], false).await
}

/// Mail admin service only, plus cmdlet probes.
pub async fn exchange(opts: &GlobalOptions, args: ExchangeArgs) -> Result<()> {
    run(opts, &[ServiceKind::MailAdmin], !args.skip_probes).await
}

async fn run(opts: &GlobalOptions, services: &[ServiceKind], probes: bool) -> Result<()> {
    let config = opts.load_config()?;

    println!(
        "{} Tenant {} / app {}",
        "→".cyan(),
        truncate_id(&config.tenant_id).bold(),
        truncate_id(&config.client_id).bold()
    );

    let validator = Validator::new(config, opts.interactive())?;
    let mut sessions = Sessions::new();

    let names: Vec<&str> = services.iter().map(|s| s.display_name()).collect();
    let message = format!("Connecting to {}...", names.join(" and "));
    let spinner = if validator.is_interactive() {
        println!("{} {}", "→".cyan(), message);
        progress::hidden_spinner()
    } else {
        progress::create_spinner(&message)
    };

    validator.connect(&mut sessions, services).await;

    let failed: Vec<ServiceKind> = services
        .iter()
        .copied()
        .filter(|s| matches!(sessions.state(*s), ConnectionState::Failed(_)))
        .collect();

    if failed.is_empty() {
        progress::finish_spinner_success(&spinner, "Connected");
    } else if failed.len() < services.len() {
        progress::finish_spinner_warning(&spinner, "Partially connected");
    } else {
        progress::finish_spinner_error(&spinner, "Connection failed");
    }

    let assessments = validator.assess(&sessions, services);
    print!("{}", report::render(&sessions, &assessments));

    if probes && services.contains(&ServiceKind::MailAdmin) {
        let results = validator.probe(&sessions).await;
        print!("{}", report::render_probes(&results));
    }

    validator.close(&mut sessions).await;

    if failed.is_empty() {
        Ok(())
    } else {
        let names: Vec<&str> = failed.iter().map(|s| s.display_name()).collect();
        Err(PreflightError::NotConnected(names.join(", ")))
    }
}
