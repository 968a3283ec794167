use super::GlobalOptions;
use crate::config::{ValidatedConfig, truncate_id};
use crate::credentials::certificate::{list_store, normalize_thumbprint};
use crate::credentials::{AuthStrategy, ServiceCredential, plan_strategies};
use crate::error::Result;
use crate::session::ServiceKind;
use colored::Colorize;

fn mask(value: &Option<String>) -> String {
    match value {
        Some(_) => "********".to_string(),
        None => "(not set)".dimmed().to_string(),
    }
}

fn or_unset(value: Option<String>) -> String {
    value.unwrap_or_else(|| "(not set)".dimmed().to_string())
}

/// Show the effective configuration and the credential plan.
pub async fn show(opts: &GlobalOptions) -> Result<()> {
    let manager = opts.config_manager()?;
    let config = opts.load_config()?;

    println!("{}", "Configuration".bold());
    println!("  Directory:   {}", manager.config_dir().display());
    if let Some(path) = manager.base_file() {
        println!("  Base file:   {}", path.display());
    }
    if let Some(path) = manager.local_file() {
        println!("  Local file:  {}", path.display());
    }
    println!();

    print_config(&config);
    print_plan(&config, opts.interactive());
    Ok(())
}

fn print_config(config: &ValidatedConfig) {
    println!("  Tenant ID:       {}", config.tenant_id);
    println!("  Client ID:       {}", config.client_id);
    println!("  Organization:    {}", or_unset(config.organization.clone()));
    println!(
        "  Thumbprint:      {}",
        or_unset(config.certificate_thumbprint.clone())
    );
    println!("  Cert store:      {}", config.certificate_store.display());
    println!(
        "  Cert file:       {}",
        or_unset(config.certificate_path.as_ref().map(|p| p.display().to_string()))
    );
    println!("  Cert password:   {}", mask(&config.certificate_password));
    println!("  Client secret:   {}", mask(&config.client_secret));
    println!("  Authority:       {}", config.endpoints.authority_host);
    println!("  Graph API:       {}", config.endpoints.graph_base_url);
    println!("  Exchange API:    {}", config.endpoints.exchange_base_url);
    println!("  Timeout:         {}s", config.timeout.as_secs());
    println!();

    for service in ServiceKind::ALL {
        let requirement = config.requirement(service);
        println!(
            "  {} required permissions: {}",
            service,
            requirement.permissions().join(", ")
        );
    }
    let probes: Vec<&str> = config.exchange_probes.iter().map(|p| p.cmdlet.as_str()).collect();
    println!("  Exchange probes: {}", probes.join(", "));
    println!();
}

fn print_plan(config: &ValidatedConfig, interactive: bool) {
    println!("{}", "Authentication plan".bold());

    let plan = plan_strategies(config, interactive);
    if plan.is_empty() {
        println!(
            "  {} No usable credential. Set certificateThumbprint, certificatePath or clientSecret.",
            "✗".red()
        );
        return;
    }

    for (index, strategy) in plan.iter().enumerate() {
        let detail = match strategy {
            AuthStrategy::Credential(ServiceCredential::CertificateThumbprint {
                thumbprint,
                store_path,
            }) => format!(
                "{} in {}",
                normalize_thumbprint(thumbprint),
                store_path.display()
            ),
            AuthStrategy::Credential(ServiceCredential::CertificateFile { path, .. }) => {
                path.display().to_string()
            }
            AuthStrategy::Credential(ServiceCredential::ClientSecret { client_id, .. }) => {
                format!("app {}", truncate_id(client_id))
            }
            AuthStrategy::DeviceCode => "browser sign-in with a one-time code".to_string(),
        };
        println!("  {}. {} {}", index + 1, strategy.method(), detail.dimmed());
    }
}

/// List certificates in the trusted store.
pub async fn certs(opts: &GlobalOptions) -> Result<()> {
    let config = opts.load_config()?;
    let store = &config.certificate_store;

    println!("{} {}", "Certificate store:".bold(), store.display());

    let entries = list_store(store)?;
    if entries.is_empty() {
        println!("  {}", "No certificates found".yellow());
        return Ok(());
    }

    let wanted = config
        .certificate_thumbprint
        .as_deref()
        .map(normalize_thumbprint);

    for entry in entries {
        let key = if entry.has_private_key {
            "private key".green().to_string()
        } else {
            "no private key".yellow().to_string()
        };
        let marker = if wanted.as_deref() == Some(entry.thumbprint.as_str()) {
            "→".cyan().to_string()
        } else {
            " ".to_string()
        };
        println!(
            "  {} {}  {} ({})",
            marker,
            entry.thumbprint,
            entry.path.display(),
            key
        );
    }
    Ok(())
}
