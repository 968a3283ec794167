//! Status reporter.
//!
//! Renders connection state, permission verdicts, gaps and remediation as
//! colored text. Rendering is pure; callers decide where the text goes.

use crate::error::{PreflightError, Result};
use crate::graph::exchange_online::{ProbeOutcome, ProbeResult};
use crate::permissions::{PermissionGapReport, PermissionRequirement, Verdict};
use crate::session::{ConnectionState, ServiceKind, Sessions};
use colored::Colorize;
use std::fmt::Write;

pub const ALL_GRANTED: &str = "All required permissions granted";

/// Gap evaluation for one service that was part of the run.
#[derive(Debug)]
pub struct Assessment {
    pub service: ServiceKind,
    pub gaps: Result<PermissionGapReport>,
}

impl Assessment {
    pub fn evaluate(
        service: ServiceKind,
        sessions: &Sessions,
        requirement: &PermissionRequirement,
    ) -> Self {
        Self {
            service,
            gaps: PermissionGapReport::compute(service, sessions.state(service), requirement),
        }
    }
}

/// Render the full status report.
pub fn render(sessions: &Sessions, assessments: &[Assessment]) -> String {
    let mut out = String::new();
    let ordered = ordered(assessments);

    render_connections(&mut out, sessions, &ordered);
    render_verdicts(&mut out, &ordered);
    render_missing(&mut out, &ordered);
    render_summary(&mut out, &ordered);

    out
}

fn ordered(assessments: &[Assessment]) -> Vec<&Assessment> {
    ServiceKind::ALL
        .iter()
        .filter_map(|service| assessments.iter().find(|a| a.service == *service))
        .collect()
}

fn render_connections(out: &mut String, sessions: &Sessions, assessments: &[&Assessment]) {
    let _ = writeln!(out, "\n{}", "Connection status".bold());

    for assessment in assessments {
        let service = assessment.service;
        match sessions.state(service) {
            ConnectionState::Connected(session) => {
                let _ = writeln!(
                    out,
                    "  {} {}: connected via {}",
                    "✓".green().bold(),
                    service.to_string().bold(),
                    session.method
                );
                let _ = writeln!(out, "      Tenant: {}", session.tenant_id);
                if let Some(name) = &session.display_name {
                    let _ = writeln!(out, "      Organization: {}", name);
                } else if let Some(org) = &session.organization {
                    let _ = writeln!(out, "      Organization: {}", org);
                }
                let _ = writeln!(
                    out,
                    "      Token expires: {}",
                    session.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
                for warning in &session.warnings {
                    let _ = writeln!(out, "      {} {}", "!".yellow().bold(), warning.yellow());
                }
            }
            ConnectionState::Failed(reason) => {
                let _ = writeln!(
                    out,
                    "  {} {}: {}",
                    "✗".red().bold(),
                    service.to_string().bold(),
                    reason.kind.to_string().red()
                );
                let _ = writeln!(out, "      {}", reason.detail);
                for attempt in &reason.attempts {
                    let _ = writeln!(
                        out,
                        "      {} {}: {}",
                        "·".dimmed(),
                        attempt.method,
                        attempt.detail.dimmed()
                    );
                }
                if !reason.diagnosis.is_empty() {
                    let _ = writeln!(out, "      {} {}", "→".cyan(), reason.diagnosis);
                }
            }
            state => {
                let _ = writeln!(
                    out,
                    "  {} {}: {}",
                    "-".dimmed(),
                    service.to_string().bold(),
                    state.label()
                );
            }
        }
    }
}

fn not_evaluated(error: &PreflightError) -> String {
    match error {
        PreflightError::NotConnected(_) => "not connected".to_string(),
        other => other.to_string(),
    }
}

fn render_verdicts(out: &mut String, assessments: &[&Assessment]) {
    let _ = writeln!(out, "\n{}", "Permissions".bold());

    for assessment in assessments {
        let service = assessment.service;
        match &assessment.gaps {
            Ok(report) => {
                let _ = writeln!(out, "  {}", service.to_string().bold());
                for verdict in &report.verdicts {
                    match &verdict.verdict {
                        Verdict::Granted => {
                            let _ = writeln!(out, "    {} {}", "✓".green(), verdict.permission);
                        }
                        Verdict::GrantedVia(via) => {
                            let _ = writeln!(
                                out,
                                "    {} {} {}",
                                "✓".green(),
                                verdict.permission,
                                format!("(via {})", via).dimmed()
                            );
                        }
                        Verdict::Missing => {
                            let _ = writeln!(
                                out,
                                "    {} {} {}",
                                "✗".red(),
                                verdict.permission.red(),
                                "(missing)".red()
                            );
                        }
                    }
                }
            }
            Err(e) => {
                let _ = writeln!(
                    out,
                    "  {}: {} ({})",
                    service.to_string().bold(),
                    "permissions not evaluated".yellow(),
                    not_evaluated(e)
                );
            }
        }
    }
}

fn render_missing(out: &mut String, assessments: &[&Assessment]) {
    let gaps: Vec<&PermissionGapReport> = assessments
        .iter()
        .filter_map(|a| a.gaps.as_ref().ok())
        .filter(|report| !report.is_complete())
        .collect();

    if gaps.is_empty() {
        return;
    }

    let _ = writeln!(out, "\n{}", "Missing permissions".bold().red());
    for report in gaps {
        let _ = writeln!(out, "  {}", report.service.to_string().bold());
        for missing in &report.missing {
            let _ = writeln!(out, "    {} {}", "✗".red(), missing.permission);
            for feature in &missing.features {
                let _ = writeln!(out, "        {} {}", "→".yellow(), feature);
            }
        }
    }
}

fn render_summary(out: &mut String, assessments: &[&Assessment]) {
    let evaluated: Vec<&PermissionGapReport> = assessments
        .iter()
        .filter_map(|a| a.gaps.as_ref().ok())
        .collect();
    let skipped = assessments.len() - evaluated.len();
    let incomplete: Vec<&&PermissionGapReport> =
        evaluated.iter().filter(|r| !r.is_complete()).collect();

    if !incomplete.is_empty() {
        let _ = writeln!(out, "\n{}", "Remediation".bold());
        let mut step = 1;
        for report in &incomplete {
            let _ = writeln!(
                out,
                "  {}. In the app registration, open API permissions and add these {} application permissions: {}",
                step,
                report.service.api_name(),
                report.missing_permissions().join(", ")
            );
            step += 1;
        }
        let _ = writeln!(
            out,
            "  {}. Click \"Grant admin consent\" and run this check again.",
            step
        );
        if incomplete
            .iter()
            .any(|r| r.service == ServiceKind::MailAdmin)
        {
            let _ = writeln!(
                out,
                "  {}. Assign the app an Exchange Administrator role in Entra ID for Exchange.ManageAsApp to take effect.",
                step + 1
            );
        }
        return;
    }

    if evaluated.is_empty() {
        let _ = writeln!(
            out,
            "\n{} {}",
            "!".yellow().bold(),
            "Permissions were not evaluated".yellow()
        );
        return;
    }

    if skipped > 0 {
        let _ = writeln!(
            out,
            "\n{} {} {}",
            "✓".green().bold(),
            ALL_GRANTED.green().bold(),
            format!("({} service(s) not evaluated)", skipped).yellow()
        );
    } else {
        let _ = writeln!(out, "\n{} {}", "✓".green().bold(), ALL_GRANTED.green().bold());
    }
}

/// Render Exchange cmdlet probe results.
pub fn render_probes(results: &[ProbeResult]) -> String {
    let mut out = String::new();
    if results.is_empty() {
        return out;
    }

    let _ = writeln!(out, "\n{}", "Exchange cmdlet probes".bold());
    for result in results {
        match &result.outcome {
            ProbeOutcome::Passed { rows } => {
                let _ = writeln!(
                    out,
                    "  {} {} {}",
                    "✓".green(),
                    result.cmdlet,
                    format!("({} row(s))", rows).dimmed()
                );
            }
            ProbeOutcome::Failed { detail, diagnosis } => {
                let _ = writeln!(out, "  {} {}: {}", "✗".red(), result.cmdlet, detail.red());
                let _ = writeln!(out, "      {} {}", "→".cyan(), diagnosis);
            }
        }
    }

    let passed = results.iter().filter(|r| r.passed()).count();
    let _ = writeln!(out, "  {}/{} probes passed", passed, results.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthRejection;
    use crate::session::FailureReason;
    use crate::session::tests::session;

    fn connected(service: ServiceKind, granted: &[&str]) -> Sessions {
        let mut sessions = Sessions::new();
        sessions.complete(service, ConnectionState::Connected(session(service, granted)));
        sessions
    }

    #[test]
    fn test_gap_report_sections_in_order() {
        let sessions = connected(ServiceKind::Directory, &["User.Read.All"]);
        let requirement = PermissionRequirement::new(["User.Read.All", "Mail.ReadWrite"])
            .with_features("Mail.ReadWrite", ["Mailbox export"]);
        let assessments = vec![Assessment::evaluate(
            ServiceKind::Directory,
            &sessions,
            &requirement,
        )];

        let text = render(&sessions, &assessments);

        let status = text.find("Connection status").unwrap();
        let verdicts = text.find("Permissions").unwrap();
        let missing = text.find("Missing permissions").unwrap();
        let remediation = text.find("Remediation").unwrap();
        assert!(status < verdicts && verdicts < missing && missing < remediation);
        assert!(text.contains("Mailbox export"));
        assert!(!text.contains(ALL_GRANTED));
    }

    #[test]
    fn test_missing_without_features_has_no_feature_lines() {
        let sessions = connected(ServiceKind::Directory, &[]);
        let requirement = PermissionRequirement::new(["Custom.Read"]);
        let assessments = vec![Assessment::evaluate(
            ServiceKind::Directory,
            &sessions,
            &requirement,
        )];

        let text = render(&sessions, &assessments);
        assert!(text.contains("Custom.Read"));
        assert!(!text.contains("→"));
    }

    #[test]
    fn test_all_granted_message() {
        let sessions = connected(ServiceKind::Directory, &["Mail.ReadWrite"]);
        let requirement = PermissionRequirement::new(["Mail.Read"]);
        let assessments = vec![Assessment::evaluate(
            ServiceKind::Directory,
            &sessions,
            &requirement,
        )];

        let text = render(&sessions, &assessments);
        assert!(text.contains(ALL_GRANTED));
        assert!(text.contains("via Mail.ReadWrite"));
        assert!(!text.contains("Remediation"));
    }

    #[test]
    fn test_failed_service_is_not_evaluated() {
        let mut sessions = connected(ServiceKind::Directory, &["User.Read.All"]);
        let err = PreflightError::AuthenticationRejected {
            kind: AuthRejection::InvalidClient,
            detail: "AADSTS7000215: Invalid client secret provided.".into(),
        };
        sessions.complete(
            ServiceKind::MailAdmin,
            ConnectionState::Failed(FailureReason::from_error(&err)),
        );

        let assessments = vec![
            Assessment::evaluate(
                ServiceKind::MailAdmin,
                &sessions,
                &PermissionRequirement::defaults(ServiceKind::MailAdmin),
            ),
            Assessment::evaluate(
                ServiceKind::Directory,
                &sessions,
                &PermissionRequirement::new(["User.Read.All"]),
            ),
        ];

        let text = render(&sessions, &assessments);
        assert!(text.find("Microsoft Graph").unwrap() < text.find("Exchange Online").unwrap());
        assert!(text.contains("permissions not evaluated"));
        assert!(text.contains("AADSTS7000215"));
        assert!(text.contains("not evaluated)"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let sessions = connected(ServiceKind::Directory, &["Group.Read.All"]);
        let requirement = PermissionRequirement::defaults(ServiceKind::Directory);
        let assessments = vec![Assessment::evaluate(
            ServiceKind::Directory,
            &sessions,
            &requirement,
        )];
        assert_eq!(render(&sessions, &assessments), render(&sessions, &assessments));
    }

    #[test]
    fn test_render_probes() {
        let results = vec![
            ProbeResult {
                cmdlet: "Get-OrganizationConfig".into(),
                outcome: ProbeOutcome::Passed { rows: 1 },
            },
            ProbeResult {
                cmdlet: "Get-Mailbox".into(),
                outcome: ProbeOutcome::Failed {
                    detail: "HTTP 403".into(),
                    diagnosis: "Assign a role".into(),
                },
            },
        ];
        let text = render_probes(&results);
        assert!(text.contains("Get-OrganizationConfig"));
        assert!(text.contains("Assign a role"));
        assert!(text.contains("1/2 probes passed"));
        assert!(render_probes(&[]).is_empty());
    }
}
