use super::{AuthStrategy, plan_strategies};
use crate::config::ValidatedConfig;
use crate::connector::ServiceConnector;
use crate::error::PreflightError;
use crate::session::{
    AttemptFailure, ConnectionState, FailureKind, FailureReason, Sessions, failure_kind,
};
use tracing::{debug, info, warn};

/// Tries each planned strategy in priority order until one connects.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    strategies: Vec<AuthStrategy>,
}

impl CredentialResolver {
    pub fn new(strategies: Vec<AuthStrategy>) -> Self {
        Self { strategies }
    }

    pub fn from_config(config: &ValidatedConfig, interactive: bool) -> Self {
        Self::new(plan_strategies(config, interactive))
    }

    pub fn strategies(&self) -> &[AuthStrategy] {
        &self.strategies
    }

    /// Attempt every strategy in order and stop at the first success.
    ///
    /// When all fail, the returned `Failed` state carries the last attempt's
    /// classification plus the full list of attempts.
    pub async fn establish(&self, connector: &dyn ServiceConnector) -> ConnectionState {
        let service = connector.service();

        if self.strategies.is_empty() {
            let err = PreflightError::CredentialIncomplete(format!(
                "no usable credential is configured for {}",
                service
            ));
            warn!(%service, "no authentication strategy available");
            return ConnectionState::Failed(FailureReason::from_error(&err));
        }

        let mut attempts = Vec::with_capacity(self.strategies.len());
        let mut last: Option<PreflightError> = None;

        for strategy in &self.strategies {
            let method = strategy.method();
            debug!(%service, %method, "trying strategy");

            match connector.connect(strategy).await {
                Ok(session) => {
                    info!(%service, %method, "authenticated");
                    return ConnectionState::Connected(session);
                }
                Err(e) => {
                    warn!(%service, %method, error = %e, "authentication attempt failed");
                    attempts.push(AttemptFailure {
                        method,
                        kind: failure_kind(&e),
                        detail: e.to_string(),
                    });
                    // Missing organization fails every strategy the same way.
                    let fatal = matches!(e, PreflightError::CredentialIncomplete(_));
                    last = Some(e);
                    if fatal {
                        break;
                    }
                }
            }
        }

        let mut reason = match &last {
            Some(e) => FailureReason::from_error(e),
            None => FailureReason {
                kind: FailureKind::CredentialIncomplete,
                detail: format!("no strategy was attempted for {}", service),
                diagnosis: String::new(),
                attempts: Vec::new(),
            },
        };
        reason.attempts = attempts;
        ConnectionState::Failed(reason)
    }

    /// Connect one service, tearing down any session it already had.
    pub async fn connect(&self, sessions: &mut Sessions, connector: &dyn ServiceConnector) {
        let service = connector.service();

        if let Some(previous) = sessions.begin_attempt(service) {
            if let Err(e) = connector.disconnect(previous).await {
                warn!(%service, error = %e, "failed to close previous session");
            }
        }

        let state = self.establish(connector).await;
        sessions.complete(service, state);
    }
}
