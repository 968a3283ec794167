//! One validation run: connect the requested services, evaluate their
//! permission gaps, optionally probe Exchange, and close the sessions.

use crate::config::ValidatedConfig;
use crate::connector::ServiceConnector;
use crate::credentials::{AuthStrategy, CredentialResolver};
use crate::error::Result;
use crate::graph::GraphConnector;
use crate::graph::exchange_online::{ExchangeConnector, ProbeResult};
use crate::report::Assessment;
use crate::session::{ConnectionState, ServiceKind, Sessions};
use tracing::{debug, warn};

pub struct Validator {
    config: ValidatedConfig,
    resolver: CredentialResolver,
    graph: GraphConnector,
    exchange: ExchangeConnector,
}

impl Validator {
    pub fn new(config: ValidatedConfig, interactive: bool) -> Result<Self> {
        Ok(Self {
            resolver: CredentialResolver::from_config(&config, interactive),
            graph: GraphConnector::new(&config)?,
            exchange: ExchangeConnector::new(&config)?,
            config,
        })
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    pub fn resolver(&self) -> &CredentialResolver {
        &self.resolver
    }

    pub fn connector(&self, service: ServiceKind) -> &dyn ServiceConnector {
        match service {
            ServiceKind::Directory => &self.graph,
            ServiceKind::MailAdmin => &self.exchange,
        }
    }

    /// True when the plan may prompt the user.
    pub fn is_interactive(&self) -> bool {
        self.resolver
            .strategies()
            .iter()
            .any(|s| matches!(s, AuthStrategy::DeviceCode))
    }

    /// Connect every requested service.
    ///
    /// Services are attempted concurrently unless the plan includes an
    /// interactive sign-in, in which case prompts are shown one at a time.
    pub async fn connect(&self, sessions: &mut Sessions, services: &[ServiceKind]) {
        if self.is_interactive() || services.len() < 2 {
            for service in services {
                self.resolver.connect(sessions, self.connector(*service)).await;
            }
            return;
        }

        for service in services {
            if let Some(previous) = sessions.begin_attempt(*service) {
                if let Err(e) = self.connector(*service).disconnect(previous).await {
                    warn!(%service, error = %e, "failed to close previous session");
                }
            }
        }

        let (directory, mail_admin) = tokio::join!(
            self.establish_if(services, ServiceKind::Directory),
            self.establish_if(services, ServiceKind::MailAdmin),
        );

        for (service, state) in [
            (ServiceKind::Directory, directory),
            (ServiceKind::MailAdmin, mail_admin),
        ] {
            if let Some(state) = state {
                sessions.complete(service, state);
            }
        }
    }

    async fn establish_if(
        &self,
        services: &[ServiceKind],
        service: ServiceKind,
    ) -> Option<ConnectionState> {
        if services.contains(&service) {
            Some(self.resolver.establish(self.connector(service)).await)
        } else {
            None
        }
    }

    pub fn assess(&self, sessions: &Sessions, services: &[ServiceKind]) -> Vec<Assessment> {
        services
            .iter()
            .map(|service| {
                Assessment::evaluate(*service, sessions, self.config.requirement(*service))
            })
            .collect()
    }

    /// Run the configured Exchange probes. Empty when Exchange is not connected.
    pub async fn probe(&self, sessions: &Sessions) -> Vec<ProbeResult> {
        match sessions.state(ServiceKind::MailAdmin).session() {
            Some(session) => {
                self.exchange
                    .run_probes(session, &self.config.exchange_probes)
                    .await
            }
            None => {
                debug!("exchange not connected, probes skipped");
                Vec::new()
            }
        }
    }

    /// Tear down every live session.
    pub async fn close(&self, sessions: &mut Sessions) {
        for service in ServiceKind::ALL {
            if let Some(session) = sessions.disconnect(service) {
                if let Err(e) = self.connector(service).disconnect(session).await {
                    warn!(%service, error = %e, "failed to close session");
                }
            }
        }
    }
}
