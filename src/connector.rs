use crate::credentials::AuthStrategy;
use crate::error::Result;
use crate::session::{ServiceKind, SessionInfo};
use async_trait::async_trait;

/// A remote service the validator can open a session with.
#[async_trait]
pub trait ServiceConnector: Send + Sync {
    fn service(&self) -> ServiceKind;

    /// Authenticate with one strategy and verify the resulting session.
    async fn connect(&self, strategy: &AuthStrategy) -> Result<SessionInfo>;

    /// Tear a session down. The session is consumed.
    async fn disconnect(&self, session: SessionInfo) -> Result<()>;
}
