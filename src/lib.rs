//! Connection and permission preflight for Microsoft 365 admin tooling.
//!
//! Establishes sessions against Microsoft Graph and the Exchange Online admin
//! API using a layered credential strategy, then compares the permissions the
//! tokens carry against what the tooling needs.

pub mod cmd;
pub mod config;
pub mod connector;
pub mod credentials;
pub mod error;
pub mod graph;
pub mod permissions;
pub mod report;
pub mod session;
pub mod validator;
