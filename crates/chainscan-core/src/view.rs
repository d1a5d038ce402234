//! Collaborator traits for servers and their hierarchical views
//!
//! The session layer that talks to a debug server implements these traits.
//! Every call may block on a network round trip; callers issue them one at a
//! time and never share a view between concurrent scans.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::node::{JtagRegister, Node, NodeKind};

/// JTAG chain view on the hardware server
pub const JTAG_VIEW: &str = "jtag";
/// Memory target view on the hardware server
pub const MEMORY_VIEW: &str = "memory";
/// Debug core view on the hardware server
pub const DEBUGCORE_VIEW: &str = "debugcore";
/// Tooling view on the auxiliary chipscope server
pub const CHIPSCOPE_VIEW: &str = "chipscope";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewError {
    #[error("Server {server} is not reachable: {reason}")]
    Disconnected { server: String, reason: String },
    #[error("View {0} is not available")]
    ViewUnavailable(String),
    #[error("Unknown context {ctx} in view {view}")]
    UnknownContext { view: String, ctx: String },
    #[error("Failed to refresh registers of {ctx}: {reason}")]
    RegisterRefresh { ctx: String, reason: String },
}

impl ViewError {
    /// Whether the failure means the whole server is gone
    ///
    /// Anything else is scoped to a single view or node and can be skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}

/// A named, read-only tree of nodes on one server
#[async_trait]
pub trait View: Send + Sync {
    fn name(&self) -> &str;

    /// Every node in the view, flat
    async fn get_all(&self) -> Result<Vec<Node>, ViewError>;

    /// Immediate children of `parent`, or the root nodes when `None`
    async fn get_children(&self, parent: Option<&str>) -> Result<Vec<Node>, ViewError>;

    /// Resolve a context, optionally asking for a specific node kind
    ///
    /// Returns `Ok(None)` if the context is unknown or the node is not
    /// compatible with the requested kind.
    async fn get_node(&self, ctx: &str, kind: Option<NodeKind>) -> Result<Option<Node>, ViewError>;

    /// Refresh the named registers of a node and return their live contents
    async fn update_regs(
        &self,
        ctx: &str,
        names: &[&str],
        force: bool,
    ) -> Result<Vec<JtagRegister>, ViewError>;
}

/// A connection to a debug server exposing named views
#[async_trait]
pub trait Server: Send + Sync {
    async fn view(&self, name: &str) -> Result<Arc<dyn View>, ViewError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_disconnect_is_fatal() {
        let disconnected = ViewError::Disconnected {
            server: "hw_server".into(),
            reason: "connection refused".into(),
        };
        assert!(disconnected.is_fatal());
        assert!(!ViewError::ViewUnavailable("memory".into()).is_fatal());
        assert!(!ViewError::UnknownContext {
            view: "jtag".into(),
            ctx: "jt-1".into()
        }
        .is_fatal());
    }
}
