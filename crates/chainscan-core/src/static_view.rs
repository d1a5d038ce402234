//! In-memory server and views loaded from a JSON topology file
//!
//! A topology file lists the nodes of every view a server exposes:
//!
//! ```json
//! {
//!   "views": {
//!     "jtag": [
//!       { "ctx": "jsn-1", "kind": "jtag_cable",
//!         "props": { "Name": "jsn-1", "Description": "JTAG-HS3", "Serial": "210299A" } },
//!       { "ctx": "jsn-1-0", "parent": "jsn-1", "kind": "jtag_device",
//!         "props": { "Name": "xcvc1902", "arch_name": "versal" },
//!         "regs": { "dna": [18, 52, 86, 120] } }
//!     ]
//!   }
//! }
//! ```
//!
//! Register contents are little-endian byte arrays.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::node::{JtagRegister, Node, NodeKind, PropValue};
use crate::view::{Server, View, ViewError};

#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Failed to read topology file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse topology file: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Duplicate context {ctx} in view {view}")]
    DuplicateContext { view: String, ctx: String },
}

/// One node entry of a topology file
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSpec {
    pub ctx: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default)]
    pub props: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub regs: BTreeMap<String, Vec<u8>>,
}

impl From<NodeSpec> for Node {
    fn from(entry: NodeSpec) -> Self {
        let mut node = Node::new(entry.ctx, entry.kind);
        node.parent_ctx = entry.parent;
        for (key, value) in entry.props {
            node.props.insert(key, PropValue::from(value));
        }
        for (name, data) in entry.regs {
            node = node.with_register(name, data);
        }
        node
    }
}

/// Contents of a topology file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopologyFile {
    #[serde(default)]
    pub views: BTreeMap<String, Vec<NodeSpec>>,
    /// Views listed here report themselves unavailable
    #[serde(default)]
    pub unavailable: Vec<String>,
}

/// Connection state a server shares with its views
#[derive(Debug)]
struct Link {
    server: String,
    connected: AtomicBool,
    /// View requests left before the link drops, `usize::MAX` for no limit
    budget: AtomicUsize,
}

impl Link {
    fn new(server: String) -> Self {
        Self {
            server,
            connected: AtomicBool::new(true),
            budget: AtomicUsize::new(usize::MAX),
        }
    }

    fn check(&self) -> Result<(), ViewError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ViewError::Disconnected {
                server: self.server.clone(),
                reason: "not connected".to_string(),
            })
        }
    }

    /// Check the link and charge one request against its budget
    fn request(&self) -> Result<(), ViewError> {
        self.check()?;
        let charged = self
            .budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                usize::MAX => Some(left),
                0 => None,
                n => Some(n - 1),
            });
        if charged.is_err() {
            self.connected.store(false, Ordering::SeqCst);
            return self.check();
        }
        Ok(())
    }
}

/// A view backed by a fixed list of nodes
pub struct StaticView {
    name: String,
    nodes: Vec<Node>,
    available: bool,
    refreshes: AtomicUsize,
    link: Option<Arc<Link>>,
}

impl StaticView {
    /// Create a view; node order is the enumeration order
    pub fn new(name: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            nodes,
            available: true,
            refreshes: AtomicUsize::new(0),
            link: None,
        }
    }

    /// A view that fails every query
    pub fn unavailable(name: impl Into<String>) -> Self {
        Self {
            available: false,
            ..Self::new(name, Vec::new())
        }
    }

    /// Look up a node without going through the async interface
    pub fn node(&self, ctx: &str) -> Option<Node> {
        self.nodes.iter().find(|n| n.ctx == ctx).cloned()
    }

    /// Number of register refresh requests served so far
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::Relaxed)
    }

    fn check_request(&self) -> Result<(), ViewError> {
        if let Some(link) = &self.link {
            link.request()?;
        }
        if self.available {
            Ok(())
        } else {
            Err(ViewError::ViewUnavailable(self.name.clone()))
        }
    }
}

#[async_trait]
impl View for StaticView {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_all(&self) -> Result<Vec<Node>, ViewError> {
        self.check_request()?;
        Ok(self.nodes.clone())
    }

    async fn get_children(&self, parent: Option<&str>) -> Result<Vec<Node>, ViewError> {
        self.check_request()?;
        // A self-referencing node is never listed as its own child
        Ok(self
            .nodes
            .iter()
            .filter(|n| n.parent_ctx.as_deref() == parent && Some(n.ctx.as_str()) != parent)
            .cloned()
            .collect())
    }

    async fn get_node(&self, ctx: &str, kind: Option<NodeKind>) -> Result<Option<Node>, ViewError> {
        self.check_request()?;
        Ok(self
            .nodes
            .iter()
            .find(|n| n.ctx == ctx)
            .filter(|n| kind.map_or(true, |k| n.is_compatible(k)))
            .cloned())
    }

    async fn update_regs(
        &self,
        ctx: &str,
        names: &[&str],
        _force: bool,
    ) -> Result<Vec<JtagRegister>, ViewError> {
        self.check_request()?;
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        let node = self
            .nodes
            .iter()
            .find(|n| n.ctx == ctx)
            .ok_or_else(|| ViewError::UnknownContext {
                view: self.name.clone(),
                ctx: ctx.to_string(),
            })?;
        Ok(names
            .iter()
            .filter_map(|name| node.register(name).cloned())
            .collect())
    }
}

/// A server exposing a set of static views
///
/// The connection can be dropped and restored at runtime. Views handed out
/// earlier share the connection and fail once it is gone.
pub struct StaticServer {
    label: String,
    views: HashMap<String, Arc<StaticView>>,
    link: Arc<Link>,
}

impl StaticServer {
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            link: Arc::new(Link::new(label.clone())),
            label,
            views: HashMap::new(),
        }
    }

    /// A server whose every request fails with a connection error
    pub fn disconnected(label: impl Into<String>) -> Self {
        let server = Self::new(label);
        server.set_connected(false);
        server
    }

    /// Drop the connection after `requests` more view queries
    pub fn disconnect_after(self, requests: usize) -> Self {
        self.link.budget.store(requests, Ordering::SeqCst);
        self
    }

    /// Drop or restore the connection; restoring also clears any request limit
    pub fn set_connected(&self, connected: bool) {
        if connected {
            self.link.budget.store(usize::MAX, Ordering::SeqCst);
        }
        self.link.connected.store(connected, Ordering::SeqCst);
    }

    pub fn with_view(mut self, mut view: StaticView) -> Self {
        view.link = Some(self.link.clone());
        self.views.insert(view.name.clone(), Arc::new(view));
        self
    }

    /// Access a view with its concrete type, e.g. to inspect refresh counts
    pub fn static_view(&self, name: &str) -> Option<Arc<StaticView>> {
        self.views.get(name).cloned()
    }

    /// Build a server from a parsed topology file
    pub fn from_topology(
        label: impl Into<String>,
        topology: TopologyFile,
    ) -> Result<Self, FixtureError> {
        let mut server = Self::new(label);
        for (view_name, entries) in topology.views {
            let mut nodes: Vec<Node> = Vec::with_capacity(entries.len());
            for entry in entries {
                if nodes.iter().any(|n| n.ctx == entry.ctx) {
                    return Err(FixtureError::DuplicateContext {
                        view: view_name,
                        ctx: entry.ctx,
                    });
                }
                nodes.push(entry.into());
            }
            debug!(view = %view_name, nodes = nodes.len(), "Loaded view");
            server = server.with_view(StaticView::new(view_name, nodes));
        }
        for view_name in topology.unavailable {
            server = server.with_view(StaticView::unavailable(view_name));
        }
        Ok(server)
    }

    pub fn from_json(label: impl Into<String>, content: &str) -> Result<Self, FixtureError> {
        let topology: TopologyFile = serde_json::from_str(content)?;
        Self::from_topology(label, topology)
    }

    /// Load a server from a topology file
    pub fn from_file(label: impl Into<String>, path: &Path) -> Result<Self, FixtureError> {
        let content = std::fs::read_to_string(path)?;
        let server = Self::from_json(label, &content)?;
        info!(
            path = %path.display(),
            server = %server.label,
            views = server.views.len(),
            "Loaded topology"
        );
        Ok(server)
    }
}

#[async_trait]
impl Server for StaticServer {
    async fn view(&self, name: &str) -> Result<Arc<dyn View>, ViewError> {
        self.link.check()?;
        self.views
            .get(name)
            .map(|view| view.clone() as Arc<dyn View>)
            .ok_or_else(|| ViewError::ViewUnavailable(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::DNA_REGISTER;
    use tempfile::TempDir;

    const TOPOLOGY: &str = r#"{
        "views": {
            "jtag": [
                { "ctx": "jsn-1", "kind": "jtag_cable",
                  "props": { "Name": "jsn-1", "Description": "JTAG-HS3", "Serial": "210299A" } },
                { "ctx": "jsn-1-0", "parent": "jsn-1", "kind": "jtag_device",
                  "props": { "Name": "xcvc1902", "arch_name": "versal" },
                  "regs": { "dna": [18, 52, 86, 120] } }
            ],
            "memory": [
                { "ctx": "rt-1", "props": { "Name": "Versal", "DeviceDNA": [1, 2, 3, 4] } }
            ]
        },
        "unavailable": ["debugcore"]
    }"#;

    #[test]
    fn test_parse_topology() {
        let server = StaticServer::from_json("hw_server", TOPOLOGY).unwrap();
        let jtag = server.static_view("jtag").unwrap();

        let device = jtag.node("jsn-1-0").unwrap();
        assert_eq!(device.kind, NodeKind::JtagDevice);
        assert_eq!(device.parent_ctx.as_deref(), Some("jsn-1"));
        assert_eq!(device.register(DNA_REGISTER).unwrap().data, vec![18, 52, 86, 120]);
        assert_eq!(device.arch_name(), Some("versal"));

        let memory = server.static_view("memory").unwrap();
        assert_eq!(memory.node("rt-1").unwrap().kind, NodeKind::Generic);
    }

    #[test]
    fn test_duplicate_context_rejected() {
        let json = r#"{ "views": { "memory": [ { "ctx": "a" }, { "ctx": "a" } ] } }"#;
        let err = StaticServer::from_json("hw_server", json).err().unwrap();
        assert!(matches!(err, FixtureError::DuplicateContext { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("hw_server.json");
        std::fs::write(&path, TOPOLOGY).unwrap();

        let server = StaticServer::from_file("hw_server", &path).unwrap();
        assert!(server.static_view("jtag").is_some());
    }

    #[tokio::test]
    async fn test_children_and_kind_hint() {
        let server = StaticServer::from_json("hw_server", TOPOLOGY).unwrap();
        let jtag = server.view("jtag").await.unwrap();

        let roots = jtag.get_children(None).await.unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].ctx, "jsn-1");

        let devices = jtag.get_children(Some("jsn-1")).await.unwrap();
        assert_eq!(devices.len(), 1);

        assert!(jtag
            .get_node("jsn-1", Some(NodeKind::JtagCable))
            .await
            .unwrap()
            .is_some());
        assert!(jtag
            .get_node("jsn-1", Some(NodeKind::JtagDevice))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unavailable_and_missing_views() {
        let server = StaticServer::from_json("hw_server", TOPOLOGY).unwrap();

        let debugcore = server.view("debugcore").await.unwrap();
        let err = debugcore.get_all().await.unwrap_err();
        assert_eq!(err, ViewError::ViewUnavailable("debugcore".into()));

        let err = server.view("chipscope").await.err().unwrap();
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_disconnected_server_is_fatal() {
        let server = StaticServer::disconnected("hw_server");
        let err = server.view("jtag").await.err().unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_open_views_fail_after_disconnect() {
        let server = StaticServer::from_json("hw_server", TOPOLOGY).unwrap();
        let jtag = server.view("jtag").await.unwrap();
        assert!(jtag.get_all().await.is_ok());

        server.set_connected(false);
        let err = jtag.get_children(None).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(server.view("jtag").await.err().unwrap().is_fatal());

        server.set_connected(true);
        assert!(jtag.get_children(None).await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_after_request_budget() {
        let server = StaticServer::from_json("hw_server", TOPOLOGY)
            .unwrap()
            .disconnect_after(2);
        let jtag = server.view("jtag").await.unwrap();

        assert!(jtag.get_all().await.is_ok());
        assert!(jtag.get_children(None).await.is_ok());
        let err = jtag.update_regs("jsn-1-0", &[DNA_REGISTER], true).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(jtag.get_all().await.unwrap_err().is_fatal());
    }
}
