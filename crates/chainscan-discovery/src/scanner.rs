//! Device scanner that correlates nodes across every view

use chainscan_core::view::{CHIPSCOPE_VIEW, DEBUGCORE_VIEW, JTAG_VIEW, MEMORY_VIEW};
use chainscan_core::{
    device_dna, DeviceIdentification, Fingerprint, Node, NodeIdentification, Server, ServerType,
    View, ViewError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::chain::find_jtag_device;

/// Name prefix of virtual cable targets, e.g. `XVC:localhost:2542`
pub const XVC_PREFIX: &str = "XVC:";

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Scan aborted: {0}")]
    Aborted(#[from] ViewError),
}

/// Scanner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Hardware server views to scan, in order
    pub hw_views: Vec<String>,
    /// Auxiliary server views to scan, in order, when a server is present
    pub cs_views: Vec<String>,
    /// View used to locate devices on JTAG chains
    pub jtag_view: String,
    /// Node names starting with this prefix are keyed by name when they have no DNA
    pub xvc_prefix: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            hw_views: vec![
                JTAG_VIEW.to_string(),
                MEMORY_VIEW.to_string(),
                DEBUGCORE_VIEW.to_string(),
            ],
            cs_views: vec![CHIPSCOPE_VIEW.to_string()],
            jtag_view: JTAG_VIEW.to_string(),
            xvc_prefix: XVC_PREFIX.to_string(),
        }
    }
}

/// Key a device is correlated by within one scan
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CorrelationKey {
    Dna(Fingerprint),
    /// Virtual cable targets have no DNA and are keyed by node name
    Name(String),
}

/// Correlation state of a single scan pass
#[derive(Default)]
struct ScanSession {
    devices: Vec<DeviceIdentification>,
    by_key: HashMap<CorrelationKey, usize>,
}

impl ScanSession {
    fn get_mut(&mut self, key: &CorrelationKey) -> Option<&mut DeviceIdentification> {
        let index = *self.by_key.get(key)?;
        self.devices.get_mut(index)
    }

    fn insert(&mut self, key: CorrelationKey, device: DeviceIdentification) {
        self.by_key.insert(key, self.devices.len());
        self.devices.push(device);
    }

    /// Devices ordered by cable, then chain position
    fn into_devices(self) -> Vec<DeviceIdentification> {
        let mut devices = self.devices;
        devices.sort_by(DeviceIdentification::cmp_scan_order);
        devices
    }
}

/// Result of one completed scan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanResults {
    pub scanned_at: DateTime<Utc>,
    pub devices: Vec<DeviceIdentification>,
}

impl ScanResults {
    pub fn iter(&self) -> std::slice::Iter<'_, DeviceIdentification> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn find_by_dna(&self, dna: Fingerprint) -> Option<&DeviceIdentification> {
        self.devices.iter().find(|d| d.dna == Some(dna))
    }

    /// Compact JSON of the device list
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.devices)
    }

    /// Indented JSON of the device list
    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.devices.serialize(&mut ser)?;
        // serde_json only emits valid UTF-8
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

impl fmt::Display for ScanResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = self.to_pretty_json().map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl<'a> IntoIterator for &'a ScanResults {
    type Item = &'a DeviceIdentification;
    type IntoIter = std::slice::Iter<'a, DeviceIdentification>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}

/// Device scanner over a hardware server and an optional chipscope server
///
/// Scans are serialized; each one builds its results privately and publishes
/// them in a single swap, so readers never see a partial device list.
pub struct DeviceScanner {
    hw_server: Arc<dyn Server>,
    cs_server: Option<Arc<dyn Server>>,
    config: ScannerConfig,
    scan_lock: Mutex<()>,
    results: RwLock<Option<Arc<ScanResults>>>,
}

impl DeviceScanner {
    pub fn new(hw_server: Arc<dyn Server>, cs_server: Option<Arc<dyn Server>>) -> Self {
        Self::with_config(hw_server, cs_server, ScannerConfig::default())
    }

    pub fn with_config(
        hw_server: Arc<dyn Server>,
        cs_server: Option<Arc<dyn Server>>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            hw_server,
            cs_server,
            config,
            scan_lock: Mutex::new(()),
            results: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Scan all views and replace the cached results
    pub async fn scan(&self) -> Result<(), ScanError> {
        let _guard = self.scan_lock.lock().await;
        let results = Arc::new(self.scan_devices().await?);
        *self.results.write().await = Some(results);
        Ok(())
    }

    /// Cached results, scanning first if nothing has been scanned yet
    pub async fn get_scan_results(&self) -> Result<Arc<ScanResults>, ScanError> {
        if let Some(results) = self.cached_results().await {
            return Ok(results);
        }

        let _guard = self.scan_lock.lock().await;
        // Another caller may have finished a scan while we waited
        if let Some(results) = self.cached_results().await {
            return Ok(results);
        }
        let results = Arc::new(self.scan_devices().await?);
        *self.results.write().await = Some(results.clone());
        Ok(results)
    }

    /// Cached results without scanning
    pub async fn cached_results(&self) -> Option<Arc<ScanResults>> {
        self.results.read().await.clone()
    }

    /// Drop cached results so the next read scans again
    pub async fn invalidate(&self) {
        *self.results.write().await = None;
    }

    /// Run one scan pass and return its sorted device list
    async fn scan_devices(&self) -> Result<ScanResults, ScanError> {
        info!("Starting device scan");

        let jtag = match self.hw_server.view(&self.config.jtag_view).await {
            Ok(view) => Some(view),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "JTAG view unavailable, devices will not be located on chains");
                None
            }
        };

        let mut targets: Vec<(ServerType, &dyn Server, &str)> = self
            .config
            .hw_views
            .iter()
            .map(|name| (ServerType::HwServer, self.hw_server.as_ref(), name.as_str()))
            .collect();
        if let Some(cs_server) = &self.cs_server {
            targets.extend(
                self.config
                    .cs_views
                    .iter()
                    .map(|name| (ServerType::CsServer, cs_server.as_ref(), name.as_str())),
            );
        }

        let mut session = ScanSession::default();
        for (server_type, server, view_name) in targets {
            let view = match server.view(view_name).await {
                Ok(view) => view,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(server = %server_type, view = view_name, error = %e, "Skipping view");
                    continue;
                }
            };
            self.scan_view(&mut session, server_type, view.as_ref(), jtag.as_deref())
                .await?;
        }

        let devices = session.into_devices();
        info!(devices = devices.len(), "Scan complete");
        Ok(ScanResults {
            scanned_at: Utc::now(),
            devices,
        })
    }

    async fn scan_view(
        &self,
        session: &mut ScanSession,
        server_type: ServerType,
        view: &dyn View,
        jtag: Option<&dyn View>,
    ) -> Result<(), ScanError> {
        let view_name = view.name().to_string();
        let nodes = match view.get_all().await {
            Ok(nodes) => nodes,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(server = %server_type, view = %view_name, error = %e, "Skipping view");
                return Ok(());
            }
        };
        debug!(server = %server_type, view = %view_name, nodes = nodes.len(), "Scanning view");

        for node in nodes {
            let Some(name) = node.name() else {
                continue;
            };

            let dna = match device_dna(view, &node).await {
                // A zero DNA carries no identity
                Ok(dna) => dna.filter(|dna| !dna.is_zero()),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(ctx = %node.ctx, error = %e, "Could not read device DNA");
                    None
                }
            };

            let key = match dna {
                Some(dna) => CorrelationKey::Dna(dna),
                None if name.starts_with(&self.config.xvc_prefix) => {
                    CorrelationKey::Name(name.to_string())
                }
                None => {
                    trace!(view = %view_name, name, "Ignoring node without DNA");
                    continue;
                }
            };

            let ids = collect_identifications(server_type, view, &node, name).await?;

            if let Some(device) = session.get_mut(&key) {
                debug!(view = %view_name, name, added = ids.len(), "Merging into known device");
                device.merge(ids);
                continue;
            }

            let device = match key {
                CorrelationKey::Dna(dna) => {
                    let location = match jtag {
                        Some(jtag) => match find_jtag_device(jtag, dna).await {
                            Ok(location) => location,
                            Err(e) if e.is_fatal() => return Err(e.into()),
                            Err(e) => {
                                warn!(dna = %dna, error = %e, "JTAG chain lookup failed");
                                None
                            }
                        },
                        None => None,
                    };
                    match location {
                        Some(loc) => DeviceIdentification::on_chain(
                            dna,
                            loc.family,
                            loc.cable_ctx,
                            loc.cable_name,
                            loc.chain_index,
                            ids,
                        ),
                        None => DeviceIdentification::off_chain(dna, ids),
                    }
                }
                CorrelationKey::Name(_) => DeviceIdentification::xvc(ids),
            };

            info!(
                view = %view_name,
                name,
                dna = ?device.dna.map(|d| d.to_string()),
                cable = ?device.cable_name,
                "Found device"
            );
            session.insert(key, device);
        }

        Ok(())
    }
}

/// Identify a node and all of its named descendants, pre-order
///
/// Paths are built from the parent's path plus the child's name. Unnamed
/// descendants are left out, but their children are still visited.
async fn collect_identifications(
    server_type: ServerType,
    view: &dyn View,
    node: &Node,
    name: &str,
) -> Result<Vec<NodeIdentification>, ScanError> {
    let view_name = view.name();
    let hier_name = format!("{}/{}", view_name, name);
    let mut ids = vec![NodeIdentification::new(
        server_type,
        view_name,
        name,
        &node.ctx,
        &hier_name,
    )];

    let mut visited = HashSet::from([node.ctx.clone()]);
    let mut stack = vec![(node.ctx.clone(), hier_name, None)];
    while let Some((ctx, path, id)) = stack.pop() {
        if let Some(id) = id {
            ids.push(id);
        }

        let children = match view.get_children(Some(&ctx)).await {
            Ok(children) => children,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(view = view_name, ctx = %ctx, error = %e, "Could not list children");
                continue;
            }
        };

        // Pushed in reverse so the first child is visited next
        for child in children.into_iter().rev() {
            if !visited.insert(child.ctx.clone()) {
                continue;
            }
            match child.name() {
                Some(child_name) => {
                    let child_path = format!("{}/{}", path, child_name);
                    let id = NodeIdentification::new(
                        server_type,
                        view_name,
                        child_name,
                        &child.ctx,
                        &child_path,
                    );
                    stack.push((child.ctx.clone(), child_path, Some(id)));
                }
                None => stack.push((child.ctx.clone(), path.clone(), None)),
            }
        }
    }

    Ok(ids)
}
