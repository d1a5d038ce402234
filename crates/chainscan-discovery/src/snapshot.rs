//! Full, serializable snapshots of a view's node trees
//!
//! Every node is captured with its DNA, hierarchical name and normalized
//! properties, and its children keyed by context. Snapshots of the jtag view
//! group every child of a top-level node under that node as its devices, and
//! carry the cable context and chain index on every node below it. Children
//! that are not JTAG devices get index -1.

use chainscan_core::device::JTAG_INDEX_NOT_FOUND;
use chainscan_core::node::PARENT_ID_PROP;
use chainscan_core::view::{CHIPSCOPE_VIEW, DEBUGCORE_VIEW, JTAG_VIEW, MEMORY_VIEW};
use chainscan_core::{
    device_dna, normalize_node_props, Fingerprint, HierarchyNamer, Node, NormalizedProps, Server,
    ServerType, View, ViewError,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::chain::cable_children;

/// Position of a jtag view node: its cable and chain index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JtagPosition {
    pub jtag_cable_ctx: String,
    pub jtag_index: i32,
}

/// Fields only jtag view nodes carry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JtagNodeFields {
    pub family: Option<String>,
    #[serde(flatten)]
    pub position: JtagPosition,
    pub parent_ctx: Option<String>,
}

/// A node and its whole subtree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub server: ServerType,
    pub view: String,
    pub ctx: String,
    pub dna: Option<Fingerprint>,
    pub name: Option<String>,
    pub hier_name: String,
    #[serde(flatten)]
    pub jtag: Option<JtagNodeFields>,
    pub props: NormalizedProps,
    pub children: BTreeMap<String, NodeSnapshot>,
}

/// A JTAG cable and the devices on its chain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CableSnapshot {
    pub name: Option<String>,
    pub ctx: String,
    pub props: NormalizedProps,
    pub devices: BTreeMap<String, NodeSnapshot>,
}

/// Snapshot of a generic view, keyed by root context
pub type ViewSnapshot = BTreeMap<String, NodeSnapshot>;

/// Snapshot of the jtag view, keyed by cable context
pub type JtagViewSnapshot = BTreeMap<String, CableSnapshot>;

/// Snapshot the subtree rooted at `root`
///
/// The tree is walked pre-order with an explicit stack, so deep topologies do
/// not grow the call stack. A context seen twice is not descended into again.
pub async fn snapshot_tree(
    server: ServerType,
    view: &dyn View,
    namer: &mut HierarchyNamer<'_>,
    root: Node,
    position: Option<&JtagPosition>,
) -> Result<NodeSnapshot, ViewError> {
    let mut records: Vec<Option<NodeSnapshot>> = Vec::new();
    let mut parents: Vec<Option<usize>> = Vec::new();
    let mut visited = HashSet::from([root.ctx.clone()]);
    let mut stack = vec![(root, None)];

    while let Some((node, parent)) = stack.pop() {
        let index = records.len();
        records.push(Some(snapshot_node(server, view, namer, &node, position).await?));
        parents.push(parent);

        let children = view.get_children(Some(&node.ctx)).await?;
        for child in children.into_iter().rev() {
            if visited.insert(child.ctx.clone()) {
                stack.push((child, Some(index)));
            }
        }
    }

    // Children always come after their parent, so folding from the back
    // completes every subtree before it is attached.
    for index in (1..records.len()).rev() {
        let (Some(parent), Some(record)) = (parents[index], records[index].take()) else {
            continue;
        };
        if let Some(Some(parent_record)) = records.get_mut(parent) {
            parent_record.children.insert(record.ctx.clone(), record);
        }
    }

    records
        .first_mut()
        .and_then(Option::take)
        .ok_or_else(|| ViewError::ViewUnavailable(view.name().to_string()))
}

async fn snapshot_node(
    server: ServerType,
    view: &dyn View,
    namer: &mut HierarchyNamer<'_>,
    node: &Node,
    position: Option<&JtagPosition>,
) -> Result<NodeSnapshot, ViewError> {
    let jtag = position.map(|position| JtagNodeFields {
        family: node.arch_name().map(str::to_string),
        position: position.clone(),
        parent_ctx: node.prop_str(PARENT_ID_PROP).map(str::to_string),
    });

    Ok(NodeSnapshot {
        server,
        view: view.name().to_string(),
        ctx: node.ctx.clone(),
        dna: device_dna(view, node).await?,
        name: node.name().map(str::to_string),
        hier_name: namer.hier_name(node).await?,
        jtag,
        props: normalize_node_props(view, node).await?,
        children: BTreeMap::new(),
    })
}

/// Snapshot every root of a view on the given server
pub async fn get_view_snapshot(
    server: &dyn Server,
    server_type: ServerType,
    view_name: &str,
) -> Result<ViewSnapshot, ViewError> {
    let view = server.view(view_name).await?;
    let mut namer = HierarchyNamer::new(view.as_ref());
    let mut snapshot = ViewSnapshot::new();

    for root in view.get_children(None).await? {
        let tree = snapshot_tree(server_type, view.as_ref(), &mut namer, root, None).await?;
        snapshot.insert(tree.ctx.clone(), tree);
    }

    debug!(view = view_name, roots = snapshot.len(), "Captured view snapshot");
    Ok(snapshot)
}

/// Snapshot the hardware server's jtag view, grouped by cable
///
/// Every root is treated as a cable and every one of its children is listed,
/// JTAG device or not.
pub async fn get_jtag_view_snapshot(hw_server: &dyn Server) -> Result<JtagViewSnapshot, ViewError> {
    let view = hw_server.view(JTAG_VIEW).await?;
    let jtag = view.as_ref();
    let mut namer = HierarchyNamer::new(jtag);
    let mut snapshot = JtagViewSnapshot::new();

    for cable in jtag.get_children(None).await? {
        let mut devices = BTreeMap::new();
        for (jtag_index, device) in cable_children(jtag, &cable).await? {
            let position = JtagPosition {
                jtag_cable_ctx: cable.ctx.clone(),
                jtag_index: jtag_index.unwrap_or(JTAG_INDEX_NOT_FOUND),
            };
            let tree =
                snapshot_tree(ServerType::HwServer, jtag, &mut namer, device, Some(&position))
                    .await?;
            devices.insert(tree.ctx.clone(), tree);
        }

        snapshot.insert(
            cable.ctx.clone(),
            CableSnapshot {
                name: cable.name().map(str::to_string),
                ctx: cable.ctx.clone(),
                props: normalize_node_props(jtag, &cable).await?,
                devices,
            },
        );
    }

    debug!(cables = snapshot.len(), "Captured jtag view snapshot");
    Ok(snapshot)
}

pub async fn get_memory_view_snapshot(hw_server: &dyn Server) -> Result<ViewSnapshot, ViewError> {
    get_view_snapshot(hw_server, ServerType::HwServer, MEMORY_VIEW).await
}

pub async fn get_debugcore_view_snapshot(hw_server: &dyn Server) -> Result<ViewSnapshot, ViewError> {
    get_view_snapshot(hw_server, ServerType::HwServer, DEBUGCORE_VIEW).await
}

pub async fn get_chipscope_view_snapshot(cs_server: &dyn Server) -> Result<ViewSnapshot, ViewError> {
    get_view_snapshot(cs_server, ServerType::CsServer, CHIPSCOPE_VIEW).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainscan_core::{NodeKind, NormalizedValue, PropValue, StaticServer, StaticView};

    fn hw_server() -> StaticServer {
        StaticServer::new("hw_server")
            .with_view(StaticView::new(
                "jtag",
                vec![
                    Node::new("jsn-1", NodeKind::JtagCable)
                        .with_name("jsn-1")
                        .with_prop("Description", "JTAG-HS3"),
                    Node::new("jsn-1-0", NodeKind::JtagDevice)
                        .with_parent("jsn-1")
                        .with_name("arm_dap"),
                    Node::new("jsn-1-1", NodeKind::JtagDevice)
                        .with_parent("jsn-1")
                        .with_name("xcvc1902")
                        .with_prop("arch_name", "versal")
                        .with_prop("ParentID", "jsn-1")
                        .with_register("dna", vec![0x2a]),
                    Node::new("jsn-1-1-0", NodeKind::Generic)
                        .with_parent("jsn-1-1")
                        .with_name("pmc"),
                ],
            ))
            .with_view(StaticView::new(
                "memory",
                vec![
                    Node::new("rt-1", NodeKind::Generic)
                        .with_name("Versal")
                        .with_prop(
                            "DeviceDNA",
                            PropValue::List((1..=4).map(PropValue::Int).collect()),
                        ),
                    Node::new("rt-2", NodeKind::Generic)
                        .with_parent("rt-1")
                        .with_name("APU"),
                    Node::new("rt-3", NodeKind::Generic)
                        .with_parent("rt-2")
                        .with_name("Cortex-A72 #0"),
                    Node::new("rt-4", NodeKind::Generic)
                        .with_parent("rt-2")
                        .with_name("Cortex-A72 #1"),
                ],
            ))
    }

    #[tokio::test]
    async fn test_generic_view_snapshot() {
        let server = hw_server();
        let snapshot = get_memory_view_snapshot(&server).await.unwrap();

        assert_eq!(snapshot.len(), 1);
        let versal = &snapshot["rt-1"];
        assert_eq!(versal.server, ServerType::HwServer);
        assert_eq!(versal.view, "memory");
        assert_eq!(versal.hier_name, "Versal");
        assert_eq!(versal.dna, Some(Fingerprint::from_words([1, 2, 3, 4])));
        assert!(versal.jtag.is_none());

        let apu = &versal.children["rt-2"];
        assert_eq!(apu.hier_name, "Versal/APU");
        assert_eq!(apu.children.len(), 2);
        assert_eq!(
            apu.children["rt-4"].hier_name,
            "Versal/APU/Cortex-A72 #1"
        );
        assert_eq!(
            apu.props["Name"],
            NormalizedValue::Text("APU".to_string())
        );
    }

    #[tokio::test]
    async fn test_jtag_view_snapshot() {
        let server = hw_server();
        let snapshot = get_jtag_view_snapshot(&server).await.unwrap();

        let cable = &snapshot["jsn-1"];
        assert_eq!(cable.name.as_deref(), Some("jsn-1"));
        assert_eq!(cable.devices.len(), 2);

        let versal = &cable.devices["jsn-1-1"];
        assert_eq!(versal.dna, Some(Fingerprint(0x2a)));
        assert_eq!(versal.hier_name, "jsn-1/xcvc1902");
        let fields = versal.jtag.as_ref().unwrap();
        assert_eq!(fields.family.as_deref(), Some("versal"));
        assert_eq!(fields.parent_ctx.as_deref(), Some("jsn-1"));
        assert_eq!(fields.position.jtag_index, 1);

        let pmc = &versal.children["jsn-1-1-0"];
        let pmc_fields = pmc.jtag.as_ref().unwrap();
        assert_eq!(pmc_fields.position.jtag_cable_ctx, "jsn-1");
        assert_eq!(pmc_fields.position.jtag_index, 1);
        assert_eq!(pmc.hier_name, "jsn-1/xcvc1902/pmc");
    }

    #[tokio::test]
    async fn test_jtag_snapshot_serializes_flat_fields() {
        let server = hw_server();
        let snapshot = get_jtag_view_snapshot(&server).await.unwrap();
        let json = serde_json::to_value(&snapshot["jsn-1"].devices["jsn-1-0"]).unwrap();

        assert_eq!(json["jtag_cable_ctx"], "jsn-1");
        assert_eq!(json["jtag_index"], 0);
        assert_eq!(json["family"], serde_json::Value::Null);
        assert_eq!(json["hier_name"], "jsn-1/arm_dap");
    }

    #[tokio::test]
    async fn test_jtag_snapshot_keeps_every_node() {
        let server = StaticServer::new("hw_server").with_view(StaticView::new(
            "jtag",
            vec![
                Node::new("jsn-1", NodeKind::JtagCable).with_name("jsn-1"),
                Node::new("jsn-1-x", NodeKind::Generic)
                    .with_parent("jsn-1")
                    .with_name("bscan"),
                Node::new("jsn-1-0", NodeKind::JtagDevice)
                    .with_parent("jsn-1")
                    .with_name("xcvc1902"),
                Node::new("xvc-root", NodeKind::Generic).with_name("XVC:localhost:2542"),
            ],
        ));
        let snapshot = get_jtag_view_snapshot(&server).await.unwrap();

        let roots: Vec<&str> = snapshot.keys().map(String::as_str).collect();
        assert_eq!(roots, vec!["jsn-1", "xvc-root"]);
        assert!(snapshot["xvc-root"].devices.is_empty());

        let devices = &snapshot["jsn-1"].devices;
        assert_eq!(devices.len(), 2);
        let bscan = devices["jsn-1-x"].jtag.as_ref().unwrap();
        assert_eq!(bscan.position.jtag_index, JTAG_INDEX_NOT_FOUND);
        let versal = devices["jsn-1-0"].jtag.as_ref().unwrap();
        assert_eq!(versal.position.jtag_index, 0);
    }

    #[tokio::test]
    async fn test_chipscope_snapshot_on_cs_server() {
        let server = StaticServer::new("cs_server").with_view(StaticView::new(
            "chipscope",
            vec![Node::new("cs-1", NodeKind::Generic).with_name("xcvc1902")],
        ));
        let snapshot = get_chipscope_view_snapshot(&server).await.unwrap();
        assert_eq!(snapshot["cs-1"].server, ServerType::CsServer);
    }

    #[tokio::test]
    async fn test_missing_view_is_error() {
        let server = hw_server();
        assert!(get_debugcore_view_snapshot(&server).await.is_err());
    }
}
