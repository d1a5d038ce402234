//! JTAG chain lookup by device DNA

use chainscan_core::{device_dna, Fingerprint, Node, NodeKind, View, ViewError};
use serde::Serialize;
use tracing::{debug, warn};

/// Cable description property
const DESCRIPTION_PROP: &str = "Description";
/// Cable serial number property
const SERIAL_PROP: &str = "Serial";

/// Where a device sits on a physical JTAG chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainLocation {
    pub cable_ctx: String,
    pub cable_name: String,
    /// Position among the cable's devices, in enumeration order
    pub chain_index: i32,
    pub node_ctx: String,
    pub family: Option<String>,
}

/// Human-friendly cable label: description plus serial, or the context
pub fn cable_display_name(cable: &Node) -> String {
    match cable.prop_str(DESCRIPTION_PROP).filter(|desc| !desc.is_empty()) {
        Some(desc) => match cable.prop_str(SERIAL_PROP) {
            Some(serial) if !serial.is_empty() => format!("{} {}", desc, serial),
            _ => desc.to_string(),
        },
        None => cable.ctx.clone(),
    }
}

/// The JTAG cables at the top of the view
pub(crate) async fn jtag_cables(jtag: &dyn View) -> Result<Vec<Node>, ViewError> {
    let mut cables = Vec::new();
    for node in jtag.get_children(None).await? {
        if let Some(cable) = jtag.get_node(&node.ctx, Some(NodeKind::JtagCable)).await? {
            cables.push(cable);
        }
    }
    Ok(cables)
}

/// Every child of a cable, paired with its chain index if it is a JTAG device
///
/// Children that are not JTAG devices get no index and do not advance it.
pub(crate) async fn cable_children(
    jtag: &dyn View,
    cable: &Node,
) -> Result<Vec<(Option<i32>, Node)>, ViewError> {
    let mut children = Vec::new();
    let mut index = 0;
    for child in jtag.get_children(Some(&cable.ctx)).await? {
        match jtag.get_node(&child.ctx, Some(NodeKind::JtagDevice)).await? {
            Some(device) => {
                children.push((Some(index), device));
                index += 1;
            }
            None => children.push((None, child)),
        }
    }
    Ok(children)
}

/// The devices on a cable in chain order, paired with their chain index
pub(crate) async fn chain_devices(
    jtag: &dyn View,
    cable: &Node,
) -> Result<Vec<(i32, Node)>, ViewError> {
    Ok(cable_children(jtag, cable)
        .await?
        .into_iter()
        .filter_map(|(index, node)| index.map(|index| (index, node)))
        .collect())
}

/// Find the cable and chain position of the device with the given DNA
///
/// Devices without a DNA still count toward the chain index. A cable whose
/// devices cannot be listed is skipped; only server-level failures are
/// returned as errors.
pub async fn find_jtag_device(
    jtag: &dyn View,
    dna: Fingerprint,
) -> Result<Option<ChainLocation>, ViewError> {
    for cable in jtag_cables(jtag).await? {
        let devices = match chain_devices(jtag, &cable).await {
            Ok(devices) => devices,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(cable = %cable.ctx, error = %e, "Skipping unreadable JTAG cable");
                continue;
            }
        };

        for (chain_index, device) in devices {
            if device_dna(jtag, &device).await? == Some(dna) {
                let location = ChainLocation {
                    cable_ctx: cable.ctx.clone(),
                    cable_name: cable_display_name(&cable),
                    chain_index,
                    node_ctx: device.ctx.clone(),
                    family: device.arch_name().map(str::to_string),
                };
                debug!(
                    dna = %dna,
                    cable = %location.cable_name,
                    index = chain_index,
                    "Located device on JTAG chain"
                );
                return Ok(Some(location));
            }
        }
    }

    debug!(dna = %dna, "Device not found on any JTAG chain");
    Ok(None)
}
