//! Device identity types produced by a scan

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// 128-bit device DNA, unique per physical silicon device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub u128);

impl Fingerprint {
    /// Compose a fingerprint from four 32-bit words, least significant first
    pub fn from_words(words: [u32; 4]) -> Self {
        Self(
            (words[3] as u128) << 96
                | (words[2] as u128) << 64
                | (words[1] as u128) << 32
                | words[0] as u128,
        )
    }

    /// Decode an unsigned little-endian byte sequence
    ///
    /// Returns `None` when the value does not fit in 128 bits.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        uint_from_le_bytes(bytes).map(Self)
    }

    pub fn value(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:032x}", self.0)
    }
}

/// Decode an unsigned little-endian integer of arbitrary width
///
/// Trailing zero bytes are ignored, so a wide register holding a small value
/// still decodes. Returns `None` if more than 128 significant bits remain.
pub fn uint_from_le_bytes(bytes: &[u8]) -> Option<u128> {
    let significant = bytes
        .iter()
        .rposition(|&b| b != 0)
        .map(|pos| pos + 1)
        .unwrap_or(0);
    if significant > 16 {
        return None;
    }
    Some(
        bytes[..significant]
            .iter()
            .rev()
            .fold(0u128, |acc, &b| (acc << 8) | b as u128),
    )
}

/// Which server connection a view belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    /// Hardware server (jtag, memory, debugcore views)
    HwServer,
    /// Auxiliary chipscope server
    CsServer,
}

impl ServerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HwServer => "hw_server",
            Self::CsServer => "cs_server",
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One occurrence of a device-related node in one view
// Fields stay in key order so serialized output is sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentification {
    /// View-local context of the node
    pub context: String,
    /// Slash-joined path starting with the view name
    pub hier_name: String,
    /// The node's `Name` property
    pub name: String,
    pub server_type: ServerType,
    pub view_name: String,
}

impl NodeIdentification {
    pub fn new(
        server_type: ServerType,
        view_name: impl Into<String>,
        name: impl Into<String>,
        context: impl Into<String>,
        hier_name: impl Into<String>,
    ) -> Self {
        Self {
            context: context.into(),
            hier_name: hier_name.into(),
            name: name.into(),
            server_type,
            view_name: view_name.into(),
        }
    }
}

/// Family tag used for virtual cable (XVC) targets
pub const XVC_FAMILY: &str = "xvc";

/// Chain index recorded when a fingerprinted device is not on any JTAG chain
pub const JTAG_INDEX_NOT_FOUND: i32 = -1;

/// A logical device, correlated across every view it appears in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentification {
    /// Context of the JTAG cable hosting the device
    pub cable_context: Option<String>,
    /// Cable label: description and serial when known
    pub cable_name: Option<String>,
    pub dna: Option<Fingerprint>,
    /// Architecture name, or `"xvc"` for virtual cable targets
    pub family: Option<String>,
    /// Position on the chain; `-1` if searched and not found, absent for XVC
    pub jtag_index: Option<i32>,
    pub node_identification: Vec<NodeIdentification>,
}

impl DeviceIdentification {
    /// A fingerprinted device located on a JTAG chain
    pub fn on_chain(
        dna: Fingerprint,
        family: Option<String>,
        cable_context: String,
        cable_name: String,
        jtag_index: i32,
        node_identification: Vec<NodeIdentification>,
    ) -> Self {
        Self {
            cable_context: Some(cable_context),
            cable_name: Some(cable_name),
            dna: Some(dna),
            family,
            jtag_index: Some(jtag_index),
            node_identification,
        }
    }

    /// A fingerprinted device that no JTAG cable reports
    pub fn off_chain(dna: Fingerprint, node_identification: Vec<NodeIdentification>) -> Self {
        Self {
            cable_context: None,
            cable_name: None,
            dna: Some(dna),
            family: None,
            jtag_index: Some(JTAG_INDEX_NOT_FOUND),
            node_identification,
        }
    }

    /// A virtual cable target keyed by its name
    pub fn xvc(node_identification: Vec<NodeIdentification>) -> Self {
        Self {
            cable_context: None,
            cable_name: None,
            dna: None,
            family: Some(XVC_FAMILY.to_string()),
            jtag_index: None,
            node_identification,
        }
    }

    pub fn is_xvc(&self) -> bool {
        self.family.as_deref() == Some(XVC_FAMILY)
    }

    /// Append identifications found for the same device elsewhere
    pub fn merge(&mut self, more: Vec<NodeIdentification>) {
        self.node_identification.extend(more);
    }

    /// Find the context this device has in the named view
    pub fn context_in(&self, view_name: &str) -> Option<&str> {
        self.node_identification
            .iter()
            .find(|id| id.view_name == view_name)
            .map(|id| id.context.as_str())
    }

    /// Scan ordering: by cable name, then chain index; absent values sort last
    pub fn cmp_scan_order(&self, other: &Self) -> Ordering {
        cmp_none_last(&self.cable_name, &other.cable_name)
            .then_with(|| cmp_none_last(&self.jtag_index, &other.jtag_index))
    }
}

fn cmp_none_last<T: Ord>(a: &Option<T>, b: &Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
