//! Property normalization into a serializable shape
//!
//! Normalized values are limited to booleans, integers, text and nested maps.
//! Registers are refreshed before they are decoded; raw byte sequences and
//! register contents are read as unsigned little-endian integers.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use crate::device::uint_from_le_bytes;
use crate::node::{Node, PropValue, Props};
use crate::view::{View, ViewError};

/// Normalized property map
pub type NormalizedProps = BTreeMap<String, NormalizedValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NormalizedValue {
    Bool(bool),
    Int(i64),
    UInt(u128),
    Text(String),
    Map(NormalizedProps),
}

/// Normalize all properties of a node, refreshing its registers first
///
/// All registers found anywhere in the property tree are refreshed in a single
/// round trip. A refresh failure that does not take down the server falls back
/// to the values the node already carries.
pub async fn normalize_node_props(
    view: &dyn View,
    node: &Node,
) -> Result<NormalizedProps, ViewError> {
    let mut names = Vec::new();
    collect_register_names(&node.props, &mut names);

    let mut refreshed = HashMap::new();
    if !names.is_empty() {
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        match view.update_regs(&node.ctx, &names, true).await {
            Ok(regs) => {
                refreshed.extend(regs.into_iter().map(|reg| (reg.name, reg.data)));
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(ctx = %node.ctx, error = %e, "Register refresh failed, using cached values");
            }
        }
    }

    Ok(normalize_props(&node.props, &refreshed))
}

/// Normalize a property map given already-refreshed register contents
pub fn normalize_props(props: &Props, refreshed: &HashMap<String, Vec<u8>>) -> NormalizedProps {
    props
        .iter()
        .map(|(key, value)| (key.clone(), normalize_value(value, refreshed)))
        .collect()
}

fn normalize_value(value: &PropValue, refreshed: &HashMap<String, Vec<u8>>) -> NormalizedValue {
    match value {
        PropValue::Bool(b) => NormalizedValue::Bool(*b),
        PropValue::Int(i) => NormalizedValue::Int(*i),
        PropValue::Str(s) => NormalizedValue::Text(s.clone()),
        PropValue::Bytes(bytes) => decode_bytes(bytes),
        PropValue::Register(reg) => {
            decode_bytes(refreshed.get(&reg.name).unwrap_or(&reg.data))
        }
        PropValue::Map(map) => NormalizedValue::Map(normalize_props(map, refreshed)),
        other => NormalizedValue::Text(other.to_string()),
    }
}

/// Decode little-endian bytes, falling back to hex text past 128 bits
fn decode_bytes(bytes: &[u8]) -> NormalizedValue {
    match uint_from_le_bytes(bytes) {
        Some(v) => NormalizedValue::UInt(v),
        None => {
            let hex: String = bytes.iter().rev().map(|b| format!("{:02x}", b)).collect();
            NormalizedValue::Text(format!("0x{}", hex))
        }
    }
}

fn collect_register_names(props: &Props, names: &mut Vec<String>) {
    for value in props.values() {
        match value {
            PropValue::Register(reg) if !names.contains(&reg.name) => names.push(reg.name.clone()),
            PropValue::Map(map) => collect_register_names(map, names),
            _ => {}
        }
    }
}
