//! Device DNA extraction
//!
//! JTAG devices keep their DNA in a `dna` register that has to be refreshed
//! before it is read. Every other node kind reports it directly as a
//! `DeviceDNA` property holding four 32-bit words, least significant first.

use tracing::{trace, warn};

use crate::device::Fingerprint;
use crate::node::{Node, NodeKind, Props};
use crate::view::{View, ViewError};

/// Register holding the DNA of a JTAG device
pub const DNA_REGISTER: &str = "dna";
/// Property holding the DNA words of non-JTAG nodes
pub const DEVICE_DNA_PROP: &str = "DeviceDNA";

/// Extract the DNA of a node, if it has one
///
/// Only server-level failures are returned as errors. A register refresh that
/// fails for any other reason falls back to the last value the node reported.
pub async fn device_dna(view: &dyn View, node: &Node) -> Result<Option<Fingerprint>, ViewError> {
    match node.kind {
        NodeKind::JtagDevice => register_dna(view, node).await,
        NodeKind::JtagCable | NodeKind::Generic => Ok(dna_from_props(&node.props)),
    }
}

async fn register_dna(view: &dyn View, node: &Node) -> Result<Option<Fingerprint>, ViewError> {
    let Some(cached) = node.register(DNA_REGISTER) else {
        return Ok(None);
    };

    let refreshed = match view.update_regs(&node.ctx, &[DNA_REGISTER], true).await {
        Ok(regs) => regs.into_iter().find(|reg| reg.name == DNA_REGISTER),
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            warn!(ctx = %node.ctx, error = %e, "DNA refresh failed, using cached value");
            None
        }
    };

    let data = refreshed.as_ref().map_or(&cached.data, |reg| &reg.data);
    let dna = Fingerprint::from_le_bytes(data);
    if dna.is_none() {
        warn!(ctx = %node.ctx, width = data.len(), "DNA register wider than 128 bits");
    }
    Ok(dna)
}

/// Compose a DNA from a `DeviceDNA` word list
///
/// Anything but exactly four non-negative 32-bit words is treated as absent.
pub fn dna_from_props(props: &Props) -> Option<Fingerprint> {
    let words = props.get(DEVICE_DNA_PROP)?.as_list()?;
    if words.len() != 4 {
        trace!(len = words.len(), "Ignoring DeviceDNA with unexpected length");
        return None;
    }

    let mut out = [0u32; 4];
    for (slot, word) in out.iter_mut().zip(words) {
        *slot = u32::try_from(word.as_int()?).ok()?;
    }
    Some(Fingerprint::from_words(out))
}
