//! chainscan Core - Device identity types, view traits, and property decoding
//!
//! This crate provides the foundational pieces of the chainscan system:
//! - Collaborator traits for debug servers and their hierarchical views
//! - Device and node identification records produced by a scan
//! - Device DNA (fingerprint) extraction from JTAG registers or DNA words
//! - Property normalization and hierarchical node naming
//! - A static, file-backed server for offline topologies and tests

pub mod device;
pub mod fingerprint;
pub mod hier;
pub mod node;
pub mod props;
pub mod static_view;
pub mod view;

pub use device::{DeviceIdentification, Fingerprint, NodeIdentification, ServerType};
pub use fingerprint::device_dna;
pub use hier::{node_hier_name, HierarchyNamer};
pub use node::{JtagRegister, Node, NodeKind, PropValue, Props};
pub use props::{normalize_node_props, NormalizedProps, NormalizedValue};
pub use static_view::{FixtureError, StaticServer, StaticView, TopologyFile};
pub use view::{Server, View, ViewError};
