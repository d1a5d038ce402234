//! chainscan Discovery - Cross-view device correlation for debug servers
//!
//! This crate builds the logical device list from a hardware server and an
//! optional chipscope server:
//! - JTAG chain lookup to place a device on its cable
//! - Full view snapshots with hierarchical names and normalized properties
//! - The device scanner that merges nodes from every view by device DNA

pub mod chain;
pub mod scanner;
pub mod snapshot;

pub use chain::{cable_display_name, find_jtag_device, ChainLocation};
pub use scanner::{DeviceScanner, ScanError, ScanResults, ScannerConfig};
pub use snapshot::{
    get_chipscope_view_snapshot, get_debugcore_view_snapshot, get_jtag_view_snapshot,
    get_memory_view_snapshot, get_view_snapshot, CableSnapshot, JtagViewSnapshot, NodeSnapshot,
    ViewSnapshot,
};
