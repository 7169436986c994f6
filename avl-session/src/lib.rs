//! Session layer for the AVL gateway
//!
//! Everything that sits between a raw byte stream and decoded records:
//! the IMEI handshake, the per-connection reassembly buffer and the
//! process-wide registry of devices.

pub mod imei;
pub mod registry;
pub mod session;
pub mod state;
pub mod statistics;

pub use avl_core::{AvlError, AvlResult};
pub use imei::{Handshake, parse_imei};
pub use registry::{DeviceEntry, SessionRegistry, SharedDevice};
pub use session::{DeviceSession, FeedError};
pub use state::ConnectionState;
pub use statistics::SessionStatistics;
