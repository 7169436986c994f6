//! Transport layer module for the AVL gateway
//!
//! This crate wraps accepted device sockets behind the [`StreamAccessor`]
//! trait, with idle read and write timeouts applied per call.

pub mod stream;
pub mod tcp;

pub use avl_core::{AvlError, AvlResult};
pub use stream::StreamAccessor;
pub use tcp::{TcpSettings, TcpTransport};
