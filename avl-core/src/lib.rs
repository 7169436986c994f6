//! Core types and utilities for the AVL protocol
//!
//! This crate provides the record model, the IO element registry and the
//! error type shared by every layer of the gateway.

pub mod error;
pub mod io_element;
pub mod record;

pub use error::{AvlError, AvlResult, MalformedFrame};
pub use io_element::IoElementRegistry;
pub use record::{AvlPacket, AvlRecord, GpsElement, RECORD_HEADER_LENGTH, RTP_WINDOW, real_time_pass};
