//! avl_rs - Teltonika AVL Codec 8 gateway in Rust
//!
//! Receives telemetry from GPS tracking devices over TCP, decodes the
//! Codec 8 binary format and forwards each record downstream as JSON.
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `avl-core`: Core types (records, packets, IO element names) and errors
//! - `avl-codec`: Codec 8 decoder, encoder and CRC
//! - `avl-transport`: Transport layer (TCP with idle timeouts)
//! - `avl-session`: Session layer (IMEI handshake, stream reassembly, registry)
//! - `avl-server`: Server implementation (listener, handler, downstream sink)
//!
//! # Implementation Status
//!
//! ## ✅ 已完成
//! - Codec 8 解码（完整帧、半帧、格式错误三种结果）
//! - CRC-16/IBM 校验
//! - IMEI 握手
//! - 会话注册表（断线重连保留历史记录）
//! - HTTP JSON 下游转发
//!
//! ## 📋 待实现
//! - Codec 8 Extended（2 字节 IO ID）
//! - Codec 12 命令下发
//!
//! # Usage
//!
//! ```no_run
//! use avl::server::{ServerConfig, ServerListener};
//! ```

// Re-export core types
pub use avl_core::{
    AvlError, AvlPacket, AvlRecord, AvlResult, GpsElement, IoElementRegistry, MalformedFrame,
};

// Re-export codec API
pub mod codec {
    pub use avl_codec::*;
}

// Re-export transport API
pub mod transport {
    pub use avl_transport::*;
}

// Re-export session API
pub mod session {
    pub use avl_session::*;
}

// Re-export server API
pub mod server {
    pub use avl_server::*;
}
