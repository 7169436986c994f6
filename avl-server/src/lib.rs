//! Teltonika AVL gateway server
//!
//! This crate accepts device connections, runs the IMEI handshake and the
//! Codec 8 read/decode/acknowledge loop, and forwards every decoded record to
//! a downstream sink.
//!
//! # TODO
//!
//! ## 服务器基础
//! - [x] 服务器配置管理（TOML）
//! - [x] 连接监听和接受
//! - [x] 每个连接独立任务
//! - [x] 优雅停止监听
//!
//! ## 协议处理
//! - [x] IMEI 握手（跨多次读取）
//! - [x] Codec 8 解码和确认
//! - [ ] 格式错误帧后的流重同步
//! - [ ] Codec 8 Extended / Codec 16
//!
//! ## 下游转发
//! - [x] HTTP JSON 转发
//! - [x] 转发超时和失败统计
//! - [ ] 失败记录重试队列

pub mod config;
pub mod forward;
pub mod handler;
pub mod listener;
pub mod sink;

pub use avl_core::{AvlError, AvlResult};
pub use config::{DEFAULT_PORT, ServerConfig};
pub use forward::Forwarder;
pub use handler::ConnectionHandler;
pub use listener::ServerListener;
pub use sink::{
    ChannelSink, ErrorReport, HttpSink, LogSink, NO_VALID_DATA, RecordSink, SinkMessage,
    SinkPayload, TIMESTAMP_FORMAT,
};
