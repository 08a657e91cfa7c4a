//! pulsemon-server: receives metrics from agents over HTTP/JSON or the
//! binary RPC, keeps the last-known value per metric in memory, and
//! persists the table through a pluggable backuper.

pub mod config;
pub mod grpc;
pub mod http;
pub mod service;
pub mod subnet;
