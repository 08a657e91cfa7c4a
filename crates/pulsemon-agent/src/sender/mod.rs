//! Transport-side senders. Both transports expose the same two pushes with
//! identical semantics; the reporter is generic over this trait.

pub mod grpc;
pub mod http;

use async_trait::async_trait;
use pulsemon_common::types::Metric;
use rand::Rng;

pub use grpc::GrpcSender;
pub use http::HttpSender;

/// Pushes metrics to the collector. Failures are transient transport
/// errors: the reporter logs them and re-sends from the current registry on
/// the next cycle.
#[async_trait]
pub trait MetricSender: Send + Sync {
    async fn send_one(&self, metric: &Metric) -> anyhow::Result<()>;

    async fn send_batch(&self, metrics: &[Metric]) -> anyhow::Result<()>;
}

/// 16-character hex request id (8 random bytes).
pub fn request_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    hex::encode(bytes)
}
