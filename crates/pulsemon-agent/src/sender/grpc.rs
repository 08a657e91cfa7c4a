use crate::config::AgentConfig;
use crate::sender::{request_id, MetricSender};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use pulsemon_common::convert;
use pulsemon_common::proto::metrics_agent_client::MetricsAgentClient;
use pulsemon_common::proto::{UpdateMetricRequest, UpdateMetricsRequest};
use pulsemon_common::types::Metric;
use tonic::metadata::MetadataValue;
use tonic::transport::Channel;
use tonic::Request;

/// Pushes metrics over the binary RPC. Every request carries a fresh
/// `request-id` and, when known, the agent's source address as `x-real-ip`
/// metadata.
pub struct GrpcSender {
    client: MetricsAgentClient<Channel>,
    key: Option<String>,
    source_ip: Option<String>,
}

impl GrpcSender {
    pub async fn connect(cfg: &AgentConfig, source_ip: Option<String>) -> Result<Self> {
        let endpoint = format!("http://{}", cfg.address);
        let channel = Channel::from_shared(endpoint.clone())
            .with_context(|| format!("invalid collector endpoint '{endpoint}'"))?
            .connect()
            .await
            .with_context(|| format!("cannot connect to '{endpoint}'"))?;
        tracing::info!(endpoint, "connected to collector");
        Ok(Self {
            client: MetricsAgentClient::new(channel),
            key: cfg.key.clone(),
            source_ip,
        })
    }

    fn request<T>(&self, message: T) -> Result<Request<T>> {
        let mut req = Request::new(message);
        let id: MetadataValue<_> = request_id()
            .parse()
            .context("request id is not valid metadata")?;
        req.metadata_mut().insert("request-id", id);
        if let Some(ip) = &self.source_ip {
            let ip: MetadataValue<_> = ip
                .parse()
                .context("source ip is not valid metadata")?;
            req.metadata_mut().insert("x-real-ip", ip);
        }
        Ok(req)
    }
}

#[async_trait]
impl MetricSender for GrpcSender {
    async fn send_one(&self, metric: &Metric) -> Result<()> {
        let req = self.request(UpdateMetricRequest {
            metric: Some(convert::to_wire(metric, self.key.as_deref())),
        })?;
        let resp = self.client.clone().update_metric(req).await?.into_inner();
        if !resp.error.is_empty() {
            bail!("collector rejected metric: {}", resp.error);
        }
        Ok(())
    }

    async fn send_batch(&self, metrics: &[Metric]) -> Result<()> {
        let req = self.request(UpdateMetricsRequest {
            metrics: metrics
                .iter()
                .map(|m| convert::to_wire(m, self.key.as_deref()))
                .collect(),
        })?;
        let resp = self.client.clone().update_metrics(req).await?.into_inner();
        if !resp.error.is_empty() {
            bail!("collector rejected batch: {}", resp.error);
        }
        Ok(())
    }
}
