use crate::config::AgentConfig;
use crate::sender::MetricSender;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use pulsemon_common::sign;
use pulsemon_common::types::Metric;
use pulsemon_crypto::Encryptor;
use reqwest::header::CONTENT_TYPE;

/// Pushes metrics over HTTP/JSON: single updates to `/update/`, batches to
/// `/updates/`. Bodies are signed per metric and optionally sealed with the
/// collector's public key.
pub struct HttpSender {
    client: reqwest::Client,
    address: String,
    key: Option<String>,
    encryptor: Option<Encryptor>,
    source_ip: Option<String>,
}

impl HttpSender {
    pub fn new(cfg: &AgentConfig, source_ip: Option<String>) -> Result<Self> {
        let encryptor = match &cfg.crypto_key {
            Some(path) => Some(
                Encryptor::from_pem_file(path)
                    .with_context(|| format!("cannot load public key '{}'", path.display()))?,
            ),
            None => None,
        };
        // Bound every push at half the report interval so a stuck collector
        // cannot make one cycle bleed into the next.
        let client = reqwest::Client::builder()
            .timeout(cfg.report_interval / 2)
            .build()
            .context("cannot build HTTP client")?;
        Ok(Self {
            client,
            address: cfg.address.clone(),
            key: cfg.key.clone(),
            encryptor,
            source_ip,
        })
    }

    fn seal(&self, body: Vec<u8>) -> Result<Vec<u8>> {
        match &self.encryptor {
            Some(enc) => Ok(enc.encrypt(&body)?),
            None => Ok(body),
        }
    }

    async fn post(&self, path: &str, body: Vec<u8>) -> Result<()> {
        let url = format!("http://{}{}", self.address, path);
        let mut req = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(ip) = &self.source_ip {
            req = req.header("X-Real-Ip", ip.clone());
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            bail!("non-OK HTTP status: {}", resp.status());
        }
        Ok(())
    }

    fn signed(&self, m: &Metric) -> Metric {
        match &self.key {
            Some(key) => sign::signed(m, key),
            None => m.clone(),
        }
    }
}

#[async_trait]
impl MetricSender for HttpSender {
    async fn send_one(&self, metric: &Metric) -> Result<()> {
        let body = serde_json::to_vec(&self.signed(metric))?;
        self.post("/update/", self.seal(body)?).await
    }

    async fn send_batch(&self, metrics: &[Metric]) -> Result<()> {
        let list: Vec<Metric> = metrics.iter().map(|m| self.signed(m)).collect();
        let body = serde_json::to_vec(&list)?;
        self.post("/updates/", self.seal(body)?).await
    }
}
