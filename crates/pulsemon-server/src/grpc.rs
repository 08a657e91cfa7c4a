//! RPC transport: the `MetricsAgent` service with the same admission and
//! table semantics as the HTTP handlers.

use crate::service::MetricService;
use crate::subnet::TrustedSubnet;
use pulsemon_common::convert;
use pulsemon_common::proto::metrics_agent_server::MetricsAgent;
use pulsemon_common::proto::{
    CheckStorageStatusRequest, CheckStorageStatusResponse, GetAllMetricsRequest,
    GetAllMetricsResponse, GetMetricRequest, GetMetricResponse, UpdateMetricRequest,
    UpdateMetricResponse, UpdateMetricsRequest, UpdateMetricsResponse,
};
use pulsemon_common::types::Metric;
use std::net::IpAddr;
use tonic::{Request, Response, Status};

pub struct MetricsAgentService {
    service: MetricService,
    trusted: Option<TrustedSubnet>,
}

impl MetricsAgentService {
    pub fn new(service: MetricService, trusted: Option<TrustedSubnet>) -> Self {
        Self { service, trusted }
    }

    /// Admission for every RPC: a `request-id` must be present, and when a
    /// trusted subnet is configured the caller's declared `x-real-ip` must
    /// fall inside it.
    fn admit<T>(&self, request: &Request<T>) -> Result<(), Status> {
        let metadata = request.metadata();
        let request_id = metadata
            .get("request-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Status::not_found("Request-ID is not found in metadata"))?;

        if let Some(subnet) = self.trusted {
            let ip = metadata
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<IpAddr>().ok())
                .ok_or_else(|| {
                    Status::permission_denied(format!(
                        "X-Real-Ip is missing or invalid. Request-ID: {request_id}"
                    ))
                })?;
            if !subnet.contains(ip) {
                return Err(Status::permission_denied(format!(
                    "X-Real-Ip is not trusted, aborting request. Request-ID: {request_id}"
                )));
            }
        }
        Ok(())
    }

    /// Converts and verifies one wire metric on the mutating path.
    fn admit_metric(&self, pm: &pulsemon_common::proto::Metric) -> Result<Metric, Status> {
        let m = convert::from_wire(pm).map_err(|e| Status::invalid_argument(e.to_string()))?;
        self.service
            .verify(&m)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        Ok(m)
    }
}

#[tonic::async_trait]
impl MetricsAgent for MetricsAgentService {
    async fn update_metric(
        &self,
        request: Request<UpdateMetricRequest>,
    ) -> Result<Response<UpdateMetricResponse>, Status> {
        self.admit(&request)?;
        let pm = request
            .into_inner()
            .metric
            .ok_or_else(|| Status::invalid_argument("metric is required"))?;
        let m = self.admit_metric(&pm)?;
        self.service.update_one(m);
        Ok(Response::new(UpdateMetricResponse {
            error: String::new(),
        }))
    }

    async fn update_metrics(
        &self,
        request: Request<UpdateMetricsRequest>,
    ) -> Result<Response<UpdateMetricsResponse>, Status> {
        self.admit(&request)?;
        let mut list = Vec::new();
        for pm in &request.into_inner().metrics {
            list.push(self.admit_metric(pm)?);
        }
        self.service.update_many(list);
        Ok(Response::new(UpdateMetricsResponse {
            error: String::new(),
        }))
    }

    async fn get_metric(
        &self,
        request: Request<GetMetricRequest>,
    ) -> Result<Response<GetMetricResponse>, Status> {
        self.admit(&request)?;
        let id = request.into_inner().id;
        match self.service.get(&id) {
            // The service already attached a fresh tag, so no key is passed.
            Some(m) => Ok(Response::new(GetMetricResponse {
                metric: Some(convert::to_wire(&m, None)),
                error: String::new(),
            })),
            None => Err(Status::not_found(format!("metric '{id}' not found"))),
        }
    }

    async fn get_all_metrics(
        &self,
        request: Request<GetAllMetricsRequest>,
    ) -> Result<Response<GetAllMetricsResponse>, Status> {
        self.admit(&request)?;
        let metrics = self
            .service
            .list()
            .iter()
            .map(|m| convert::to_wire(m, None))
            .collect();
        Ok(Response::new(GetAllMetricsResponse { metrics }))
    }

    async fn check_storage_status(
        &self,
        request: Request<CheckStorageStatusRequest>,
    ) -> Result<Response<CheckStorageStatusResponse>, Status> {
        self.admit(&request)?;
        match self.service.health() {
            Ok(()) => Ok(Response::new(CheckStorageStatusResponse {
                error: String::new(),
            })),
            Err(e) => Err(Status::internal(e.to_string())),
        }
    }
}
