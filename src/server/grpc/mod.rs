//! gRPC transport for the `collector.Storage` service.

use crate::core::{CollectorError, Metric, Result};
use crate::proto::storage_server::{Storage, StorageServer};
use crate::proto::{
    decode_kind, AllMetricsResponse, Empty, MetricDescr, MetricRequest, MetricResponse,
    UpdateManyRequest, UpdateRequest,
};
use crate::server::RequestId;
use crate::storage::MetricsStorage;
use futures::stream;
use ipnet::IpNet;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::service::interceptor::InterceptedService;
use tonic::{Request, Response, Status};

pub mod interceptors;

pub use interceptors::Interceptors;

/// Storage service backed by [`MetricsStorage`].
pub struct StorageService {
    storage: MetricsStorage,
}

impl StorageService {
    pub fn new(storage: MetricsStorage) -> Self {
        Self { storage }
    }

    /// Wrap the service with the interceptor chain.
    pub fn into_server(
        self,
        trusted_subnet: Option<IpNet>,
    ) -> InterceptedService<StorageServer<Self>, Interceptors> {
        StorageServer::with_interceptor(self, Interceptors::new(trusted_subnet))
    }
}

fn request_id<T>(request: &Request<T>) -> RequestId {
    request
        .extensions()
        .get::<RequestId>()
        .copied()
        .unwrap_or_default()
}

fn to_status(id: RequestId, err: CollectorError) -> Status {
    if err.is_validation() {
        tracing::debug!("[{}] {}", id, err);
        Status::invalid_argument(err.to_string())
    } else {
        tracing::error!("[{}] something went wrong: {}", id, err);
        Status::internal(err.to_string())
    }
}

fn respond<T>(
    id: RequestId,
    method: &str,
    result: std::result::Result<T, Status>,
) -> std::result::Result<Response<T>, Status> {
    match &result {
        Ok(_) => tracing::info!("[{}] {} response status: {:?}", id, method, tonic::Code::Ok),
        Err(status) => tracing::info!("[{}] {} response status: {:?}", id, method, status.code()),
    }
    result.map(Response::new)
}

#[tonic::async_trait]
impl Storage for StorageService {
    async fn update(
        &self,
        request: Request<UpdateRequest>,
    ) -> std::result::Result<Response<Empty>, Status> {
        let id = request_id(&request);
        let result: std::result::Result<Empty, Status> = async {
            let descr = request
                .into_inner()
                .metric
                .ok_or_else(|| Status::invalid_argument("metric is required"))?;
            let mut metric = Metric::try_from(descr).map_err(|e| to_status(id, e))?;
            self.storage
                .update(&mut metric)
                .await
                .map_err(|e| to_status(id, e))?;
            Ok(Empty {})
        }
        .await;
        respond(id, "Update", result)
    }

    async fn update_many(
        &self,
        request: Request<UpdateManyRequest>,
    ) -> std::result::Result<Response<Empty>, Status> {
        let id = request_id(&request);
        let result: std::result::Result<Empty, Status> = async {
            let metrics = request
                .into_inner()
                .metrics
                .into_iter()
                .map(Metric::try_from)
                .collect::<Result<Vec<_>>>()
                .map_err(|e| to_status(id, e))?;
            self.storage
                .update_many(&metrics)
                .await
                .map_err(|e| to_status(id, e))?;
            Ok(Empty {})
        }
        .await;
        respond(id, "UpdateMany", result)
    }

    async fn metric(
        &self,
        request: Request<MetricRequest>,
    ) -> std::result::Result<Response<MetricResponse>, Status> {
        let id = request_id(&request);
        let result: std::result::Result<MetricResponse, Status> = async {
            let MetricRequest { id: name, r#type } = request.into_inner();
            let kind = decode_kind(r#type).map_err(|e| to_status(id, e))?;
            let metric = self
                .storage
                .get_value(kind.as_str(), &name)
                .await
                .map_err(|e| to_status(id, e))?
                .ok_or_else(|| Status::not_found("metric not found"))?;
            Ok(MetricResponse {
                metric: Some(MetricDescr::from(&metric)),
            })
        }
        .await;
        respond(id, "Metric", result)
    }

    async fn all_metrics(
        &self,
        request: Request<Empty>,
    ) -> std::result::Result<Response<AllMetricsResponse>, Status> {
        let id = request_id(&request);
        let result: std::result::Result<AllMetricsResponse, Status> = async {
            let metrics = self.storage.get_all().await.map_err(|e| to_status(id, e))?;
            Ok(AllMetricsResponse {
                metrics: metrics.iter().map(MetricDescr::from).collect(),
            })
        }
        .await;
        respond(id, "AllMetrics", result)
    }
}

/// Serve the service on `listener` until `token` is cancelled.
pub async fn serve(
    listener: TcpListener,
    service: StorageService,
    trusted_subnet: Option<IpNet>,
    token: CancellationToken,
) -> Result<()> {
    let incoming = Box::pin(stream::unfold(listener, |listener| async move {
        let accepted = listener.accept().await.map(|(socket, _)| socket);
        Some((accepted, listener))
    }));

    tonic::transport::Server::builder()
        .add_service(service.into_server(trusted_subnet))
        .serve_with_incoming_shutdown(incoming, async move { token.cancelled().await })
        .await
        .map_err(|e| CollectorError::protocol(format!("gRPC server error: {}", e)))?;

    tracing::info!("gRPC server stopped gracefully");
    Ok(())
}
