//! gRPC transport calling `collector.Storage/UpdateMany`.

use super::Transport;
use crate::core::config::REAL_IP_METADATA;
use crate::core::{AgentConfig, CollectorError, Metric, Result};
use crate::proto::storage_client::StorageClient;
use crate::proto::{MetricDescr, UpdateManyRequest};
use std::net::IpAddr;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};

pub struct GrpcTransport {
    channel: Channel,
    real_ip: MetadataValue<tonic::metadata::Ascii>,
}

impl GrpcTransport {
    /// Build a lazily connected channel; nothing is dialed until the first
    /// send.
    pub fn new(config: &AgentConfig, real_ip: IpAddr) -> Result<Self> {
        let address = config.server_address.trim_end_matches('/');
        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };

        let channel = Endpoint::from_shared(uri)
            .map_err(|e| CollectorError::ClientUnavailable(e.to_string()))?
            .connect_timeout(config.timeout)
            .connect_lazy();

        let real_ip = real_ip
            .to_string()
            .parse()
            .map_err(|_| CollectorError::protocol("invalid X-Real-IP metadata"))?;

        Ok(Self { channel, real_ip })
    }
}

#[async_trait::async_trait]
impl Transport for GrpcTransport {
    async fn send(&self, batch: &[Metric]) -> Result<()> {
        let mut client = StorageClient::new(self.channel.clone());

        let mut request = tonic::Request::new(UpdateManyRequest {
            metrics: batch.iter().map(MetricDescr::from).collect(),
        });
        request
            .metadata_mut()
            .insert(REAL_IP_METADATA, self.real_ip.clone());

        client.update_many(request).await?;
        Ok(())
    }
}
