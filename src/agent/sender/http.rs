//! JSON over HTTP transport.
//!
//! A batch is serialized as a JSON array, optionally encrypted with the
//! collector's public key, signed over the resulting bytes and finally
//! gzip compressed before being posted to `/updates/`.

use super::Transport;
use crate::core::config::REAL_IP_HEADER;
use crate::core::crypto::{self, HASH_HEADER};
use crate::core::{AgentConfig, CollectorError, Metric, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use rsa::RsaPublicKey;
use std::io::Write;
use std::net::IpAddr;

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    key: Option<Vec<u8>>,
    public_key: Option<RsaPublicKey>,
    real_ip: IpAddr,
}

impl HttpTransport {
    pub fn new(config: &AgentConfig, real_ip: IpAddr) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| CollectorError::ClientUnavailable(e.to_string()))?;

        let public_key = config
            .public_key_path
            .as_deref()
            .map(crypto::load_public_key)
            .transpose()?;

        Ok(Self {
            client,
            url: updates_url(&config.server_address),
            key: config.key_bytes().map(<[u8]>::to_vec),
            public_key,
            real_ip,
        })
    }

    /// Encode a batch into the request body and its optional signature.
    pub fn encode(&self, batch: &[Metric]) -> Result<(Vec<u8>, Option<String>)> {
        let mut body = serde_json::to_vec(batch)?;
        if let Some(public_key) = &self.public_key {
            body = crypto::encrypt(public_key, &body)?;
        }

        let signature = self
            .key
            .as_deref()
            .map(|key| crypto::sign(key, &body))
            .transpose()?;

        Ok((gzip(&body)?, signature))
    }
}

fn updates_url(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        format!("{address}/updates/")
    } else {
        format!("http://{address}/updates/")
    }
}

pub(crate) fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &[Metric]) -> Result<()> {
        let (body, signature) = self.encode(batch)?;

        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .header(REAL_IP_HEADER, self.real_ip.to_string());
        if let Some(signature) = signature {
            request = request.header(HASH_HEADER, signature);
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        // Drain the body so the connection can be reused.
        response.bytes().await?;

        if status != StatusCode::OK {
            return Err(CollectorError::UnexpectedStatus(status.to_string()));
        }
        Ok(())
    }
}
