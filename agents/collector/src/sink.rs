use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::debug;

use collector_core::codec::gzip;
use collector_core::codec::signing::TAG_HEADER;
use collector_core::proto::transport::micro_service_client::MicroServiceClient;
use collector_core::proto::transport::SenderRequest;
use collector_core::CodecError;

/// Per-attempt transport deadline.
const SEND_TIMEOUT: Duration = Duration::from_secs(60);

/// A fully wrapped batch ready for the wire.
#[derive(Clone, Debug)]
pub struct Payload {
    /// Compressed (and possibly enveloped) body bytes.
    pub body: Vec<u8>,
    /// Hex HMAC tag over the plain JSON, when signing is configured.
    pub tag: Option<String>,
}

/// A failed send attempt; every variant is retriable.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The HTTP client failed (connect, timeout, body).
    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with a non-OK status.
    #[error("server answered {0}")]
    Status(StatusCode),
    /// The gRPC channel could not be established.
    #[error("grpc connect: {0}")]
    GrpcConnect(#[from] tonic::transport::Error),
    /// The gRPC call was rejected.
    #[error("grpc status: {0}")]
    Grpc(#[from] tonic::Status),
    /// Metadata (the tag or the real IP) was not valid ASCII.
    #[error("invalid metadata: {0}")]
    Metadata(#[from] tonic::metadata::errors::InvalidMetadataValue),
    /// The response body did not decode.
    #[error("undecodable response: {0}")]
    Response(#[from] CodecError),
}

/// Where the shipper delivers a wrapped batch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricSink: Send + Sync {
    /// Transport label for logs and self-telemetry.
    fn transport(&self) -> &'static str;

    /// Deliver one payload. Any error counts as a failed attempt.
    async fn send(&self, payload: Payload) -> Result<(), SinkError>;
}

/// `POST /updates/` over HTTP.
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
    real_ip: Option<IpAddr>,
}

impl HttpSink {
    /// Build a sink shipping to `http://{address}/updates/`.
    pub fn new(address: &str) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?;
        // First non-loopback local address, advertised for the server's
        // allow-list check.
        let real_ip = local_ip_address::local_ip().ok();
        Ok(Self {
            client,
            url: format!("http://{address}/updates/"),
            real_ip,
        })
    }
}

#[async_trait]
impl MetricSink for HttpSink {
    fn transport(&self) -> &'static str {
        "http"
    }

    async fn send(&self, payload: Payload) -> Result<(), SinkError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .header(ACCEPT_ENCODING, "gzip")
            .body(payload.body);
        if let Some(tag) = &payload.tag {
            request = request.header(TAG_HEADER, tag);
        }
        if let Some(ip) = self.real_ip {
            request = request.header("X-Real-IP", ip.to_string());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status));
        }

        let compressed = response
            .headers()
            .get(CONTENT_ENCODING)
            .map(|v| v.as_bytes() == b"gzip")
            .unwrap_or(false);
        let body = response.bytes().await?;
        if compressed {
            // An OK status with a body we cannot read still fails the attempt.
            let plain = gzip::decompress(&body)?;
            debug!(bytes = plain.len(), "Server state received");
        }
        Ok(())
    }
}

/// The `MicroService/Sender` unary call, with metadata mirroring the HTTP
/// headers.
pub struct GrpcSink {
    endpoint: String,
    real_ip: Option<IpAddr>,
}

impl GrpcSink {
    /// Build a sink calling `http://{address}`.
    pub fn new(address: &str) -> Self {
        Self {
            endpoint: format!("http://{address}"),
            real_ip: local_ip_address::local_ip().ok(),
        }
    }
}

#[async_trait]
impl MetricSink for GrpcSink {
    fn transport(&self) -> &'static str {
        "grpc"
    }

    async fn send(&self, payload: Payload) -> Result<(), SinkError> {
        let channel = tonic::transport::Endpoint::from_shared(self.endpoint.clone())?
            .timeout(SEND_TIMEOUT)
            .connect()
            .await?;
        let mut client = MicroServiceClient::new(channel);

        let mut request = tonic::Request::new(SenderRequest {
            metrics: payload.body,
        });
        // `content-type` is owned by the gRPC framing and must not be
        // shadowed by metadata; the body is always the compressed JSON.
        let metadata = request.metadata_mut();
        metadata.insert("content-encoding", "gzip".parse()?);
        metadata.insert("accept-encoding", "gzip".parse()?);
        if let Some(tag) = &payload.tag {
            metadata.insert("hashsha256", tag.parse()?);
        }
        if let Some(ip) = self.real_ip {
            metadata.insert("x-real-ip", ip.to_string().parse()?);
        }

        let response = client.sender(request).await?.into_inner();
        debug!(bytes = response.metrics.len(), "Server state received");
        Ok(())
    }
}
