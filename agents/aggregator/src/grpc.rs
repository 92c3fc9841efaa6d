//! The gRPC ingest path: one unary call carrying the same wrapped JSON
//! bytes as the HTTP batch endpoint, with metadata standing in for the
//! headers.

use std::net::IpAddr;

use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use collector_core::codec::{gzip, signing};
use collector_core::proto::transport::micro_service_server::MicroService;
use collector_core::proto::transport::{SenderRequest, SenderResponse};

use crate::http::AppState;
use crate::ingest::parse_batch;

/// `transport.MicroService` backed by the same state as the HTTP router.
#[derive(Clone)]
pub struct BatchExchange {
    state: AppState,
}

impl BatchExchange {
    /// New service over the shared state.
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl MicroService for BatchExchange {
    async fn sender(
        &self,
        request: Request<SenderRequest>,
    ) -> Result<Response<SenderResponse>, Status> {
        let metadata = request.metadata();
        let tag = metadata
            .get("hashsha256")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let gzipped = metadata
            .get("content-encoding")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("gzip"))
            .unwrap_or(false);
        let real_ip = metadata
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<IpAddr>().ok());

        if let Some(subnet) = self.state.trusted_subnet {
            if let Some(ip) = real_ip {
                if !subnet.contains(ip) {
                    warn!(%ip, %subnet, "Rejecting sender outside trusted subnet");
                    return Err(Status::permission_denied("sender not allowed"));
                }
            }
        }

        let body = request.into_inner().metrics;
        let body = match &self.state.decrypt_key {
            // An unreadable envelope passes through, same as the HTTP path.
            Some(key) => key.decrypt(&body).unwrap_or(body),
            None => body,
        };
        let plain = if gzipped {
            gzip::decompress(&body)
                .map_err(|_| Status::invalid_argument("body is not valid gzip"))?
        } else {
            body
        };

        if let (Some(key), Some(tag)) = (self.state.hmac_key.as_deref(), tag.as_deref()) {
            signing::verify(&plain, tag, key)
                .map_err(|_| Status::invalid_argument("signature does not match"))?;
        }

        let parsed = parse_batch(&plain)
            .map_err(|_| Status::invalid_argument("body is not a metric batch"))?;
        if parsed.dropped > 0 {
            debug!(dropped = parsed.dropped, "Dropped invalid batch entries");
        }
        self.state
            .service
            .apply_batch(&parsed.accepted, false)
            .await
            .map_err(|err| Status::internal(err.to_string()))?;

        let dump = self
            .state
            .service
            .all_metrics()
            .await
            .map_err(|err| Status::internal(err.to_string()))?;
        let metrics = serde_json::to_vec(&dump)
            .map_err(|err| Status::internal(err.to_string()))?;
        Ok(Response::new(SenderResponse { metrics }))
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::time::Duration;

    use prometheus::Registry;

    use collector_base::storage::MemoryStore;
    use collector_base::{CoreMetrics, MetricService};
    use collector_core::Metric;

    use super::*;

    fn state() -> AppState {
        AppState {
            service: Arc::new(MetricService::new(
                Arc::new(MemoryStore::new()),
                Duration::from_secs(10),
            )),
            hmac_key: Some("defaultKey".to_owned()),
            decrypt_key: None,
            trusted_subnet: None,
            metrics: Arc::new(CoreMetrics::new("test", None, Registry::new()).unwrap()),
        }
    }

    fn wrapped(batch: &[Metric], key: Option<&str>) -> (Vec<u8>, Option<String>) {
        let plain = serde_json::to_vec(batch).unwrap();
        let tag = key.map(|k| signing::sign(&plain, k));
        (gzip::compress(&plain).unwrap(), tag)
    }

    fn request(body: Vec<u8>, tag: Option<String>) -> Request<SenderRequest> {
        let mut request = Request::new(SenderRequest { metrics: body });
        let md = request.metadata_mut();
        md.insert("content-encoding", "gzip".parse().unwrap());
        if let Some(tag) = tag {
            md.insert("hashsha256", tag.parse().unwrap());
        }
        request
    }

    #[tokio::test]
    async fn signed_batch_commits_and_dump_comes_back() {
        let state = state();
        let exchange = BatchExchange::new(state.clone());

        let (body, tag) = wrapped(&[Metric::counter("PollCount", 3)], Some("defaultKey"));
        let response = exchange.sender(request(body, tag)).await.unwrap();
        assert_eq!(state.service.counter("PollCount").await.unwrap(), 3);

        let dump: Vec<Metric> =
            serde_json::from_slice(&response.into_inner().metrics).unwrap();
        assert!(dump.iter().any(|m| m.name == "PollCount"));
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let exchange = BatchExchange::new(state());
        let (body, tag) = wrapped(&[Metric::gauge("Alloc", 1.5)], Some("defaultKey"));
        let mut tag = tag.unwrap().into_bytes();
        tag[0] = if tag[0] == b'0' { b'1' } else { b'0' };
        let status = exchange
            .sender(request(body, Some(String::from_utf8(tag).unwrap())))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn missing_tag_downgrades_to_unsigned() {
        let state = state();
        let exchange = BatchExchange::new(state.clone());
        let (body, _) = wrapped(&[Metric::gauge("Alloc", 1.5)], None);
        exchange.sender(request(body, None)).await.unwrap();
        assert_eq!(state.service.gauge("Alloc").await.unwrap(), 1.5);
    }
}
