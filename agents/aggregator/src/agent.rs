use std::fmt::{Debug, Formatter};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{eyre, Context, Result};
use ipnetwork::IpNetwork;
use tokio::task::JoinHandle;
use tracing::{info, info_span, instrument::Instrumented, warn, Instrument};

use collector_base::storage::{MemoryStore, MetricStore, SqlStore};
use collector_base::{
    run_all, spawn_signal_waiter, spawn_snapshot_loop, AgentCore, BaseAgent, CoreMetrics,
    MetricService, Shutdown, ShutdownListener, DEFAULT_STORE_DEADLINE_SECS,
};
use collector_core::codec::envelope::DecryptKey;
use collector_core::proto::transport::micro_service_server::MicroServiceServer;

use crate::grpc::BatchExchange;
use crate::http::{router, AppState};
use crate::settings::AggregatorSettings;

const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// The receiving/storing server.
pub struct Aggregator {
    core: AgentCore,
    service: Arc<MetricService>,
    decrypt_key: Option<Arc<DecryptKey>>,
    trusted_subnet: Option<IpNetwork>,
    store_file: PathBuf,
    store_interval: Option<Duration>,
    restore: bool,
    http_addr: SocketAddr,
    grpc_addr: Option<SocketAddr>,
}

impl Debug for Aggregator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("settings", &self.core.settings)
            .field("store_file", &self.store_file)
            .field("store_interval", &self.store_interval)
            .field("restore", &self.restore)
            .field("http_addr", &self.http_addr)
            .field("grpc_addr", &self.grpc_addr)
            .finish_non_exhaustive()
    }
}

impl AsRef<AgentCore> for Aggregator {
    fn as_ref(&self) -> &AgentCore {
        &self.core
    }
}

#[async_trait]
impl BaseAgent for Aggregator {
    const AGENT_NAME: &'static str = "aggregator";

    type Settings = AggregatorSettings;

    async fn from_settings(settings: Self::Settings, metrics: Arc<CoreMetrics>) -> Result<Self>
    where
        Self: Sized,
    {
        settings.validate_address()?;
        let http_addr = resolve_addr(&settings.address)?;
        let grpc_addr = settings
            .grpc_address
            .as_deref()
            .filter(|a| !a.is_empty())
            .map(resolve_addr)
            .transpose()?;

        let store: Arc<dyn MetricStore> = match settings
            .database_dsn
            .as_deref()
            .filter(|dsn| !dsn.is_empty())
        {
            Some(dsn) => {
                info!("Using the relational repository");
                Arc::new(SqlStore::connect(dsn).await?)
            }
            None => {
                info!("Using the in-memory repository");
                Arc::new(MemoryStore::new())
            }
        };
        let service = Arc::new(MetricService::new(
            store,
            Duration::from_secs(DEFAULT_STORE_DEADLINE_SECS),
        ));

        let decrypt_key = settings
            .crypto_key_path()
            .map(DecryptKey::from_pem_file)
            .transpose()?
            .map(Arc::new);
        let trusted_subnet = settings
            .trusted_subnet
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<IpNetwork>())
            .transpose()
            .context("trustedSubnet")?;

        let store_interval = match settings
            .store_interval
            .as_ref()
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("storeInterval")?
            .unwrap_or(300)
        {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let store_file = PathBuf::from(
            settings
                .store_file
                .clone()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| "metrics.json".to_owned()),
        );
        let restore = settings
            .restore
            .as_ref()
            .map(|v| v.parse())
            .transpose()
            .context("restore")?
            .unwrap_or(true);

        Ok(Self {
            service,
            decrypt_key,
            trusted_subnet,
            store_file,
            store_interval,
            restore,
            http_addr,
            grpc_addr,
            core: AgentCore {
                metrics,
                settings: settings.base.clone(),
            },
        })
    }

    #[allow(clippy::async_yields_async)]
    async fn run(self) -> Instrumented<JoinHandle<Result<()>>> {
        let shutdown = Shutdown::new();

        if self.restore {
            if let Err(err) = self.service.restore_from(&self.store_file).await {
                warn!(?err, "Error reading metrics from snapshot");
            }
        }

        let state = AppState {
            service: self.service.clone(),
            hmac_key: self.core.settings.hmac_key().map(str::to_owned),
            decrypt_key: self.decrypt_key.clone(),
            trusted_subnet: self.trusted_subnet,
            metrics: self.core.metrics.clone(),
        };

        let mut tasks = vec![
            spawn_signal_waiter(shutdown.clone()),
            spawn_http_server(self.http_addr, state.clone(), shutdown.listener()),
            spawn_snapshot_loop(
                self.service.clone(),
                self.store_file.clone(),
                self.store_interval,
                shutdown.listener(),
            ),
        ];
        if let Some(addr) = self.grpc_addr {
            tasks.push(spawn_grpc_server(addr, state, shutdown.listener()));
        }

        run_all(tasks)
    }
}

fn resolve_addr(address: &str) -> Result<SocketAddr> {
    address
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve {address:?}"))?
        .next()
        .ok_or_else(|| eyre!("{address:?} resolves to no address"))
}

fn spawn_http_server(
    addr: SocketAddr,
    state: AppState,
    mut shutdown: ShutdownListener,
) -> Instrumented<JoinHandle<Result<()>>> {
    let span = info_span!("http_server", %addr);
    tokio::spawn(async move {
        info!(%addr, "Starting HTTP server");
        axum::Server::bind(&addr)
            .http1_header_read_timeout(HEADER_READ_TIMEOUT)
            .serve(router(state).into_make_service())
            .with_graceful_shutdown(async move { shutdown.recv().await })
            .await?;
        info!("HTTP server stopped");
        Ok(())
    })
    .instrument(span)
}

fn spawn_grpc_server(
    addr: SocketAddr,
    state: AppState,
    mut shutdown: ShutdownListener,
) -> Instrumented<JoinHandle<Result<()>>> {
    let span = info_span!("grpc_server", %addr);
    tokio::spawn(async move {
        info!(%addr, "Starting gRPC server");
        tonic::transport::Server::builder()
            .add_service(MicroServiceServer::new(BatchExchange::new(state)))
            .serve_with_shutdown(addr, async move { shutdown.recv().await })
            .await?;
        info!("gRPC server stopped");
        Ok(())
    })
    .instrument(span)
}
