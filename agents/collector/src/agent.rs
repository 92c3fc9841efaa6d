use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{bail, Result, WrapErr};
use tokio::task::JoinHandle;
use tracing::instrument::Instrumented;

use collector_base::{
    run_all, spawn_signal_waiter, AgentCore, BaseAgent, CoreMetrics, Shutdown,
};
use collector_core::codec::envelope::EncryptKey;

use crate::monitor::Monitor;
use crate::sampler::Sampler;
use crate::settings::CollectorSettings;
use crate::shipper::{RetryPolicy, Shipper};
use crate::sink::{GrpcSink, HttpSink, MetricSink};

/// The sampling/shipping agent.
pub struct Collector {
    core: AgentCore,
    monitor: Arc<Monitor>,
    poll_interval: Duration,
    report_interval: Duration,
    rate_limit: usize,
    sink: Arc<dyn MetricSink>,
    hmac_key: Option<String>,
    encrypt_key: Option<EncryptKey>,
}

impl Debug for Collector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("settings", &self.core.settings)
            .field("poll_interval", &self.poll_interval)
            .field("report_interval", &self.report_interval)
            .field("rate_limit", &self.rate_limit)
            .finish_non_exhaustive()
    }
}

impl AsRef<AgentCore> for Collector {
    fn as_ref(&self) -> &AgentCore {
        &self.core
    }
}

#[async_trait]
impl BaseAgent for Collector {
    const AGENT_NAME: &'static str = "collector";

    type Settings = CollectorSettings;

    async fn from_settings(settings: Self::Settings, metrics: Arc<CoreMetrics>) -> Result<Self>
    where
        Self: Sized,
    {
        settings.validate_address()?;

        let poll_interval = interval_secs(&settings.poll_interval, 2).context("pollInterval")?;
        let report_interval =
            interval_secs(&settings.report_interval, 10).context("reportInterval")?;
        let rate_limit = settings
            .rate_limit
            .as_ref()
            .map(|v| v.parse::<usize>())
            .transpose()
            .context("rateLimit")?
            .unwrap_or(3);

        let sink: Arc<dyn MetricSink> =
            match settings.transport.as_deref().unwrap_or("http") {
                "http" => Arc::new(HttpSink::new(&settings.address)?),
                "grpc" => Arc::new(GrpcSink::new(&settings.address)),
                other => bail!("unknown transport {other:?}"),
            };

        let encrypt_key = settings
            .crypto_key_path()
            .map(EncryptKey::from_pem_file)
            .transpose()?;
        let hmac_key = settings.hmac_key().map(str::to_owned);

        Ok(Self {
            monitor: Monitor::new(),
            poll_interval,
            report_interval,
            rate_limit,
            sink,
            hmac_key,
            encrypt_key,
            core: AgentCore {
                metrics,
                settings: settings.base.clone(),
            },
        })
    }

    #[allow(clippy::async_yields_async)]
    async fn run(self) -> Instrumented<JoinHandle<Result<()>>> {
        let shutdown = Shutdown::new();

        let sampler = Sampler::new(self.monitor.clone(), self.poll_interval, self.rate_limit);
        let shipper = Shipper::new(
            self.monitor.clone(),
            self.sink.clone(),
            self.hmac_key.clone(),
            self.encrypt_key.clone(),
            self.report_interval,
            RetryPolicy::default(),
            self.core.metrics.clone(),
        );

        run_all(vec![
            spawn_signal_waiter(shutdown.clone()),
            sampler.spawn(shutdown.listener()),
            shipper.spawn(shutdown.listener()),
        ])
    }
}

fn interval_secs(
    value: &Option<collector_base::settings::StrOrInt>,
    default: u64,
) -> Result<Duration> {
    let secs = value
        .as_ref()
        .map(|v| v.parse::<u64>())
        .transpose()?
        .unwrap_or(default);
    if secs == 0 {
        bail!("interval must be positive");
    }
    Ok(Duration::from_secs(secs))
}
