//! Configuration for the collector agent.

use collector_base::decl_settings;
use collector_base::settings::StrOrInt;

decl_settings!(Collector {
    /// Seconds between samples.
    poll_interval: Option<StrOrInt>,
    /// Seconds between batch ships.
    report_interval: Option<StrOrInt>,
    /// Width of the sampling job queue and worker pool.
    rate_limit: Option<StrOrInt>,
    /// `http` (default) or `grpc`.
    transport: Option<String>,
});
