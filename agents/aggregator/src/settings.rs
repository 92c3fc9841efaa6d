//! Configuration for the aggregator server.

use collector_base::decl_settings;
use collector_base::settings::{StrOrBool, StrOrInt};

decl_settings!(Aggregator {
    /// Postgres DSN; empty selects the in-memory repository.
    database_dsn: Option<String>,
    /// Snapshot file path.
    store_file: Option<String>,
    /// Seconds between snapshots; zero means once at startup.
    store_interval: Option<StrOrInt>,
    /// Whether to restore the snapshot at startup.
    restore: Option<StrOrBool>,
    /// CIDR allow-list applied to `X-Real-IP`.
    trusted_subnet: Option<String>,
    /// `host:port` for the gRPC listener; unset disables it.
    grpc_address: Option<String>,
});
