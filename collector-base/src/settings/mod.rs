//! Common settings and configuration for the pipeline agents.
//!
//! Both agents share the [`Settings`] struct in this crate and define any
//! additional fields in their own crate. By convention this is done in
//! `settings.rs` using the [`decl_settings!`](crate::decl_settings) macro.
//!
//! ### Configuration value precedence
//!
//! Key/value pairs are loaded in the following order, with later sources
//! taking precedence:
//!
//! 1. Builder defaults.
//! 2. The JSON config file named by the `-config` flag or the
//!    `CONFIG`/`CONFIG_AGENT`/`CONFIG_SERVER` env vars.
//! 3. Command-line flags (`-a localhost:8080`, `--keySha=secret`, …); the
//!    short flags of each binary map onto config keys through a per-agent
//!    alias table.
//! 4. Environment variables (`ADDRESS`, `POLL_INTERVAL`, …), likewise
//!    aliased; empty values are treated as unset.

use std::str::FromStr;
use std::sync::Arc;

use eyre::{bail, Context, Result};
use serde::Deserialize;

use crate::CoreMetrics;

pub mod loader;

mod trace;
pub use trace::*;

/// Settings shared by the collector agent and the aggregator server.
///
/// Used as a base config: agent-specific settings structs flatten this one
/// via [`decl_settings!`](crate::decl_settings) and deref to it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// `host:port` the server listens on and the agent ships to.
    #[serde(default = "default_address")]
    pub address: String,
    /// Shared HMAC key. Signing and verification are skipped when unset or
    /// empty.
    #[serde(default)]
    pub key_sha: Option<String>,
    /// PEM key path for envelope encryption: the public half on the agent,
    /// the private half on the server.
    #[serde(default)]
    pub crypto_key: Option<String>,
    /// Port serving the process self-telemetry report; disabled when unset.
    #[serde(default)]
    pub metrics_port: Option<StrOrInt>,
    /// The tracing configuration
    #[serde(default)]
    pub tracing: TracingConfig,
}

fn default_address() -> String {
    "localhost:8080".to_owned()
}

impl Settings {
    /// The HMAC key, with the empty string normalized away.
    pub fn hmac_key(&self) -> Option<&str> {
        self.key_sha.as_deref().filter(|k| !k.is_empty())
    }

    /// The envelope key path, with the empty string normalized away.
    pub fn crypto_key_path(&self) -> Option<&str> {
        self.crypto_key.as_deref().filter(|p| !p.is_empty())
    }

    /// Build the self-telemetry registry for this agent.
    pub fn telemetry(&self, agent_name: &str) -> Result<Arc<CoreMetrics>> {
        let port = self
            .metrics_port
            .as_ref()
            .map(|p| p.parse::<u16>())
            .transpose()
            .context("invalid metricsPort")?;
        let metrics = CoreMetrics::new(agent_name, port, prometheus::Registry::new())?;
        Ok(Arc::new(metrics))
    }

    /// Validate that `address` looks like `host:port`.
    pub fn validate_address(&self) -> Result<()> {
        let valid = self
            .address
            .rsplit_once(':')
            .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
            .unwrap_or(false);
        if !valid {
            bail!("addr {:?} is not valid", self.address);
        }
        Ok(())
    }
}

/// A value that may show up as a JSON number or as a string, depending on
/// whether it came from the config file or from an env var / flag.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum StrOrInt {
    /// An integer as found in the config file.
    Int(i64),
    /// A string as found in the environment or on the command line.
    Str(String),
}

impl StrOrInt {
    /// Parse into the target integer type.
    pub fn parse<T>(&self) -> Result<T>
    where
        T: FromStr + TryFrom<i64>,
        <T as FromStr>::Err: std::error::Error + Send + Sync + 'static,
        <T as TryFrom<i64>>::Error: std::error::Error + Send + Sync + 'static,
    {
        match self {
            StrOrInt::Int(v) => Ok(T::try_from(*v)?),
            StrOrInt::Str(s) => Ok(s.trim().parse()?),
        }
    }
}

/// Boolean twin of [`StrOrInt`]. A bare flag (empty string) reads as true.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum StrOrBool {
    /// A boolean as found in the config file.
    Bool(bool),
    /// A string as found in the environment or on the command line.
    Str(String),
}

impl StrOrBool {
    /// Parse into a bool.
    pub fn parse(&self) -> Result<bool> {
        match self {
            StrOrBool::Bool(v) => Ok(*v),
            StrOrBool::Str(s) => match s.trim() {
                "" | "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                other => bail!("{other:?} is not a boolean"),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn str_or_int_parses_both_shapes() {
        let n: StrOrInt = serde_json::from_str("10").unwrap();
        assert_eq!(n.parse::<u64>().unwrap(), 10);
        let s: StrOrInt = serde_json::from_str(r#""10""#).unwrap();
        assert_eq!(s.parse::<u64>().unwrap(), 10);
        let bad: StrOrInt = serde_json::from_str(r#""ten""#).unwrap();
        assert!(bad.parse::<u64>().is_err());
    }

    #[test]
    fn str_or_bool_treats_bare_flag_as_true() {
        assert!(StrOrBool::Str(String::new()).parse().unwrap());
        assert!(!StrOrBool::Str("false".into()).parse().unwrap());
        assert!(StrOrBool::Bool(true).parse().unwrap());
    }

    #[test]
    fn empty_key_is_normalized_away() {
        let settings: Settings = serde_json::from_str(r#"{"keySha": ""}"#).unwrap();
        assert_eq!(settings.hmac_key(), None);
        let settings: Settings = serde_json::from_str(r#"{"keySha": "defaultKey"}"#).unwrap();
        assert_eq!(settings.hmac_key(), Some("defaultKey"));
    }

    #[test]
    fn address_validation() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        settings.validate_address().unwrap();
        let settings: Settings =
            serde_json::from_str(r#"{"address": "no port here"}"#).unwrap();
        assert!(settings.validate_address().is_err());
    }
}
