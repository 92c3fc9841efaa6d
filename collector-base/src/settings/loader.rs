//! Layered settings loading: defaults, then the optional JSON config file,
//! then command-line flags, then environment variables (the last wins).

use std::env;

use config::{Config, File, FileFormat};
use eyre::{bail, Context, Result};
use serde::Deserialize;

use self::arguments::CommandLineArguments;
use self::environment::Environment;

mod arguments;
mod environment;

/// Flag and env-var surfaces differ per binary; each agent carries its own
/// alias tables mapping them onto config keys.
struct AgentProfile {
    /// Short/long flag name (without dashes) → config key.
    flags: &'static [(&'static str, &'static str)],
    /// Env var name → config key.
    envs: &'static [(&'static str, &'static str)],
    /// Env vars that may carry the config-file path.
    config_envs: &'static [&'static str],
    /// Builder defaults, applied before any source.
    defaults: &'static [(&'static str, &'static str)],
}

const COLLECTOR_PROFILE: AgentProfile = AgentProfile {
    flags: &[
        ("a", "address"),
        ("p", "pollInterval"),
        ("r", "reportInterval"),
        ("l", "rateLimit"),
        ("k", "keySha"),
        ("crypto-key", "cryptoKey"),
        ("transport", "transport"),
        ("metrics-port", "metricsPort"),
    ],
    envs: &[
        ("ADDRESS", "address"),
        ("POLL_INTERVAL", "pollInterval"),
        ("REPORT_INTERVAL", "reportInterval"),
        ("RATE_LIMIT", "rateLimit"),
        ("KEY", "keySha"),
        ("CRYPTO_KEY_AGENT", "cryptoKey"),
        ("TRANSPORT", "transport"),
    ],
    config_envs: &["CONFIG_AGENT", "CONFIG"],
    defaults: &[
        ("pollInterval", "2"),
        ("reportInterval", "10"),
        ("rateLimit", "3"),
    ],
};

const AGGREGATOR_PROFILE: AgentProfile = AgentProfile {
    flags: &[
        ("a", "address"),
        ("d", "databaseDsn"),
        ("f", "storeFile"),
        ("i", "storeInterval"),
        ("k", "keySha"),
        ("r", "restore"),
        ("t", "trustedSubnet"),
        ("crypto-key", "cryptoKey"),
        ("grpc-address", "grpcAddress"),
        ("metrics-port", "metricsPort"),
    ],
    envs: &[
        ("ADDRESS", "address"),
        ("DATABASE_DSN", "databaseDsn"),
        ("FILE_STORAGE_PATH", "storeFile"),
        ("STORE_INTERVAL", "storeInterval"),
        ("KEY", "keySha"),
        ("RESTORE", "restore"),
        ("TRUSTED_SUBNET", "trustedSubnet"),
        ("CRYPTO_KEY_SERVER", "cryptoKey"),
        ("GRPC_ADDRESS", "grpcAddress"),
    ],
    config_envs: &["CONFIG_SERVER", "CONFIG"],
    defaults: &[
        ("storeFile", "metrics.json"),
        ("storeInterval", "300"),
        ("restore", "true"),
    ],
};

/// Load a settings object for the named agent from the config locations.
///
/// The config file path itself is resolved before the builder runs, from
/// the `-config`/`--config` flag or the agent's `CONFIG_*` env vars.
pub(crate) fn load_settings_object<'de, T: Deserialize<'de>>(agent: &str) -> Result<T> {
    let profile = match agent {
        "collector" => COLLECTOR_PROFILE,
        "aggregator" => AGGREGATOR_PROFILE,
        other => bail!("no settings profile for agent {other:?}"),
    };

    let mut builder = Config::builder();
    for (key, value) in profile.defaults {
        builder = builder.set_default(*key, *value)?;
    }
    if let Some(path) = config_file_path(&profile) {
        builder = builder.add_source(File::new(&path, FileFormat::Json));
    }
    let config = builder
        .add_source(CommandLineArguments::new(profile.flags))
        .add_source(Environment::new(profile.envs))
        .build()?;

    serde_path_to_error::deserialize(config).context("could not deserialize settings")
}

fn config_file_path(profile: &AgentProfile) -> Option<String> {
    // The flag wins over the env vars, mirroring the general precedence.
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let term = arg.trim_start_matches('-');
        if let Some(inline) = term.strip_prefix("config=") {
            return Some(inline.trim_matches(|c| c == '"' || c == '\'').to_owned());
        }
        if term == "config" {
            if let Some(value) = args.next() {
                return Some(value);
            }
        }
    }
    for name in profile.config_envs {
        if let Ok(value) = env::var(name) {
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

#[cfg(test)]
mod test {
    use serde::Deserialize;

    use super::*;
    use crate::settings::{Settings, StrOrInt};

    /// Shaped like a `decl_settings!` expansion.
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct FileSettings {
        #[serde(flatten)]
        base: Settings,
        poll_interval: Option<StrOrInt>,
        report_interval: Option<StrOrInt>,
    }

    #[test]
    fn file_values_layer_over_defaults() {
        let config = Config::builder()
            .set_default("pollInterval", "2")
            .unwrap()
            .set_default("reportInterval", "10")
            .unwrap()
            .add_source(File::from_str(
                r#"{"address": "localhost:9000", "keySha": "secret", "pollInterval": 5}"#,
                FileFormat::Json,
            ))
            .build()
            .unwrap();
        let settings: FileSettings = serde_path_to_error::deserialize(config).unwrap();

        assert_eq!(settings.base.address, "localhost:9000");
        assert_eq!(settings.base.hmac_key(), Some("secret"));
        // The file's JSON number wins over the string default.
        assert_eq!(
            settings.poll_interval.unwrap().parse::<u64>().unwrap(),
            5
        );
        assert_eq!(
            settings.report_interval.unwrap().parse::<u64>().unwrap(),
            10
        );
    }

    #[test]
    fn unknown_agent_has_no_profile() {
        assert!(load_settings_object::<FileSettings>("relay").is_err());
    }
}
