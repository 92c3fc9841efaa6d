use std::env;
use std::ffi::OsString;

use config::{ConfigError, Map, Source, Value, ValueKind};

/// A source for loading configuration from command line arguments.
/// Argument keys are case-insensitive and take one or two leading dashes;
/// the following forms are supported:
///
/// * `-k value` / `--key value`
/// * `--key=value`
/// * `--key="value"`
/// * `--key='value'`
/// * `-k` (value is an empty string)
///
/// Keys are mapped onto config keys through the alias table; an argument
/// with no alias is rejected so typos surface at startup.
#[must_use]
#[derive(Clone, Debug)]
pub(crate) struct CommandLineArguments {
    aliases: &'static [(&'static str, &'static str)],

    /// Alternate source for the arguments. This can be used to test the
    /// parser without changing the process arguments.
    source: Option<Vec<OsString>>,
}

impl CommandLineArguments {
    pub fn new(aliases: &'static [(&'static str, &'static str)]) -> Self {
        Self {
            aliases,
            source: None,
        }
    }

    #[cfg(test)]
    fn with_source<I, S>(mut self, source: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.source = Some(source.into_iter().map(Into::into).collect());
        self
    }

    /// Both the short flag and the config key itself are accepted, so
    /// `-k secret` and `--keySha secret` land on the same key.
    fn resolve(&self, key: &str) -> Option<&'static str> {
        self.aliases
            .iter()
            .find(|(flag, config_key)| {
                flag.eq_ignore_ascii_case(key) || config_key.eq_ignore_ascii_case(key)
            })
            .map(|(_, config_key)| *config_key)
    }
}

impl Source for CommandLineArguments {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new((*self).clone())
    }

    fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
        let uri: String = "program argument".into();
        let mut m = Map::new();

        let args = self
            .source
            .clone()
            .unwrap_or_else(|| env::args_os().skip(1).collect());
        let mut args = args.into_iter().peekable();

        while let Some(arg) = args.next() {
            let arg = arg
                .into_string()
                .map_err(|a| ConfigError::Message(format!("argument {a:?} is not utf-8")))?;
            let Some(term) = arg.strip_prefix('-') else {
                return Err(ConfigError::Message(format!(
                    "unexpected positional argument {arg:?}"
                )));
            };
            let term = term.strip_prefix('-').unwrap_or(term);
            if term.is_empty() {
                return Err(ConfigError::Message("empty argument key".into()));
            }

            let (key, value) = if let Some((key, value)) = term.split_once('=') {
                (key.to_owned(), unquote(value)?.to_owned())
            } else {
                // `--key value`, unless the next argument is another key.
                let value = match args.peek().and_then(|a| a.to_str()) {
                    Some(next) if !next.starts_with('-') => {
                        let value = next.to_owned();
                        args.next();
                        value
                    }
                    _ => String::new(),
                };
                (term.to_owned(), value)
            };

            // The config-file path is consumed before the builder runs.
            if key.eq_ignore_ascii_case("config") {
                continue;
            }

            let Some(config_key) = self.resolve(&key) else {
                return Err(ConfigError::Message(format!("unknown argument --{key}")));
            };
            m.insert(
                config_key.to_owned(),
                Value::new(Some(&uri), ValueKind::String(value)),
            );
        }

        Ok(m)
    }
}

fn unquote(value: &str) -> Result<&str, ConfigError> {
    for quote in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(quote) {
            // A closing quote must be the same as the opening one.
            return inner
                .strip_suffix(quote)
                .ok_or_else(|| ConfigError::Message(format!("unmatched quote in {value:?}")));
        }
    }
    Ok(value)
}

#[cfg(test)]
mod test {
    use super::*;

    const ALIASES: &[(&str, &str)] = &[
        ("a", "address"),
        ("p", "pollInterval"),
        ("k", "keySha"),
        ("crypto-key", "cryptoKey"),
        ("r", "restore"),
    ];

    fn collect(args: &[&str]) -> Result<Map<String, Value>, ConfigError> {
        CommandLineArguments::new(ALIASES)
            .with_source(args.iter().copied())
            .collect()
    }

    #[test]
    fn short_flags_map_to_config_keys() {
        let m = collect(&["-a", "localhost:9090", "-p", "5"]).unwrap();
        assert_eq!(m["address"].clone().into_string().unwrap(), "localhost:9090");
        assert_eq!(m["pollInterval"].clone().into_string().unwrap(), "5");
    }

    #[test]
    fn equals_and_quotes() {
        let m = collect(&["--keySha=\"secret\"", "--crypto-key='key.pem'"]).unwrap();
        assert_eq!(m["keySha"].clone().into_string().unwrap(), "secret");
        assert_eq!(m["cryptoKey"].clone().into_string().unwrap(), "key.pem");
    }

    #[test]
    fn long_alias_of_config_key_works() {
        let m = collect(&["--keysha", "secret"]).unwrap();
        assert_eq!(m["keySha"].clone().into_string().unwrap(), "secret");
    }

    #[test]
    fn bare_flag_reads_as_empty_string() {
        let m = collect(&["-r", "-a", "localhost:8080"]).unwrap();
        assert_eq!(m["restore"].clone().into_string().unwrap(), "");
    }

    #[test]
    fn config_flag_is_skipped() {
        let m = collect(&["-config", "agent.json", "-p", "2"]).unwrap();
        assert!(!m.contains_key("config"));
        assert_eq!(m["pollInterval"].clone().into_string().unwrap(), "2");
    }

    #[test]
    fn unknown_flag_is_an_error() {
        assert!(collect(&["--bogus", "1"]).is_err());
    }

    #[test]
    fn unmatched_quote_is_an_error() {
        assert!(collect(&["--keySha=\"secret"]).is_err());
    }
}
