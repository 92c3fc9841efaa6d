use std::env;

use config::{ConfigError, Map, Source, Value, ValueKind};

/// A source reading the agent's environment variables through an explicit
/// alias table (`POLL_INTERVAL` → `pollInterval`, …). The env surface is
/// flat, so no separator or prefix handling is needed; empty values are
/// treated as unset so an exported-but-blank variable does not clobber a
/// configured one.
#[must_use]
#[derive(Clone, Debug)]
pub(crate) struct Environment {
    aliases: &'static [(&'static str, &'static str)],

    /// Alternate source for the environment, for tests.
    source: Option<Map<String, String>>,
}

impl Environment {
    pub fn new(aliases: &'static [(&'static str, &'static str)]) -> Self {
        Self {
            aliases,
            source: None,
        }
    }

    #[cfg(test)]
    fn with_source<'a, I>(mut self, source: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.source = Some(
            source
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        );
        self
    }

    fn get(&self, name: &str) -> Option<String> {
        match &self.source {
            Some(vars) => vars.get(name).cloned(),
            None => env::var(name).ok(),
        }
    }
}

impl Source for Environment {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new((*self).clone())
    }

    fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
        let uri: String = "program environment".into();
        let mut m = Map::new();

        for (name, config_key) in self.aliases {
            let Some(value) = self.get(name) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            m.insert(
                (*config_key).to_owned(),
                Value::new(Some(&uri), ValueKind::String(value)),
            );
        }

        Ok(m)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const ALIASES: &[(&str, &str)] = &[
        ("ADDRESS", "address"),
        ("POLL_INTERVAL", "pollInterval"),
        ("KEY", "keySha"),
    ];

    #[test]
    fn aliased_vars_are_collected() {
        let m = Environment::new(ALIASES)
            .with_source([("ADDRESS", "localhost:9090"), ("POLL_INTERVAL", "7")])
            .collect()
            .unwrap();
        assert_eq!(m["address"].clone().into_string().unwrap(), "localhost:9090");
        assert_eq!(m["pollInterval"].clone().into_string().unwrap(), "7");
        assert!(!m.contains_key("keySha"));
    }

    #[test]
    fn empty_values_are_unset() {
        let m = Environment::new(ALIASES)
            .with_source([("KEY", "")])
            .collect()
            .unwrap();
        assert!(m.is_empty());
    }

    #[test]
    fn unrelated_vars_are_ignored() {
        let m = Environment::new(ALIASES)
            .with_source([("PATH", "/usr/bin"), ("KEY", "secret")])
            .collect()
            .unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m["keySha"].clone().into_string().unwrap(), "secret");
    }
}
