use std::{env, net::SocketAddr};

use crate::error::ConfigError;

const DEFAULT_DATABASE: &str = "SplitLedger";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Service configuration, read from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    pub mongodb_uri: String,
    pub database: String,
    pub bind_addr: SocketAddr,
    pub auth_secret: String,
    pub gateway_webhook_secret: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned())
            .parse()
            .map_err(|err: std::net::AddrParseError| ConfigError::Invalid {
                name: "BIND_ADDR",
                reason: err.to_string(),
            })?;

        Ok(Self {
            mongodb_uri: get("MONGODB_URI")?,
            database: lookup("DATABASE_NAME").unwrap_or_else(|| DEFAULT_DATABASE.to_owned()),
            bind_addr,
            auth_secret: get("AUTH_SECRET")?,
            gateway_webhook_secret: get("GATEWAY_WEBHOOK_SECRET")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn defaults_fill_optional_values() {
        let config = Config::from_lookup(lookup_from(&[
            ("MONGODB_URI", "mongodb://localhost"),
            ("AUTH_SECRET", "a"),
            ("GATEWAY_WEBHOOK_SECRET", "b"),
        ]))
        .unwrap();
        assert_eq!(config.database, "SplitLedger");
        assert_eq!(config.bind_addr.port(), 8080);
    }

    #[test]
    fn missing_secret_is_reported() {
        let err = Config::from_lookup(lookup_from(&[("MONGODB_URI", "mongodb://localhost")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("AUTH_SECRET")));
    }

    #[test]
    fn bad_bind_addr_is_invalid() {
        let err = Config::from_lookup(lookup_from(&[
            ("MONGODB_URI", "mongodb://localhost"),
            ("BIND_ADDR", "not an address"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "BIND_ADDR", .. }));
    }
}
