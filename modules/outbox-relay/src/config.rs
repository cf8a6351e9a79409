use std::env;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid {name}: {value}. Must be one of {allowed}")]
    Invalid {
        name: &'static str,
        value: String,
        allowed: &'static str,
    },

    #[error("PRODUCER_TYPE=bus requires BUS_TYPE=nats; an in-memory bus has no subscribers outside this process")]
    BusProducerWithoutBroker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    InMemory,
    Nats,
}

impl FromStr for BusType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inmemory" => Ok(BusType::InMemory),
            "nats" => Ok(BusType::Nats),
            _ => Err(ConfigError::Invalid {
                name: "BUS_TYPE",
                value: s.to_string(),
                allowed: "'inmemory' or 'nats'",
            }),
        }
    }
}

impl fmt::Display for BusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BusType::InMemory => "inmemory",
            BusType::Nats => "nats",
        })
    }
}

/// Where dispatched records go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerType {
    /// Log only; records are marked SENT without reaching a broker
    Logging,
    Bus,
}

impl FromStr for ProducerType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "logging" => Ok(ProducerType::Logging),
            "bus" => Ok(ProducerType::Bus),
            _ => Err(ConfigError::Invalid {
                name: "PRODUCER_TYPE",
                value: s.to_string(),
                allowed: "'logging' or 'bus'",
            }),
        }
    }
}

impl fmt::Display for ProducerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProducerType::Logging => "logging",
            ProducerType::Bus => "bus",
        })
    }
}

/// Relay configuration parsed from environment variables
///
/// Processor tuning (`OUTBOX_*`) is read separately by
/// [`outbox::OutboxConfig::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bus_type: BusType,
    pub producer_type: ProducerType,
    pub nats_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let bus_type: BusType = env::var("BUS_TYPE")
            .unwrap_or_else(|_| "inmemory".to_string())
            .parse()?;

        let producer_type: ProducerType = env::var("PRODUCER_TYPE")
            .unwrap_or_else(|_| "logging".to_string())
            .parse()?;

        if producer_type == ProducerType::Bus && bus_type == BusType::InMemory {
            return Err(ConfigError::BusProducerWithoutBroker);
        }

        let nats_url = env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());

        Ok(Config {
            database_url,
            bus_type,
            producer_type,
            nats_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear() {
        for name in ["DATABASE_URL", "BUS_TYPE", "PRODUCER_TYPE", "NATS_URL"] {
            env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_database_url_is_required() {
        clear();
        assert_eq!(
            Config::from_env().unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear();
        env::set_var("DATABASE_URL", "postgres://localhost/outbox");

        let config = Config::from_env().unwrap();
        assert_eq!(config.bus_type, BusType::InMemory);
        assert_eq!(config.producer_type, ProducerType::Logging);
        assert_eq!(config.nats_url, "nats://localhost:4222");
        clear();
    }

    #[test]
    #[serial]
    fn test_types_are_case_insensitive() {
        clear();
        env::set_var("DATABASE_URL", "postgres://localhost/outbox");
        env::set_var("BUS_TYPE", "NATS");
        env::set_var("PRODUCER_TYPE", "Bus");

        let config = Config::from_env().unwrap();
        assert_eq!(config.bus_type, BusType::Nats);
        assert_eq!(config.producer_type, ProducerType::Bus);
        clear();
    }

    #[test]
    #[serial]
    fn test_bus_producer_requires_real_broker() {
        clear();
        env::set_var("DATABASE_URL", "postgres://localhost/outbox");
        env::set_var("PRODUCER_TYPE", "bus");

        assert_eq!(
            Config::from_env().unwrap_err(),
            ConfigError::BusProducerWithoutBroker
        );

        env::set_var("BUS_TYPE", "nats");
        assert_eq!(Config::from_env().unwrap().producer_type, ProducerType::Bus);
        clear();
    }

    #[test]
    #[serial]
    fn test_unknown_bus_type_is_rejected() {
        clear();
        env::set_var("DATABASE_URL", "postgres://localhost/outbox");
        env::set_var("BUS_TYPE", "kafka");

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("BUS_TYPE"));
        clear();
    }
}
