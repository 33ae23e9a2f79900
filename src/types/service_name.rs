// ABOUTME: DNS-compatible service name validation.
// ABOUTME: Service names become container names, unit names and env file keys.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Prefix applied to every host-level resource shipwright creates.
pub const RESOURCE_PREFIX: &str = "shipwright";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceNameError {
    #[error("service name cannot be empty")]
    Empty,

    #[error("service name exceeds maximum length of 48 characters")]
    TooLong,

    #[error("service name must start with a lowercase letter")]
    BadStart,

    #[error("service name cannot end with a hyphen")]
    EndsWithHyphen,

    #[error("invalid character in service name: '{0}'")]
    InvalidChar(char),
}

/// Name of a managed service (`gateway`, `console`, ...).
///
/// Restricted to lowercase RFC 1123 label characters, and short enough that
/// the prefixed container and unit names stay within label limits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new(value: &str) -> Result<Self, ServiceNameError> {
        let Some(first) = value.chars().next() else {
            return Err(ServiceNameError::Empty);
        };

        if value.len() > 48 {
            return Err(ServiceNameError::TooLong);
        }

        if !first.is_ascii_lowercase() {
            return Err(ServiceNameError::BadStart);
        }

        if value.ends_with('-') {
            return Err(ServiceNameError::EndsWithHyphen);
        }

        if let Some(c) = value
            .chars()
            .find(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit() && *c != '-')
        {
            return Err(ServiceNameError::InvalidChar(c));
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Container name used by the container strategy.
    pub fn container_name(&self) -> String {
        format!("{}-{}", RESOURCE_PREFIX, self.0)
    }

    /// Name of the previous container kept aside during an upgrade.
    pub fn previous_container_name(&self) -> String {
        format!("{}-{}-previous", RESOURCE_PREFIX, self.0)
    }

    /// systemd unit name used by the binary strategy.
    pub fn unit_name(&self) -> String {
        format!("{}-{}.service", RESOURCE_PREFIX, self.0)
    }

    /// Upper-snake form used for environment variable names.
    pub fn env_key(&self) -> String {
        self.0.replace('-', "_").to_ascii_uppercase()
    }
}

impl FromStr for ServiceName {
    type Err = ServiceNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for ServiceName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ServiceName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ServiceName::new(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_names() {
        assert!(ServiceName::new("gateway").is_ok());
        assert!(ServiceName::new("health-probe").is_ok());
        assert!(ServiceName::new("backup2").is_ok());
    }

    #[test]
    fn rejects_bad_names() {
        assert_eq!(ServiceName::new(""), Err(ServiceNameError::Empty));
        assert_eq!(ServiceName::new("-x"), Err(ServiceNameError::BadStart));
        assert_eq!(ServiceName::new("9lives"), Err(ServiceNameError::BadStart));
        assert_eq!(ServiceName::new("x-"), Err(ServiceNameError::EndsWithHyphen));
        assert_eq!(
            ServiceName::new("Gate"),
            Err(ServiceNameError::BadStart)
        );
        assert_eq!(
            ServiceName::new("gate_way"),
            Err(ServiceNameError::InvalidChar('_'))
        );
        assert_eq!(
            ServiceName::new(&"a".repeat(49)),
            Err(ServiceNameError::TooLong)
        );
    }

    #[test]
    fn derived_resource_names() {
        let name = ServiceName::new("health-probe").unwrap();
        assert_eq!(name.container_name(), "shipwright-health-probe");
        assert_eq!(
            name.previous_container_name(),
            "shipwright-health-probe-previous"
        );
        assert_eq!(name.unit_name(), "shipwright-health-probe.service");
        assert_eq!(name.env_key(), "HEALTH_PROBE");
    }

    #[test]
    fn deserializes_with_validation() {
        let ok: ServiceName = serde_yaml::from_str("console").unwrap();
        assert_eq!(ok.as_str(), "console");
        assert!(serde_yaml::from_str::<ServiceName>("Console!").is_err());
    }
}
