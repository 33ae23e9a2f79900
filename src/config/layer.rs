// ABOUTME: Partial configuration layers (defaults, file, overrides) and their merge.
// ABOUTME: Every field is optional so precedence applies field by field.

use super::ConfigError;
use super::resources::{ByteSize, CpuLimit};
use super::{HealthPolicy, StrategyKind};
use crate::health::Dimension;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment prefix for override variables (`SHIPWRIGHT_PORTS__HTTP=8080`).
pub const ENV_PREFIX: &str = "SHIPWRIGHT_";

/// A string that also accepts bare YAML scalars (`cpus: 2`, `secret: 0123`).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScalarString(pub String);

impl<'de> Deserialize<'de> for ScalarString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match serde_yaml::Value::deserialize(deserializer)? {
            serde_yaml::Value::String(s) => Ok(ScalarString(s)),
            serde_yaml::Value::Number(n) => Ok(ScalarString(n.to_string())),
            serde_yaml::Value::Bool(b) => Ok(ScalarString(b.to_string())),
            other => Err(serde::de::Error::custom(format!(
                "expected a scalar value, found {:?}",
                other
            ))),
        }
    }
}

fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<ScalarString>::deserialize(deserializer).map(|v| v.map(|s| s.0))
}

/// One source of configuration values.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    #[serde(deserialize_with = "scalar_string")]
    pub domain: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    pub admin_email: Option<String>,
    pub ports: PortsLayer,
    pub tls: Option<bool>,
    pub resources: ResourcesLayer,
    pub backup: BackupLayer,
    #[serde(deserialize_with = "scalar_string")]
    pub signing_secret: Option<String>,
    pub strategy: Option<StrategyKind>,
    pub data_dir: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub unit_dir: Option<PathBuf>,
    pub health: HealthLayer,
    pub preflight: PreflightLayer,
    pub timeouts: TimeoutsLayer,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortsLayer {
    pub http: Option<u16>,
    pub https: Option<u16>,
    pub api: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourcesLayer {
    pub memory: Option<ByteSize>,
    pub cpus: Option<CpuLimit>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackupLayer {
    pub enabled: Option<bool>,
    pub retention_days: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthLayer {
    pub attempts: Option<u32>,
    #[serde(with = "humantime_serde")]
    pub interval: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Option<Duration>,
    pub threshold: Option<f64>,
    pub mandatory: Option<Vec<Dimension>>,
    pub weights: Option<BTreeMap<Dimension, f64>>,
    pub max_disk_ratio: Option<f64>,
    pub max_memory_ratio: Option<f64>,
    pub max_log_errors: Option<u32>,
    pub log_tail_lines: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreflightLayer {
    pub min_disk: Option<ByteSize>,
    pub min_memory: Option<ByteSize>,
    pub required_commands: Option<Vec<String>>,
    pub connectivity_targets: Option<Vec<String>>,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutsLayer {
    #[serde(with = "humantime_serde")]
    pub install: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub execute: Option<Duration>,
}

impl ConfigLayer {
    /// Compiled-in defaults. Domain, admin contact and secret are left unset.
    pub fn defaults() -> Self {
        let health = HealthPolicy::default();
        ConfigLayer {
            domain: None,
            admin_email: None,
            ports: PortsLayer {
                http: Some(80),
                https: Some(443),
                api: Some(8082),
            },
            tls: Some(false),
            resources: ResourcesLayer::default(),
            backup: BackupLayer {
                enabled: Some(true),
                retention_days: Some(7),
            },
            signing_secret: None,
            strategy: Some(StrategyKind::Container),
            data_dir: Some(PathBuf::from("/srv/shipwright")),
            state_dir: Some(PathBuf::from("/var/lib/shipwright")),
            unit_dir: Some(PathBuf::from("/etc/systemd/system")),
            health: HealthLayer {
                attempts: Some(health.attempts),
                interval: Some(health.interval),
                probe_timeout: Some(health.probe_timeout),
                threshold: Some(health.threshold),
                mandatory: Some(health.mandatory),
                weights: Some(health.weights),
                max_disk_ratio: Some(health.max_disk_ratio),
                max_memory_ratio: Some(health.max_memory_ratio),
                max_log_errors: Some(health.max_log_errors),
                log_tail_lines: Some(health.log_tail_lines),
            },
            preflight: PreflightLayer {
                min_disk: Some(ByteSize::gib(2)),
                min_memory: Some(ByteSize::mib(512)),
                required_commands: Some(vec!["sh".to_string()]),
                connectivity_targets: Some(vec![
                    "1.1.1.1:443".to_string(),
                    "8.8.8.8:53".to_string(),
                ]),
                connect_timeout: Some(Duration::from_secs(3)),
            },
            timeouts: TimeoutsLayer {
                install: Some(Duration::from_secs(600)),
                execute: Some(Duration::from_secs(900)),
            },
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document is a valid, empty layer.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(ConfigError::from)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Build a layer from `key=value` pairs with dotted keys (`ports.http=8080`).
    ///
    /// Values are read as YAML scalars, so `true`, `8080` and `30s` all land
    /// in their typed fields. Unknown keys are rejected.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut root = serde_yaml::Mapping::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| ConfigError::invalid(format!("override must be key=value: {}", pair)))?;
            insert_dotted(&mut root, key.trim(), parse_scalar(value.trim()))?;
        }
        serde_yaml::from_value(serde_yaml::Value::Mapping(root)).map_err(ConfigError::from)
    }

    /// Build a layer from `SHIPWRIGHT_*` variables; `__` separates nesting levels.
    pub fn from_env_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let pairs: Vec<String> = vars
            .into_iter()
            .filter_map(|(name, value)| {
                let key = name.strip_prefix(ENV_PREFIX)?;
                Some(format!(
                    "{}={}",
                    key.to_ascii_lowercase().replace("__", "."),
                    value
                ))
            })
            .collect();
        Self::from_pairs(pairs)
    }

    /// Layer read from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_vars(std::env::vars())
    }

    /// Fill every unset field of `self` from `lower`.
    pub fn or(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            domain: self.domain.or(lower.domain),
            admin_email: self.admin_email.or(lower.admin_email),
            ports: PortsLayer {
                http: self.ports.http.or(lower.ports.http),
                https: self.ports.https.or(lower.ports.https),
                api: self.ports.api.or(lower.ports.api),
            },
            tls: self.tls.or(lower.tls),
            resources: ResourcesLayer {
                memory: self.resources.memory.or(lower.resources.memory),
                cpus: self.resources.cpus.or(lower.resources.cpus),
            },
            backup: BackupLayer {
                enabled: self.backup.enabled.or(lower.backup.enabled),
                retention_days: self.backup.retention_days.or(lower.backup.retention_days),
            },
            signing_secret: self.signing_secret.or(lower.signing_secret),
            strategy: self.strategy.or(lower.strategy),
            data_dir: self.data_dir.or(lower.data_dir),
            state_dir: self.state_dir.or(lower.state_dir),
            unit_dir: self.unit_dir.or(lower.unit_dir),
            health: self.health.or(lower.health),
            preflight: self.preflight.or(lower.preflight),
            timeouts: TimeoutsLayer {
                install: self.timeouts.install.or(lower.timeouts.install),
                execute: self.timeouts.execute.or(lower.timeouts.execute),
            },
        }
    }
}

impl HealthLayer {
    fn or(self, lower: HealthLayer) -> HealthLayer {
        HealthLayer {
            attempts: self.attempts.or(lower.attempts),
            interval: self.interval.or(lower.interval),
            probe_timeout: self.probe_timeout.or(lower.probe_timeout),
            threshold: self.threshold.or(lower.threshold),
            mandatory: self.mandatory.or(lower.mandatory),
            weights: merge_keyed(self.weights, lower.weights),
            max_disk_ratio: self.max_disk_ratio.or(lower.max_disk_ratio),
            max_memory_ratio: self.max_memory_ratio.or(lower.max_memory_ratio),
            max_log_errors: self.max_log_errors.or(lower.max_log_errors),
            log_tail_lines: self.log_tail_lines.or(lower.log_tail_lines),
        }
    }
}

impl PreflightLayer {
    fn or(self, lower: PreflightLayer) -> PreflightLayer {
        PreflightLayer {
            min_disk: self.min_disk.or(lower.min_disk),
            min_memory: self.min_memory.or(lower.min_memory),
            required_commands: self.required_commands.or(lower.required_commands),
            connectivity_targets: self.connectivity_targets.or(lower.connectivity_targets),
            connect_timeout: self.connect_timeout.or(lower.connect_timeout),
        }
    }
}

/// Maps merge per key; the upper layer wins where both set one.
fn merge_keyed<K: Ord, V>(
    upper: Option<BTreeMap<K, V>>,
    lower: Option<BTreeMap<K, V>>,
) -> Option<BTreeMap<K, V>> {
    match (upper, lower) {
        (Some(upper), Some(mut lower)) => {
            lower.extend(upper);
            Some(lower)
        }
        (upper, lower) => upper.or(lower),
    }
}

fn parse_scalar(raw: &str) -> serde_yaml::Value {
    // Collections are accepted in flow form: required_commands=[sh, curl]
    match serde_yaml::from_str::<serde_yaml::Value>(raw) {
        // Numbers that do not round-trip (leading zeros) stay strings.
        Ok(serde_yaml::Value::Number(n)) if n.to_string() == raw => serde_yaml::Value::Number(n),
        Ok(v @ (serde_yaml::Value::Bool(_)
        | serde_yaml::Value::Sequence(_)
        | serde_yaml::Value::Mapping(_))) => v,
        _ => serde_yaml::Value::String(raw.to_string()),
    }
}

fn insert_dotted(
    root: &mut serde_yaml::Mapping,
    key: &str,
    value: serde_yaml::Value,
) -> Result<(), ConfigError> {
    let mut parts = key.split('.').peekable();
    let mut current = root;
    while let Some(part) = parts.next() {
        if part.is_empty() {
            return Err(ConfigError::invalid(format!("malformed override key: {}", key)));
        }
        let part_key = serde_yaml::Value::String(part.to_string());
        if parts.peek().is_none() {
            current.insert(part_key, value);
            return Ok(());
        }
        let entry = current
            .entry(part_key)
            .or_insert_with(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
        current = match entry {
            serde_yaml::Value::Mapping(m) => m,
            _ => {
                return Err(ConfigError::invalid(format!(
                    "override key {} conflicts with a scalar value",
                    key
                )));
            }
        };
    }
    Err(ConfigError::invalid(format!("malformed override key: {}", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_build_nested_layer() {
        let layer = ConfigLayer::from_pairs([
            "domain=example.org",
            "ports.http=8080",
            "tls=true",
            "resources.cpus=1.5",
            "health.interval=2s",
        ])
        .unwrap();

        assert_eq!(layer.domain.as_deref(), Some("example.org"));
        assert_eq!(layer.ports.http, Some(8080));
        assert_eq!(layer.ports.https, None);
        assert_eq!(layer.tls, Some(true));
        assert_eq!(layer.resources.cpus.map(|c| c.cores()), Some(1.5));
        assert_eq!(layer.health.interval, Some(Duration::from_secs(2)));
    }

    #[test]
    fn numeric_looking_secret_stays_a_string() {
        let layer = ConfigLayer::from_pairs(["signing_secret=0123456789"]).unwrap();
        assert_eq!(layer.signing_secret.as_deref(), Some("0123456789"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ConfigLayer::from_pairs(["domian=typo.org"]).is_err());
        assert!(ConfigLayer::from_pairs(["ports.ssh=22"]).is_err());
        assert!(ConfigLayer::from_pairs(["no-equals-sign"]).is_err());
        assert!(ConfigLayer::from_pairs(["ports..http=1"]).is_err());
    }

    #[test]
    fn env_vars_map_to_dotted_keys() {
        let layer = ConfigLayer::from_env_vars([
            ("SHIPWRIGHT_PORTS__API".to_string(), "9000".to_string()),
            ("SHIPWRIGHT_ADMIN_EMAIL".to_string(), "ops@example.org".to_string()),
            ("UNRELATED".to_string(), "ignored".to_string()),
        ])
        .unwrap();
        assert_eq!(layer.ports.api, Some(9000));
        assert_eq!(layer.admin_email.as_deref(), Some("ops@example.org"));
    }

    #[test]
    fn or_prefers_self_field_by_field() {
        let upper = ConfigLayer::from_pairs(["ports.http=8080"]).unwrap();
        let lower = ConfigLayer::from_pairs(["ports.http=80", "ports.api=9000"]).unwrap();
        let merged = upper.or(lower);
        assert_eq!(merged.ports.http, Some(8080));
        assert_eq!(merged.ports.api, Some(9000));
    }

    #[test]
    fn health_weights_merge_per_dimension() {
        let upper = ConfigLayer::from_pairs(["health.weights.endpoint=5"]).unwrap();
        let merged = upper.or(ConfigLayer::defaults());
        let weights = merged.health.weights.unwrap();

        assert_eq!(weights[&Dimension::Endpoint], 5.0);
        assert_eq!(weights[&Dimension::Liveness], 3.0);
        assert_eq!(weights[&Dimension::DiskUsage], 1.0);
        assert_eq!(weights.len(), Dimension::ALL.len());
    }

    #[test]
    fn empty_yaml_is_an_empty_layer() {
        assert_eq!(ConfigLayer::from_yaml("  \n").unwrap(), ConfigLayer::default());
    }
}
