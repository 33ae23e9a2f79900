// ABOUTME: The fixed, rank-ordered set of managed services and their descriptors.
// ABOUTME: Loaded from YAML or taken from the built-in release inventory.

mod defaults;

pub use defaults::default_inventory;

use crate::config::{PortKey, Ports, StrategyKind};
use crate::types::{ImageRef, ServiceName};
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("service inventory is empty")]
    Empty,

    #[error("duplicate service name: {0}")]
    DuplicateName(ServiceName),

    #[error("duplicate rank {rank} ({first} and {second})")]
    DuplicateRank {
        rank: u32,
        first: ServiceName,
        second: ServiceName,
    },

    #[error("service {service} has no {strategy} activation parameters")]
    MissingActivation {
        service: ServiceName,
        strategy: StrategyKind,
    },

    #[error("invalid service descriptor: {0}")]
    Invalid(String),

    #[error("failed to read inventory {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("inventory parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// A port either given literally or taken from the configured port set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSource {
    Fixed(u16),
    Configured(PortKey),
}

impl PortSource {
    /// `None` when the referenced configured port is disabled.
    pub fn resolve(&self, ports: &Ports) -> Option<u16> {
        match self {
            PortSource::Fixed(port) => Some(*port),
            PortSource::Configured(key) => ports.get(*key),
        }
    }
}

/// How readiness of a service is observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeKind {
    /// GET `path` on `port`; 2xx and 3xx count as ready.
    Http { path: String, port: PortSource },
    /// The process (or container) is running.
    Process,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Host path; relative paths live under the data dir.
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: ImageRef,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinarySpec {
    /// Absolute path of the executable, or relative to `workdir`.
    pub executable: PathBuf,
    /// Shell command that produces the executable when it is missing.
    #[serde(default)]
    pub build: Option<String>,
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl BinarySpec {
    pub fn executable_path(&self) -> PathBuf {
        match &self.workdir {
            Some(dir) if self.executable.is_relative() => dir.join(&self.executable),
            _ => self.executable.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activation {
    #[serde(default)]
    pub container: Option<ContainerSpec>,
    #[serde(default)]
    pub binary: Option<BinarySpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: ServiceName,
    /// Activation order; lower ranks start first.
    pub rank: u32,
    #[serde(default)]
    pub ports: Vec<PortSource>,
    pub probe: ProbeKind,
    #[serde(default)]
    pub activation: Activation,
}

impl ServiceDescriptor {
    /// Host ports this service binds, skipping disabled configured ports.
    pub fn resolved_ports(&self, ports: &Ports) -> Vec<u16> {
        self.ports.iter().filter_map(|p| p.resolve(ports)).collect()
    }

    /// Port and path of the HTTP probe, if any and enabled.
    pub fn http_probe(&self, ports: &Ports) -> Option<(u16, &str)> {
        match &self.probe {
            ProbeKind::Http { path, port } => port.resolve(ports).map(|p| (p, path.as_str())),
            ProbeKind::Process => None,
        }
    }
}

/// Non-empty list of services, sorted by rank, with unique names and ranks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory(NonEmpty<ServiceDescriptor>);

impl Inventory {
    pub fn new(mut services: Vec<ServiceDescriptor>) -> Result<Self, InventoryError> {
        services.sort_by_key(|s| s.rank);

        let mut names = HashSet::new();
        for service in &services {
            if !names.insert(&service.name) {
                return Err(InventoryError::DuplicateName(service.name.clone()));
            }
        }
        if let Some(pair) = services.windows(2).find(|w| w[0].rank == w[1].rank) {
            return Err(InventoryError::DuplicateRank {
                rank: pair[0].rank,
                first: pair[0].name.clone(),
                second: pair[1].name.clone(),
            });
        }

        NonEmpty::from_vec(services)
            .map(Inventory)
            .ok_or(InventoryError::Empty)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, InventoryError> {
        let services: Vec<ServiceDescriptor> = serde_yaml::from_str(yaml)?;
        Self::new(services)
    }

    pub fn load(path: &Path) -> Result<Self, InventoryError> {
        let content = std::fs::read_to_string(path).map_err(|source| InventoryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Services in ascending rank order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ServiceDescriptor> {
        std::iter::once(&self.0.head).chain(self.0.tail.iter())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn get(&self, name: &ServiceName) -> Option<&ServiceDescriptor> {
        self.iter().find(|s| &s.name == name)
    }

    /// Every host port the inventory binds, with its owning service.
    pub fn designated_ports(&self, ports: &Ports) -> Vec<(ServiceName, u16)> {
        self.iter()
            .flat_map(|s| {
                s.resolved_ports(ports)
                    .into_iter()
                    .map(move |p| (s.name.clone(), p))
            })
            .collect()
    }

    /// Check that every service can be activated by `strategy`.
    pub fn check_strategy(&self, strategy: StrategyKind) -> Result<(), InventoryError> {
        for service in self.iter() {
            let present = match strategy {
                StrategyKind::Container => service.activation.container.is_some(),
                StrategyKind::Binary => service.activation.binary.is_some(),
            };
            if !present {
                return Err(InventoryError::MissingActivation {
                    service: service.name.clone(),
                    strategy,
                });
            }
        }
        Ok(())
    }

    /// Keep only the named services; ranks keep their order.
    pub fn select(&self, names: &[ServiceName]) -> Vec<&ServiceDescriptor> {
        self.iter().filter(|s| names.contains(&s.name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str, rank: u32) -> ServiceDescriptor {
        ServiceDescriptor {
            name: ServiceName::new(name).unwrap(),
            rank,
            ports: vec![],
            probe: ProbeKind::Process,
            activation: Activation::default(),
        }
    }

    #[test]
    fn new_sorts_by_rank() {
        let inventory = Inventory::new(vec![service("b", 2), service("a", 1), service("c", 3)])
            .unwrap();
        let names: Vec<&str> = inventory.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn rejects_empty_and_duplicates() {
        assert!(matches!(Inventory::new(vec![]), Err(InventoryError::Empty)));
        assert!(matches!(
            Inventory::new(vec![service("a", 1), service("a", 2)]),
            Err(InventoryError::DuplicateName(_))
        ));
        assert!(matches!(
            Inventory::new(vec![service("a", 1), service("b", 1)]),
            Err(InventoryError::DuplicateRank { rank: 1, .. })
        ));
    }

    #[test]
    fn configured_ports_follow_config() {
        let ports = Ports {
            http: Some(8080),
            https: None,
            api: Some(9000),
        };
        let mut gateway = service("gateway", 1);
        gateway.ports = vec![
            PortSource::Configured(PortKey::Http),
            PortSource::Configured(PortKey::Https),
            PortSource::Fixed(81),
        ];
        assert_eq!(gateway.resolved_ports(&ports), vec![8080, 81]);
    }

    #[test]
    fn parses_yaml_inventory() {
        let inventory = Inventory::from_yaml(
            r#"
- name: console
  rank: 2
  ports: [3000]
  probe: { kind: http, path: /, port: 3000 }
  activation:
    container: { image: "ghcr.io/acme/console:1.0" }
- name: orchestrator
  rank: 1
  ports: [api]
  probe: { kind: http, path: /health, port: api }
  activation:
    binary: { executable: /usr/local/bin/orchestrator, args: ["--serve"] }
"#,
        )
        .unwrap();

        let first = inventory.iter().next().unwrap();
        assert_eq!(first.name.as_str(), "orchestrator");
        assert_eq!(first.ports, vec![PortSource::Configured(PortKey::Api)]);
        assert!(inventory.check_strategy(StrategyKind::Binary).is_err());
        assert!(inventory.check_strategy(StrategyKind::Container).is_err());
    }

    #[test]
    fn relative_executable_resolves_against_workdir() {
        let spec = BinarySpec {
            executable: PathBuf::from("target/release/console"),
            build: None,
            workdir: Some(PathBuf::from("/src/console")),
            args: vec![],
        };
        assert_eq!(
            spec.executable_path(),
            PathBuf::from("/src/console/target/release/console")
        );
    }
}
