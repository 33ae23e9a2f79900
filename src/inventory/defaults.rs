// ABOUTME: Built-in service inventory shipped with each release.
// ABOUTME: Orchestrator, console, health probe, gateway and backup agent.

use super::{
    Activation, BinarySpec, ContainerSpec, Inventory, InventoryError, PortSource, ProbeKind,
    ServiceDescriptor, VolumeSpec,
};
use crate::config::PortKey;
use crate::types::{ImageRef, ServiceName};
use std::collections::BTreeMap;
use std::path::PathBuf;

const IMAGE_REGISTRY: &str = "ghcr.io/shipwright";
const RELEASE: &str = "1.0.0";
const BIN_DIR: &str = "/usr/local/lib/shipwright/bin";

struct Entry {
    name: &'static str,
    rank: u32,
    ports: &'static [PortSource],
    probe: Option<(&'static str, PortSource)>,
    data_mount: bool,
}

const ENTRIES: [Entry; 5] = [
    Entry {
        name: "orchestrator",
        rank: 1,
        ports: &[PortSource::Configured(PortKey::Api)],
        probe: Some(("/health", PortSource::Configured(PortKey::Api))),
        data_mount: true,
    },
    Entry {
        name: "console",
        rank: 2,
        ports: &[PortSource::Fixed(3000)],
        probe: Some(("/", PortSource::Fixed(3000))),
        data_mount: false,
    },
    Entry {
        name: "health-probe",
        rank: 3,
        ports: &[PortSource::Fixed(9100)],
        probe: Some(("/healthz", PortSource::Fixed(9100))),
        data_mount: false,
    },
    Entry {
        name: "gateway",
        rank: 4,
        ports: &[
            PortSource::Configured(PortKey::Http),
            PortSource::Configured(PortKey::Https),
        ],
        probe: Some(("/", PortSource::Configured(PortKey::Http))),
        data_mount: false,
    },
    Entry {
        name: "backup-agent",
        rank: 5,
        ports: &[],
        probe: None,
        data_mount: true,
    },
];

/// The inventory of the current release.
pub fn default_inventory() -> Result<Inventory, InventoryError> {
    let mut services = Vec::with_capacity(ENTRIES.len());
    for entry in &ENTRIES {
        services.push(descriptor(entry)?);
    }
    Inventory::new(services)
}

fn descriptor(entry: &Entry) -> Result<ServiceDescriptor, InventoryError> {
    let name = ServiceName::new(entry.name)
        .map_err(|e| InventoryError::Invalid(format!("{}: {}", entry.name, e)))?;
    let image = ImageRef::parse(&format!("{}/{}:{}", IMAGE_REGISTRY, entry.name, RELEASE))
        .map_err(|e| InventoryError::Invalid(format!("{}: {}", entry.name, e)))?;

    let volumes = if entry.data_mount {
        vec![VolumeSpec {
            source: entry.name.to_string(),
            target: "/data".to_string(),
            read_only: false,
        }]
    } else {
        Vec::new()
    };

    let probe = match entry.probe {
        Some((path, port)) => ProbeKind::Http {
            path: path.to_string(),
            port,
        },
        None => ProbeKind::Process,
    };

    Ok(ServiceDescriptor {
        name,
        rank: entry.rank,
        ports: entry.ports.to_vec(),
        probe,
        activation: Activation {
            container: Some(ContainerSpec {
                image,
                command: None,
                env: BTreeMap::new(),
                volumes,
            }),
            binary: Some(BinarySpec {
                executable: PathBuf::from(BIN_DIR).join(entry.name),
                build: None,
                workdir: None,
                args: Vec::new(),
            }),
        },
    })
}
