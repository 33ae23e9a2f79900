// ABOUTME: Resolves layered sources into one validated configuration snapshot.
// ABOUTME: Expands ${VAR} placeholders and generates a missing signing secret.

use super::layer::ConfigLayer;
use super::{
    BackupPolicy, Config, ConfigError, HealthPolicy, MIN_SECRET_LEN, Paths, PhaseTimeouts,
    Ports, PreflightPolicy, ResourceLimits, Secret,
};
use std::path::{Path, PathBuf};

/// The non-default layers of one run.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Persisted configuration file, if one was found.
    pub file: Option<ConfigLayer>,
    /// Explicit overrides (environment and command line), highest priority.
    pub overrides: ConfigLayer,
}

impl ConfigSources {
    /// Gather sources the way the CLI does: an explicit or discovered file,
    /// `SHIPWRIGHT_*` variables, then `key=value` pairs on top.
    pub fn gather(
        dir: &Path,
        explicit_file: Option<&Path>,
        pairs: &[String],
    ) -> Result<Self, ConfigError> {
        let file = match explicit_file {
            Some(path) => Some(ConfigLayer::load(path)?),
            None => Config::discover_file(dir)
                .map(|path| ConfigLayer::load(&path))
                .transpose()?,
        };
        let overrides = ConfigLayer::from_pairs(pairs)?.or(ConfigLayer::from_env()?);
        Ok(ConfigSources { file, overrides })
    }
}

pub struct ConfigResolver;

impl ConfigResolver {
    /// Resolve against the process environment.
    pub fn resolve(sources: &ConfigSources) -> Result<Config, ConfigError> {
        Self::resolve_with(sources, |name| std::env::var(name).ok())
    }

    /// Resolve with an explicit variable lookup for `${VAR}` placeholders.
    pub fn resolve_with<F>(sources: &ConfigSources, lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let merged = sources
            .overrides
            .clone()
            .or(sources.file.clone().unwrap_or_default())
            .or(ConfigLayer::defaults());

        let domain = expand(&lookup, "domain", &required("domain", merged.domain)?)?;
        if domain.is_empty() || domain.chars().any(char::is_whitespace) {
            return Err(ConfigError::invalid(format!("domain is not a host name: {:?}", domain)));
        }

        let admin_email = expand(&lookup, "admin_email", &required("admin_email", merged.admin_email)?)?;
        if !admin_email.contains('@') {
            return Err(ConfigError::invalid(format!(
                "admin_email is not an address: {:?}",
                admin_email
            )));
        }

        let ports = Ports {
            http: enabled_port(merged.ports.http),
            https: enabled_port(merged.ports.https),
            api: enabled_port(merged.ports.api),
        };
        check_ports(&ports)?;

        let tls = required("tls", merged.tls)?;
        if tls && ports.https.is_none() {
            return Err(ConfigError::invalid("tls is enabled but the https port is disabled"));
        }

        let signing_secret = match merged.signing_secret {
            Some(raw) => {
                let value = expand(&lookup, "signing_secret", &raw)?;
                if value.len() < MIN_SECRET_LEN {
                    return Err(ConfigError::invalid(format!(
                        "signing_secret must be at least {} characters",
                        MIN_SECRET_LEN
                    )));
                }
                Secret::new(value)
            }
            None => {
                tracing::debug!("no signing secret configured, generating one");
                Secret::generate()
            }
        };

        let paths = Paths {
            data_dir: absolute("data_dir", merged.data_dir)?,
            state_dir: absolute("state_dir", merged.state_dir)?,
            unit_dir: absolute("unit_dir", merged.unit_dir)?,
        };

        let h = merged.health;
        let health = HealthPolicy {
            attempts: required("health.attempts", h.attempts)?,
            interval: required("health.interval", h.interval)?,
            probe_timeout: required("health.probe_timeout", h.probe_timeout)?,
            threshold: required("health.threshold", h.threshold)?,
            mandatory: required("health.mandatory", h.mandatory)?,
            weights: required("health.weights", h.weights)?,
            max_disk_ratio: required("health.max_disk_ratio", h.max_disk_ratio)?,
            max_memory_ratio: required("health.max_memory_ratio", h.max_memory_ratio)?,
            max_log_errors: required("health.max_log_errors", h.max_log_errors)?,
            log_tail_lines: required("health.log_tail_lines", h.log_tail_lines)?,
        };
        health.validate().map_err(ConfigError::Invalid)?;

        let p = merged.preflight;
        let preflight = PreflightPolicy {
            min_disk: required("preflight.min_disk", p.min_disk)?,
            min_memory: required("preflight.min_memory", p.min_memory)?,
            required_commands: required("preflight.required_commands", p.required_commands)?,
            connectivity_targets: required(
                "preflight.connectivity_targets",
                p.connectivity_targets,
            )?,
            connect_timeout: required("preflight.connect_timeout", p.connect_timeout)?,
        };

        let timeouts = PhaseTimeouts {
            install: required("timeouts.install", merged.timeouts.install)?,
            execute: required("timeouts.execute", merged.timeouts.execute)?,
        };

        Ok(Config {
            domain,
            admin_email,
            ports,
            tls,
            resources: ResourceLimits {
                memory: merged.resources.memory,
                cpus: merged.resources.cpus,
            },
            backup: BackupPolicy {
                enabled: required("backup.enabled", merged.backup.enabled)?,
                retention_days: required("backup.retention_days", merged.backup.retention_days)?,
            },
            signing_secret,
            strategy: required("strategy", merged.strategy)?,
            paths,
            health,
            preflight,
            timeouts,
        })
    }
}

fn required<T>(field: &str, value: Option<T>) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::invalid(format!("{} is required", field)))
}

fn enabled_port(port: Option<u16>) -> Option<u16> {
    port.filter(|p| *p != 0)
}

fn check_ports(ports: &Ports) -> Result<(), ConfigError> {
    let enabled = ports.enabled();
    if enabled.is_empty() {
        return Err(ConfigError::invalid("at least one port must be exposed"));
    }
    for (i, (key, port)) in enabled.iter().enumerate() {
        if let Some((other, _)) = enabled[i + 1..].iter().find(|(_, p)| p == port) {
            return Err(ConfigError::invalid(format!(
                "port {} is configured for both {} and {}",
                port, key, other
            )));
        }
    }
    Ok(())
}

fn absolute(field: &str, path: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    let path = required(field, path)?;
    if !path.is_absolute() {
        return Err(ConfigError::invalid(format!(
            "{} must be an absolute path: {}",
            field,
            path.display()
        )));
    }
    Ok(path)
}

/// Expand `${VAR}` and `${VAR:-default}` references.
fn expand<F>(lookup: &F, field: &str, raw: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            ConfigError::invalid(format!("unterminated placeholder in {}", field))
        })?;
        let expr = &after[..end];
        let (name, default) = match expr.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (expr, None),
        };
        let value = lookup(name)
            .or_else(|| default.map(str::to_string))
            .ok_or_else(|| {
                ConfigError::invalid(format!("unresolved placeholder ${{{}}} in {}", name, field))
            })?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(pairs: &[&str]) -> ConfigSources {
        ConfigSources {
            file: None,
            overrides: ConfigLayer::from_pairs(pairs).unwrap(),
        }
    }

    const BASE: [&str; 2] = ["domain=example.org", "admin_email=ops@example.org"];

    #[test]
    fn placeholders_expand_from_lookup() {
        let lookup = |name: &str| (name == "SITE").then(|| "site.example".to_string());
        assert_eq!(expand(&lookup, "domain", "${SITE}").unwrap(), "site.example");
        assert_eq!(
            expand(&lookup, "domain", "api.${SITE}").unwrap(),
            "api.site.example"
        );
        assert_eq!(
            expand(&lookup, "domain", "${MISSING:-fallback.org}").unwrap(),
            "fallback.org"
        );
        let err = expand(&lookup, "domain", "${MISSING}").unwrap_err();
        assert!(err.to_string().contains("unresolved placeholder ${MISSING}"));
        assert!(expand(&lookup, "domain", "${SITE").is_err());
    }

    #[test]
    fn missing_domain_is_invalid() {
        let err = ConfigResolver::resolve_with(&sources(&["admin_email=a@b.c"]), |_| None)
            .unwrap_err();
        assert!(err.to_string().contains("domain is required"));
    }

    #[test]
    fn colliding_ports_are_invalid() {
        let mut pairs = BASE.to_vec();
        pairs.push("ports.api=80");
        let err = ConfigResolver::resolve_with(&sources(&pairs), |_| None).unwrap_err();
        assert!(err.to_string().contains("port 80"));
    }

    #[test]
    fn all_ports_disabled_is_invalid() {
        let mut pairs = BASE.to_vec();
        pairs.extend(["ports.http=0", "ports.https=0", "ports.api=0"]);
        let err = ConfigResolver::resolve_with(&sources(&pairs), |_| None).unwrap_err();
        assert!(err.to_string().contains("at least one port"));
    }

    #[test]
    fn tls_requires_https() {
        let mut pairs = BASE.to_vec();
        pairs.extend(["tls=true", "ports.https=0"]);
        assert!(ConfigResolver::resolve_with(&sources(&pairs), |_| None).is_err());
    }

    #[test]
    fn short_secret_is_rejected_and_missing_secret_generated() {
        let mut pairs = BASE.to_vec();
        pairs.push("signing_secret=short");
        assert!(ConfigResolver::resolve_with(&sources(&pairs), |_| None).is_err());

        let config = ConfigResolver::resolve_with(&sources(&BASE), |_| None).unwrap();
        assert_eq!(config.signing_secret.len(), 64);
    }

    #[test]
    fn relative_paths_are_rejected() {
        let mut pairs = BASE.to_vec();
        pairs.push("data_dir=relative/dir");
        assert!(ConfigResolver::resolve_with(&sources(&pairs), |_| None).is_err());
    }
}
