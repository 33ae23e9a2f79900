// ABOUTME: Config scaffolding for new hosts.
// ABOUTME: Writes a commented shipwright.yml template.

use std::path::{Path, PathBuf};

use super::{CONFIG_FILENAME, ConfigError, StrategyKind};

pub fn init_config(
    dir: &Path,
    domain: Option<&str>,
    admin_email: Option<&str>,
    strategy: Option<StrategyKind>,
    force: bool,
) -> Result<PathBuf, ConfigError> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(ConfigError::AlreadyExists(config_path));
    }

    let yaml = template_yaml(
        domain.unwrap_or("example.org"),
        admin_email.unwrap_or("admin@example.org"),
        strategy.unwrap_or(StrategyKind::Container),
    );
    std::fs::write(&config_path, yaml).map_err(|source| ConfigError::Write {
        path: config_path.clone(),
        source,
    })?;

    Ok(config_path)
}

fn template_yaml(domain: &str, admin_email: &str, strategy: StrategyKind) -> String {
    format!(
        r#"domain: {domain}
admin_email: {admin_email}
strategy: {strategy}

ports:
  http: 80
  https: 443
  api: 8082
tls: false

# resources:
#   memory: 2g
#   cpus: 1.5

backup:
  enabled: true
  retention_days: 7

# Generated on each deploy when unset. Use ${{VAR}} to read it from the environment.
# signing_secret: ${{SHIPWRIGHT_SIGNING_SECRET}}

# health:
#   attempts: 12
#   interval: 5s
#   threshold: 0.5
"#
    )
}
