use anyhow::{Context, Result};
use pgcdc_runner::{RunnerConfig, SlotConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

fn default_port() -> u16 {
    5432
}

/// The sibling `database:` block (SPEC_FULL §6): this crate has no other
/// configuration store to draw connection parameters from, so the YAML file
/// that describes slots also carries them.
#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl DatabaseConfig {
    pub fn connection_string(&self) -> String {
        let mut parts = vec![
            format!("host={}", resolve_env(&self.host)),
            format!("port={}", self.port),
            format!("dbname={}", resolve_env(&self.database)),
            format!("user={}", resolve_env(&self.username)),
        ];
        if let Some(password) = &self.password {
            parts.push(format!("password={}", resolve_env(password)));
        }
        parts.join(" ")
    }
}

/// Top-level YAML document: a `database` block and the `slots` map
/// described by SPEC_FULL §4.7.
#[derive(Debug, Deserialize)]
pub struct CliConfig {
    pub database: DatabaseConfig,
    pub slots: HashMap<String, SlotConfig>,
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<CliConfig> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: CliConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn into_runner_config(self) -> RunnerConfig {
        RunnerConfig { connection_string: self.database.connection_string(), slots: self.slots }
    }
}

/// Resolves `${VAR}` placeholders against the process environment. Missing
/// variables resolve to an empty string rather than failing, matching the
/// textual-substitution idiom this is grounded on.
pub fn resolve_env(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
        } else {
            break;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn resolve_env_substitutes_known_and_blanks_unknown_vars() {
        std::env::set_var("PGCDC_CFG_TEST_HOST", "db.internal");
        std::env::remove_var("PGCDC_CFG_TEST_MISSING");

        assert_eq!(resolve_env("${PGCDC_CFG_TEST_HOST}"), "db.internal");
        assert_eq!(resolve_env("prefix_${PGCDC_CFG_TEST_HOST}_suffix"), "prefix_db.internal_suffix");
        assert_eq!(resolve_env("${PGCDC_CFG_TEST_MISSING}"), "");
        assert_eq!(resolve_env("no_vars_here"), "no_vars_here");

        std::env::remove_var("PGCDC_CFG_TEST_HOST");
    }

    #[test]
    #[serial_test::serial]
    fn loads_slots_and_builds_connection_string() {
        std::env::set_var("PGCDC_CFG_TEST_PASSWORD", "s3cret");
        let yaml = r#"
database:
  host: localhost
  port: 5433
  database: app
  username: app_user
  password: ${PGCDC_CFG_TEST_PASSWORD}
slots:
  orders:
    watcher: record
    publications: ["orders_pub"]
"#;
        let config: CliConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.slots.len(), 1);
        assert_eq!(config.slots["orders"].worker, "default");

        let runner_config = config.into_runner_config();
        assert!(runner_config.connection_string.contains("host=localhost"));
        assert!(runner_config.connection_string.contains("port=5433"));
        assert!(runner_config.connection_string.contains("password=s3cret"));

        std::env::remove_var("PGCDC_CFG_TEST_PASSWORD");
    }
}
