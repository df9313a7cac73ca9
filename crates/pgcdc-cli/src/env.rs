use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

/// Loads `.env.<name>` when `--env <name>` was passed, otherwise `.env`,
/// from the current directory (SPEC_FULL §6). A missing file is not an
/// error: the process may rely on variables already present in its
/// environment.
pub fn load_env(env: Option<&str>) -> Result<()> {
    let filename = match env {
        Some(name) => format!(".env.{name}"),
        None => ".env".to_string(),
    };
    let path = Path::new(&filename);
    if path.exists() {
        dotenvy::from_path(path).with_context(|| format!("failed to load {filename}"))?;
        info!("loaded {}", filename);
    } else {
        debug!("no {} file found, continuing without it", filename);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    #[serial_test::serial]
    fn loads_named_env_file_over_default() {
        let dir = TempDir::new().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        fs::write(dir.path().join(".env.staging"), "PGCDC_TEST_VAR=staging").unwrap();
        std::env::remove_var("PGCDC_TEST_VAR");

        load_env(Some("staging")).unwrap();
        assert_eq!(std::env::var("PGCDC_TEST_VAR").unwrap(), "staging");

        std::env::remove_var("PGCDC_TEST_VAR");
        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial_test::serial]
    fn missing_env_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        assert!(load_env(None).is_ok());

        std::env::set_current_dir(original_dir).unwrap();
    }
}
