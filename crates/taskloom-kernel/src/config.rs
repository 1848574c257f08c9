//! Configuration loading from `~/.taskloom/config.toml` with defaults, and
//! workflow pattern files (`.toml` or `.json`).

use crate::error::{KernelError, KernelResult};
use std::path::{Path, PathBuf};
use taskloom_types::config::KernelConfig;
use taskloom_types::error::TaskloomError;
use taskloom_types::workflow::WorkflowPattern;
use tracing::{info, warn};

/// Load kernel configuration from a TOML file, with defaults.
///
/// A missing, unreadable, or malformed file is logged and replaced by
/// `KernelConfig::default()`.
pub fn load_config(path: Option<&Path>) -> KernelConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return KernelConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<KernelConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                KernelConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            KernelConfig::default()
        }
    }
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    taskloom_home().join("config.toml")
}

/// Get the default Taskloom home directory.
pub fn taskloom_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".taskloom")
}

/// Parse a single pattern file. The format follows the extension.
pub fn load_pattern_file(path: &Path) -> KernelResult<WorkflowPattern> {
    let contents = std::fs::read_to_string(path).map_err(TaskloomError::from)?;
    let parsed = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str::<WorkflowPattern>(&contents).map_err(|e| e.to_string()),
        Some("json") => {
            serde_json::from_str::<WorkflowPattern>(&contents).map_err(|e| e.to_string())
        }
        _ => {
            return Err(TaskloomError::Config(format!(
                "unsupported pattern file extension: {}",
                path.display()
            ))
            .into())
        }
    };
    parsed.map_err(|e| {
        KernelError::Taskloom(TaskloomError::Serialization(format!(
            "{}: {e}",
            path.display()
        )))
    })
}

/// Load every `.toml` and `.json` pattern in `dir`, sorted by file name.
///
/// Files that fail to parse are logged and skipped; an unreadable directory
/// is an error.
pub fn load_patterns_dir(dir: &Path) -> KernelResult<Vec<WorkflowPattern>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(TaskloomError::from)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("toml") | Some("json")
                )
        })
        .collect();
    paths.sort();

    let mut patterns = Vec::with_capacity(paths.len());
    for path in paths {
        match load_pattern_file(&path) {
            Ok(pattern) => patterns.push(pattern),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable pattern file"),
        }
    }
    info!(dir = %dir.display(), count = patterns.len(), "Loaded workflow patterns");
    Ok(patterns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PATTERN_TOML: &str = r#"
name = "brief"
expected_artifacts = ["summary"]

[[steps]]
step_id = "summarize"
agent_type = "writer"
objective_template = "Summarize {{topic}}"
group_id = "main"
output_artifacts = ["summary"]
"#;

    #[test]
    fn test_load_config_missing_file() {
        let config = load_config(Some(Path::new("/nonexistent/config.toml")));
        assert_eq!(config, KernelConfig::default());
    }

    #[test]
    fn test_load_config_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "log_level = \"debug\"").unwrap();
        writeln!(f, "[retry]").unwrap();
        writeln!(f, "max_retries = 0").unwrap();
        writeln!(f, "[circuit_breaker]").unwrap();
        writeln!(f, "enabled = false").unwrap();
        drop(f);

        let config = load_config(Some(&path));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.retry.hard_timeout_ms, 120_000);
        assert!(!config.circuit_breaker.enabled);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_load_config_invalid_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "log_level = [not toml").unwrap();
        let config = load_config(Some(&path));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_default_config_path_under_home() {
        let path = default_config_path();
        assert!(path.ends_with(".taskloom/config.toml"));
    }

    #[test]
    fn test_load_pattern_file_toml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("brief.toml");
        std::fs::write(&toml_path, PATTERN_TOML).unwrap();
        let from_toml = load_pattern_file(&toml_path).unwrap();
        assert_eq!(from_toml.name, "brief");
        assert_eq!(from_toml.steps[0].output_artifacts, vec!["summary".to_string()]);

        let json_path = dir.path().join("brief.json");
        std::fs::write(&json_path, serde_json::to_string(&from_toml).unwrap()).unwrap();
        assert_eq!(load_pattern_file(&json_path).unwrap(), from_toml);
    }

    #[test]
    fn test_load_pattern_file_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brief.yaml");
        std::fs::write(&path, "name: brief").unwrap();
        let err = load_pattern_file(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported"));
    }

    #[test]
    fn test_load_patterns_dir_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.toml"), PATTERN_TOML).unwrap();
        std::fs::write(dir.path().join("b.json"), "{ broken").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let patterns = load_patterns_dir(dir.path()).unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].name, "brief");
    }

    #[test]
    fn test_load_patterns_dir_missing() {
        assert!(load_patterns_dir(Path::new("/nonexistent/patterns")).is_err());
    }
}
