use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::info;

use crate::error::{AppError, Context, Result};

use super::{validator, ScreenerConfig};

/// Load the JSON config from `path`, next to the executable, or the working directory.
///
/// A missing file yields the built-in defaults; an unreadable or invalid one is an error.
pub fn load_config(path: &Path) -> Result<ScreenerConfig> {
    let config = match find_config(path)? {
        Some((found, contents)) => {
            let config: ScreenerConfig = serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse config JSON at {}", found.display()))?;
            info!("loaded configuration from {}", found.display());
            config
        }
        None => {
            info!(
                "no configuration found at {}; using built-in defaults",
                path.display()
            );
            ScreenerConfig::default()
        }
    };

    validator::validate_config(&config)?;
    Ok(config)
}

fn find_config(path: &Path) -> Result<Option<(PathBuf, String)>> {
    for candidate in search_paths(path) {
        match fs::read_to_string(&candidate) {
            Ok(contents) => return Ok(Some((candidate, contents))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                let context = format!("failed to read config file {}", candidate.display());
                return Err(AppError::Other(anyhow::Error::new(err).context(context)));
            }
        }
    }
    Ok(None)
}

fn search_paths(path: &Path) -> Vec<PathBuf> {
    let mut paths = vec![path.to_path_buf()];
    if path.is_relative() {
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            paths.push(dir.join(path));
        }
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join(path));
        }
    }
    paths.dedup();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config(&dir.path().join("absent.json")).expect("defaults");
        assert_eq!(config.history.max_entries, 20);
        assert!(config.provider.endpoint.contains("{symbol}"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("screener.json");
        let mut file = fs::File::create(&path).expect("create");
        write!(
            file,
            r#"{{"scan":{{"batchCap":5}},"cache":{{"ttlSecs":null}},"filters":{{"minUpside":10}}}}"#
        )
        .expect("write");

        let config = load_config(&path).expect("config loads");
        assert_eq!(config.scan.batch_cap, Some(5));
        assert_eq!(config.cache.ttl_secs, None);
        assert_eq!(config.filters.min_upside, Some(10.0));
        assert_eq!(config.provider.max_attempts, 3);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("screener.json");
        fs::write(&path, "{ not json").expect("write");

        let err = load_config(&path).expect_err("parse fails");
        assert!(err.to_string().contains("failed to parse"), "unexpected: {err}");
    }
}
