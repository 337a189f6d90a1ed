use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI configuration.
///
/// Layered lowest to highest: built-in defaults, an optional TOML file,
/// `FACEMATCH_*` environment variables, then command-line flags (applied by
/// the caller).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root of all per-scope storage (people folders and caches).
    pub data_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Euclidean distance below which a face counts as identified. `None`
    /// defers to the extractor's recommended threshold.
    pub match_threshold: Option<f32>,
    /// Length of the diagnostic candidate list.
    pub top_n: usize,
    /// Gallery owner; `None` selects the global gallery.
    pub user: Option<String>,
}

/// Keys accepted in the TOML file. All optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    match_threshold: Option<f32>,
    top_n: Option<usize>,
    user: Option<String>,
}

impl Config {
    /// Load from `path` (or `$FACEMATCH_CONFIG`) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("FACEMATCH_CONFIG").map(PathBuf::from));

        let file = match path {
            Some(p) => {
                let text = std::fs::read_to_string(&p)
                    .with_context(|| format!("reading config file {}", p.display()))?;
                let parsed: FileConfig = toml::from_str(&text)
                    .with_context(|| format!("parsing config file {}", p.display()))?;
                tracing::debug!(path = %p.display(), "config file loaded");
                parsed
            }
            None => FileConfig::default(),
        };

        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = env("FACEMATCH_DATA_DIR")
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or_else(|| default_data_dir(&env));

        let model_dir = env("FACEMATCH_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(|| data_dir.join("models"));

        let match_threshold = parse_env(&env, "FACEMATCH_MATCH_THRESHOLD").or(file.match_threshold);

        let top_n = parse_env(&env, "FACEMATCH_TOP_N").or(file.top_n).unwrap_or(5);

        let user = env("FACEMATCH_USER")
            .filter(|u| !u.is_empty())
            .or(file.user);

        Self {
            data_dir,
            model_dir,
            match_threshold,
            top_n,
            user,
        }
    }
}

/// `$XDG_DATA_HOME/facematch`, else `~/.local/share/facematch`.
fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facematch")
}

/// Unparseable values are ignored so the next layer down applies.
fn parse_env<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring malformed environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(FileConfig::default(), env_of(&[("HOME", "/home/ana")]));
        assert_eq!(config.data_dir, PathBuf::from("/home/ana/.local/share/facematch"));
        assert_eq!(config.model_dir, PathBuf::from("/home/ana/.local/share/facematch/models"));
        assert_eq!(config.match_threshold, None);
        assert_eq!(config.top_n, 5);
        assert_eq!(config.user, None);
    }

    #[test]
    fn test_xdg_data_home() {
        let config = Config::resolve(FileConfig::default(), env_of(&[("XDG_DATA_HOME", "/xdg")]));
        assert_eq!(config.data_dir, PathBuf::from("/xdg/facematch"));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file: FileConfig = toml::from_str(
            r#"
            data_dir = "/srv/faces"
            match_threshold = 0.45
            top_n = 3
            user = "alice"
            "#,
        )
        .unwrap();
        let config = Config::resolve(file, env_of(&[]));
        assert_eq!(config.data_dir, PathBuf::from("/srv/faces"));
        assert_eq!(config.model_dir, PathBuf::from("/srv/faces/models"));
        assert_eq!(config.match_threshold, Some(0.45));
        assert_eq!(config.top_n, 3);
        assert_eq!(config.user.as_deref(), Some("alice"));
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str("match_threshold = 0.45\nuser = \"alice\"").unwrap();
        let config = Config::resolve(
            file,
            env_of(&[
                ("FACEMATCH_MATCH_THRESHOLD", "0.5"),
                ("FACEMATCH_USER", "bob"),
                ("FACEMATCH_MODEL_DIR", "/opt/models"),
            ]),
        );
        assert_eq!(config.match_threshold, Some(0.5));
        assert_eq!(config.user.as_deref(), Some("bob"));
        assert_eq!(config.model_dir, PathBuf::from("/opt/models"));
    }

    #[test]
    fn test_malformed_env_falls_back() {
        let file: FileConfig = toml::from_str("top_n = 7").unwrap();
        let config = Config::resolve(
            file,
            env_of(&[("FACEMATCH_TOP_N", "lots"), ("FACEMATCH_MATCH_THRESHOLD", "")]),
        );
        assert_eq!(config.top_n, 7);
        assert_eq!(config.match_threshold, None);
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(toml::from_str::<FileConfig>("treshold = 0.5").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facematch.toml");
        std::fs::write(&path, "top_n = 9\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.top_n, 9);

        assert!(Config::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
