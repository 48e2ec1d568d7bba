//! Configuration loading and merging
//!
//! The global config lives at `~/.chainsaw/config.yaml` and holds named
//! profiles; a project may add a local `.config.yaml` that can only
//! narrow scope (extra includes, excludes, blacklist entries). Local
//! include paths must stay within the global include scope.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ChainsawError, Result};
use crate::filter::{resolve_relative_path, validate_includes_within_global};

pub const DEFAULT_EMBEDDING_DIM: usize = 768;

/// The main configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub version: String,
    pub active_profile: String,
    #[serde(default)]
    pub profiles: std::collections::BTreeMap<String, Profile>,
}

/// A single configuration profile
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    /// Paths to recursively index
    #[serde(default)]
    pub include: Vec<String>,
    /// Directory patterns to skip
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Reject patterns, regex over absolute paths (applied first)
    #[serde(default)]
    pub blacklist: Vec<String>,
    /// Exception patterns that override the blacklist
    #[serde(default)]
    pub whitelist: Vec<String>,

    #[serde(default)]
    pub embedding_model: String,
    #[serde(default)]
    pub chunk_size: usize,
    #[serde(default)]
    pub overlap: usize,

    /// "ollama" or "openai"; empty auto-detects from the base URL
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub llm_provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub llm_base_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub llm_api_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_driver: Option<GraphDriverConfig>,
}

/// Graph-extraction model settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDriverConfig {
    #[serde(default)]
    pub model: String,
    /// Chunks per extraction call; 0 keeps the pipeline default
    #[serde(default)]
    pub batch_size: usize,
}

/// A project-local `.config.yaml`: only scope-narrowing fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub blacklist: Vec<String>,
}

/// Final runtime configuration after merging global + local
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub blacklist: Vec<String>,
    /// Global only; local configs can never widen the whitelist
    pub whitelist: Vec<String>,

    pub embedding_model: String,
    pub chunk_size: usize,
    pub overlap: usize,
    pub llm_provider: String,
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub graph_driver: Option<GraphDriverConfig>,

    pub profile_name: String,
}

impl GlobalConfig {
    /// Built-in defaults used when no config file exists
    pub fn default_config() -> Self {
        let mut profiles = std::collections::BTreeMap::new();
        profiles.insert(
            "default".to_string(),
            Profile {
                include: vec![".".to_string()],
                exclude: Vec::new(),
                blacklist: vec![r"/\.git/".to_string()],
                whitelist: Vec::new(),
                embedding_model: "nomic-embed-text".to_string(),
                chunk_size: 512,
                overlap: 64,
                ..Profile::default()
            },
        );
        Self {
            version: "2.0".to_string(),
            active_profile: "default".to_string(),
            profiles,
        }
    }

    /// Parse a YAML config document
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| ChainsawError::Config(format!("invalid config: {}", e)))
    }

    /// Load from a path; a missing file is a Config error the caller may
    /// replace with defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ChainsawError::Config(format!("config not found at {}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    /// The active profile, when it exists
    pub fn active(&self) -> Option<&Profile> {
        self.profiles.get(&self.active_profile)
    }

    /// Merge a local config into the active profile. Local include paths
    /// resolve against the local config's own directory and must validate
    /// within the global include scope; exclude and blacklist entries
    /// append.
    pub fn merge_local(&self, local: Option<(&LocalConfig, &Path)>) -> Result<MergedConfig> {
        let profile = self.active().ok_or_else(|| {
            ChainsawError::Config(format!("active profile '{}' not found", self.active_profile))
        })?;

        let mut merged = MergedConfig {
            include: profile.include.clone(),
            exclude: profile.exclude.clone(),
            blacklist: profile.blacklist.clone(),
            whitelist: profile.whitelist.clone(),
            embedding_model: profile.embedding_model.clone(),
            chunk_size: profile.chunk_size,
            overlap: profile.overlap,
            llm_provider: profile.llm_provider.clone(),
            llm_base_url: profile.llm_base_url.clone(),
            llm_api_key: profile.llm_api_key.clone(),
            graph_driver: profile.graph_driver.clone(),
            profile_name: self.active_profile.clone(),
        };

        if let Some((local, local_dir)) = local {
            validate_includes_within_global(&local.include, &profile.include, local_dir)
                .map_err(ChainsawError::Input)?;
            for include in &local.include {
                let resolved = resolve_relative_path(local_dir, Path::new(include));
                merged.include.push(resolved.to_string_lossy().into_owned());
            }
            merged.exclude.extend(local.exclude.iter().cloned());
            merged.blacklist.extend(local.blacklist.iter().cloned());
            debug!("merged local config into profile {}", self.active_profile);
        }

        Ok(merged)
    }
}

impl LocalConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ChainsawError::io("read", path, e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ChainsawError::Config(format!("invalid local config: {}", e)))
    }
}

/// Per-user state directory, `~/.chainsaw`
pub fn state_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ChainsawError::Config("could not determine home directory".into()))?;
    Ok(home.join(".chainsaw"))
}

/// Canonical database path, `~/.chainsaw/chainsaw.db`
pub fn database_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("chainsaw.db"))
}

/// Canonical config path, `~/.chainsaw/config.yaml`
pub fn config_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version: "2.0"
active_profile: work
profiles:
  work:
    include:
      - /home/user/code
    exclude:
      - node_modules
    blacklist:
      - /\.git/
    whitelist:
      - important\.log$
    embedding_model: nomic-embed-text
    chunk_size: 512
    overlap: 64
    llm_base_url: https://openrouter.ai/v1
    llm_api_key: secret
    graph_driver:
      model: qwen2.5:3b
      batch_size: 50
"#;

    #[test]
    fn test_parse_yaml_config() {
        let config = GlobalConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.active_profile, "work");
        let profile = config.active().unwrap();
        assert_eq!(profile.include, vec!["/home/user/code"]);
        assert_eq!(profile.chunk_size, 512);
        assert_eq!(profile.graph_driver.as_ref().unwrap().batch_size, 50);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = GlobalConfig::from_yaml("{not yaml").unwrap_err();
        assert!(matches!(err, ChainsawError::Config(_)));
    }

    #[test]
    fn test_default_config_blocks_git() {
        let config = GlobalConfig::default_config();
        let profile = config.active().unwrap();
        assert!(profile.blacklist.iter().any(|p| p.contains(".git")));
        assert_eq!(profile.chunk_size, 512);
        assert_eq!(profile.overlap, 64);
    }

    #[test]
    fn test_merge_local_appends_scope() {
        let config = GlobalConfig::from_yaml(SAMPLE).unwrap();
        let local = LocalConfig {
            include: vec!["/home/user/code/project".to_string()],
            exclude: vec!["dist".to_string()],
            blacklist: vec![r"\.generated\.".to_string()],
        };

        let merged = config
            .merge_local(Some((&local, Path::new("/home/user/code/project"))))
            .unwrap();
        assert!(merged.include.contains(&"/home/user/code/project".to_string()));
        assert!(merged.exclude.contains(&"dist".to_string()));
        assert!(merged.blacklist.iter().any(|p| p.contains("generated")));
        // whitelist comes from the global profile only
        assert_eq!(merged.whitelist, vec![r"important\.log$"]);
    }

    #[test]
    fn test_merge_resolves_relative_include_against_config_dir() {
        let config = GlobalConfig::from_yaml(SAMPLE).unwrap();
        let local = LocalConfig {
            include: vec!["subdir".to_string()],
            ..LocalConfig::default()
        };

        // relative to the local .config.yaml's directory, inside the
        // global scope, so it is accepted and stored resolved
        let merged = config
            .merge_local(Some((&local, Path::new("/home/user/code/project"))))
            .unwrap();
        assert!(merged
            .include
            .contains(&"/home/user/code/project/subdir".to_string()));
    }

    #[test]
    fn test_merge_rejects_out_of_scope_include() {
        let config = GlobalConfig::from_yaml(SAMPLE).unwrap();
        let config_dir = Path::new("/home/user/code/project");

        for escape in ["/etc", "/", "../../../etc/passwd"] {
            let local = LocalConfig {
                include: vec![escape.to_string()],
                ..LocalConfig::default()
            };
            let err = config.merge_local(Some((&local, config_dir))).unwrap_err();
            assert!(matches!(err, ChainsawError::Input(_)), "{escape} accepted");
        }
    }

    #[test]
    fn test_default_dot_profile_rejects_escapes() {
        // the built-in default profile includes ".", meaning the current
        // directory, which must not act as a match-everything root
        let config = GlobalConfig::default_config();
        let cwd = std::env::current_dir().unwrap();

        for escape in ["/etc", "/"] {
            let local = LocalConfig {
                include: vec![escape.to_string()],
                ..LocalConfig::default()
            };
            let err = config.merge_local(Some((&local, cwd.as_path()))).unwrap_err();
            assert!(matches!(err, ChainsawError::Input(_)), "{escape} accepted");
        }

        let local = LocalConfig {
            include: vec![cwd.join("src").to_string_lossy().into_owned()],
            ..LocalConfig::default()
        };
        assert!(config.merge_local(Some((&local, cwd.as_path()))).is_ok());
    }

    #[test]
    fn test_merge_missing_profile_errors() {
        let mut config = GlobalConfig::from_yaml(SAMPLE).unwrap();
        config.active_profile = "missing".to_string();
        assert!(matches!(
            config.merge_local(None),
            Err(ChainsawError::Config(_))
        ));
    }
}
