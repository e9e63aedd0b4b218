use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for pymirror
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Root directory of the on-disk mirror
    pub mirror_root: String,

    /// Store path; defaults to `<mirror_root>/pymirror.db`
    pub database: Option<String>,

    /// Base URL of the upstream index API
    #[serde(default = "default_index_url")]
    pub index_url: String,

    /// Base URL artifacts are served from; on-disk paths mirror the URL
    /// path below this base
    #[serde(default = "default_files_url")]
    pub files_url: String,

    /// Network behavior settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Release selection policy
    #[serde(default)]
    pub selection: SelectionConfig,

    /// Exclusion rule lists for the blacklist resolver
    #[serde(default)]
    pub rules: RuleConfig,

    /// Operator whitelist: `name` or `name==version` entries that are
    /// always mirrored, overriding the blacklist
    #[serde(default)]
    pub whitelist: Vec<String>,
}

/// Network behavior settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NetworkConfig {
    /// Timeout for any single upstream request, in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Release selection policy
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SelectionConfig {
    /// Keep only the N most recent versions of each package; 0 or
    /// negative disables the filter
    #[serde(default = "default_keep_latest")]
    pub keep_latest: i64,

    /// Platforms whose binary artifacts are not mirrored
    /// (windows / macos / freebsd / linux)
    #[serde(default = "default_platforms")]
    pub exclude_platforms: Vec<String>,
}

/// Exclusion rule lists. Name patterns use SQL LIKE `%` wildcards.
/// An empty list disables that rule.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RuleConfig {
    /// Packages too large or updated too frequently to mirror
    #[serde(default = "default_oversized")]
    pub oversized: Vec<String>,

    /// Known-threat packages, matched exactly
    #[serde(default = "default_threats")]
    pub threats: Vec<String>,

    /// Low-value-offline or malformed packages
    #[serde(default = "default_low_value")]
    pub low_value: Vec<String>,

    /// Framework ecosystems excluded wholesale
    #[serde(default = "default_frameworks")]
    pub frameworks: Vec<FrameworkRule>,
}

/// One excluded framework ecosystem: packages match by classifier
/// pattern or by name prefix.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FrameworkRule {
    /// Human label used in diagnostics
    pub label: String,
    /// Classifier LIKE pattern, e.g. "Framework :: Django"
    pub classifier: String,
    /// Name prefixes, e.g. ["django"]
    #[serde(default)]
    pub name_prefixes: Vec<String>,
}

// Default value functions
fn default_index_url() -> String {
    "https://pypi.org".to_string()
}
fn default_files_url() -> String {
    "https://files.pythonhosted.org".to_string()
}
fn default_timeout() -> u64 {
    30
}
fn default_keep_latest() -> i64 {
    3
}
fn default_platforms() -> Vec<String> {
    vec!["windows".into(), "macos".into(), "freebsd".into()]
}

fn default_oversized() -> Vec<String> {
    ["cupy", "cupy-%", "mxnet", "mxnet-%", "tf-nightly%"]
        .map(String::from)
        .to_vec()
}

fn default_threats() -> Vec<String> {
    [
        "Cuckoo",
        "secret_miner",
        "androwarn",
        "thug",
        "gpgmailencrypt",
        "crackmapexec",
        "babysploit",
        "vxstreamlib",
        "jabbercracky",
        "test-typo-pypi",
    ]
    .map(String::from)
    .to_vec()
}

fn default_low_value() -> Vec<String> {
    [
        "aws%",
        "azure%",
        "cmsplugin%",
        "github%",
        "google-cloud%",
        "mastercard%",
        "aliyun%",
        "nester%",
        "raptus%",
        "0",
        "0-core-client",
    ]
    .map(String::from)
    .to_vec()
}

fn default_frameworks() -> Vec<FrameworkRule> {
    vec![
        FrameworkRule {
            label: "Plone".into(),
            classifier: "Framework :: Plone%".into(),
            name_prefixes: vec!["Products.".into(), "collective.".into()],
        },
        FrameworkRule {
            label: "Django".into(),
            classifier: "Framework :: Django".into(),
            name_prefixes: vec!["django".into()],
        },
        FrameworkRule {
            label: "Odoo".into(),
            classifier: "Framework :: Odoo".into(),
            name_prefixes: vec!["odoo".into()],
        },
    ]
}

// Default implementations
impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            keep_latest: default_keep_latest(),
            exclude_platforms: default_platforms(),
        }
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            oversized: default_oversized(),
            threats: default_threats(),
            low_value: default_low_value(),
            frameworks: default_frameworks(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mirror_root: "${HOME}/data/pypi".to_string(),
            database: None,
            index_url: default_index_url(),
            files_url: default_files_url(),
            network: NetworkConfig::default(),
            selection: SelectionConfig::default(),
            rules: RuleConfig::default(),
            whitelist: Vec::new(),
        }
    }
}

const KNOWN_PLATFORMS: &[&str] = &["windows", "win", "macos", "macosx", "freebsd", "linux"];

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }
            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;
        Ok(config_dir.join("pymirror").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.mirror_root = shellexpand::full(&self.mirror_root)
            .context("Failed to expand mirror_root path")?
            .into_owned();

        if let Some(db) = &self.database {
            self.database = Some(
                shellexpand::full(db)
                    .context("Failed to expand database path")?
                    .into_owned(),
            );
        }

        Ok(())
    }

    /// Resolved store path.
    pub fn database_path(&self) -> PathBuf {
        match &self.database {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.mirror_root).join("pymirror.db"),
        }
    }

    /// Per-request network timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.network.timeout_secs)
    }

    /// Validate policy settings. A misconfigured filter or rule is
    /// disabled, never fatal; the returned warnings are reported once at
    /// startup.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.selection.keep_latest <= 0 {
            warnings.push("keep_latest <= 0: latest-release filter disabled".to_string());
        }

        for tag in &self.selection.exclude_platforms {
            if !KNOWN_PLATFORMS.contains(&tag.to_lowercase().as_str()) {
                warnings.push(format!(
                    "unknown platform tag '{}': ignored by the platform filter",
                    tag
                ));
            }
        }

        if self.selection.exclude_platforms.is_empty() {
            warnings.push("no platform tags configured: platform filter disabled".to_string());
        }

        let empty_rules: Vec<&str> = [
            ("oversized", self.rules.oversized.is_empty()),
            ("threats", self.rules.threats.is_empty()),
            ("low_value", self.rules.low_value.is_empty()),
            ("frameworks", self.rules.frameworks.is_empty()),
        ]
        .iter()
        .filter(|(_, empty)| *empty)
        .map(|(name, _)| *name)
        .collect();

        for rule in empty_rules {
            warnings.push(format!("rule list '{}' is empty: rule disabled", rule));
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::TempDir;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.mirror_root, "${HOME}/data/pypi");
        assert_eq!(config.index_url, "https://pypi.org");
        assert_eq!(config.selection.keep_latest, 3);
        assert_eq!(config.network.timeout_secs, 30);
        assert!(config.whitelist.is_empty());
        assert!(!config.rules.oversized.is_empty());
        assert_eq!(config.rules.frameworks.len(), 3);
    }

    #[test]
    fn test_database_path_defaults_under_mirror_root() {
        let mut config = Config::default();
        config.mirror_root = "/srv/mirror".to_string();

        assert_eq!(
            config.database_path(),
            PathBuf::from("/srv/mirror/pymirror.db")
        );

        config.database = Some("/var/lib/pymirror.db".to_string());
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/pymirror.db")
        );
    }

    #[test]
    fn test_expand_paths() {
        env::set_var("TEST_PYMIRROR_HOME", "/test/home");

        let mut config = Config::default();
        config.mirror_root = "${TEST_PYMIRROR_HOME}/mirror".to_string();

        config.expand_paths().expect("Failed to expand paths");
        assert_eq!(config.mirror_root, "/test/home/mirror");

        env::remove_var("TEST_PYMIRROR_HOME");
    }

    #[test]
    fn test_validation_disables_misconfigured_filters() {
        let mut config = Config::default();
        config.selection.keep_latest = 0;
        config.selection.exclude_platforms = vec!["windows".into(), "plan9".into()];
        config.rules.threats.clear();

        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("latest-release filter")));
        assert!(warnings.iter().any(|w| w.contains("plan9")));
        assert!(warnings.iter().any(|w| w.contains("'threats'")));
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yml");

        let mut config = Config::default();
        config.mirror_root = "/custom/mirror".to_string();
        config.selection.keep_latest = 5;
        config.whitelist = vec!["numpy==1.21.0".to_string()];

        config.save(&config_path).expect("Failed to save config");
        let loaded = Config::load(&config_path).expect("Failed to load config");

        assert_eq!(loaded.mirror_root, "/custom/mirror");
        assert_eq!(loaded.selection.keep_latest, 5);
        assert_eq!(loaded.whitelist, vec!["numpy==1.21.0".to_string()]);
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml_content = r#"
mirror_root: "/srv/pypi"
index_url: "https://index.internal"
network:
  timeout_secs: 10
selection:
  keep_latest: 2
  exclude_platforms: ["windows"]
rules:
  oversized: ["tf-nightly%"]
  threats: []
  low_value: []
  frameworks:
    - label: "Django"
      classifier: "Framework :: Django"
      name_prefixes: ["django"]
whitelist:
  - "requests"
"#;

        let config: Config = serde_yaml::from_str(yaml_content).expect("Failed to parse YAML");

        assert_eq!(config.mirror_root, "/srv/pypi");
        assert_eq!(config.index_url, "https://index.internal");
        assert_eq!(config.network.timeout_secs, 10);
        assert_eq!(config.selection.keep_latest, 2);
        assert_eq!(config.selection.exclude_platforms, vec!["windows"]);
        assert_eq!(config.rules.oversized, vec!["tf-nightly%"]);
        assert!(config.rules.threats.is_empty());
        assert_eq!(config.rules.frameworks.len(), 1);
        assert_eq!(config.whitelist, vec!["requests"]);
    }

    #[test]
    fn test_config_load_nonexistent_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.yml"));
        assert!(result.is_err());
    }
}
