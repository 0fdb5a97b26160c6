//! Configuration management for pubnotice using the prefer crate.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::browser::BrowserEngineConfig;
use crate::extraction::LlmConfig;
use crate::scrapers::{
    OrchestratorConfig, PacingConfig, SearchConfig, SiteProfile, StarTribuneConfig, TimingConfig,
};
use crate::solver::SolverConfig;
use crate::storage::DEFAULT_RELEASE_EVERY;
use crate::vpn::VpnConfig;

/// Where CSV output goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory. Relative paths resolve against the config file.
    #[serde(default = "default_output_dir")]
    pub dir: String,
    /// Release browser memory every this many saved rows (0 disables).
    #[serde(default = "default_release_every")]
    pub release_every: u64,
}

fn default_output_dir() -> String {
    "csvs".to_string()
}

fn default_release_every() -> u64 {
    DEFAULT_RELEASE_EVERY
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            release_every: default_release_every(),
        }
    }
}

impl OutputConfig {
    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `PUBNOTICE_OUTPUT_DIR`: output directory
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("PUBNOTICE_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.dir = dir;
            }
        }
        self
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserEngineConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub timings: TimingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    /// 2captcha settings. The key usually comes from the environment.
    #[serde(default)]
    pub solver: SolverConfig,
    /// Language model settings for field extraction.
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub vpn: VpnConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers pubnotice config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("pubnotice").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::warn!("Ignoring config {}: {}", path.display(), e);
                            Self::default_with_env()
                        }
                    }
                } else {
                    Self::default_with_env()
                }
            }
            // No config file found
            Err(_) => Self::default_with_env(),
        }
    }

    /// Defaults with environment variable overrides applied.
    pub fn default_with_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let mut config = Self::parse(&contents, path)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config.with_env_overrides())
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, String> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        match ext {
            "toml" => {
                toml::from_str(contents).map_err(|e| format!("Failed to parse TOML config: {}", e))
            }
            "yaml" | "yml" => serde_yaml::from_str(contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e)),
            _ => serde_json::from_str(contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e)),
        }
    }

    /// Apply environment variable overrides to every section.
    pub fn with_env_overrides(mut self) -> Self {
        self.browser = self.browser.with_env_overrides();
        self.solver = self.solver.with_env_overrides();
        self.llm = self.llm.with_env_overrides();
        self.vpn = self.vpn.with_env_overrides();
        self.output = self.output.with_env_overrides();
        self
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to the config file, or the CWD without one
    pub fn resolve_path(&self, path_str: &str) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            match self.base_dir() {
                Some(base) => base.join(path),
                None => path.to_path_buf(),
            }
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve_path(&self.output.dir)
    }

    /// Engine settings for the notice portal.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::new(self.output_dir());
        config.profile = SiteProfile::mn_public_notice();
        config.timings = self.timings.clone();
        config.pacing = self.pacing.clone();
        config.per_page = self.search.per_page;
        config.release_every = self.output.release_every;
        config.solver_timeout = self.solver.timeout_duration();
        config
    }

    /// Settings for the classifieds source.
    pub fn star_tribune_config(&self) -> StarTribuneConfig {
        let mut config = StarTribuneConfig::new(self.output_dir());
        config.release_every = self.output.release_every;
        config.extraction_timeout = self.timings.extraction_timeout();
        config
    }
}
