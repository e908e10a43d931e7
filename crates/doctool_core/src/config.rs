use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILENAME: &str = "doctool.toml";
pub const DEFAULT_DOCS_URL: &str = "http://docs.mantidproject.org/";
pub const DEFAULT_ALGORITHMS_PATH: &str = "algorithms/";
pub const DEFAULT_REGISTRY_FILENAME: &str = "algorithms.json";
pub const DEFAULT_API_URL: &str = "https://www.mantidproject.org/api.php";
pub const DEFAULT_USER_AGENT: &str = "doctool/0.1";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_ROOT_PAGES: &[&str] = &[
    "Mantid_Basic_Course",
    "Introduction_To_Python",
    "Python_In_Mantid",
    "Extending_Mantid_With_Python",
];

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct DocToolConfig {
    #[serde(default)]
    pub docs: DocsSection,
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub http: HttpSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct DocsSection {
    pub url: Option<String>,
    pub algorithms_path: Option<String>,
    pub registry: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub root_pages: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HttpSection {
    pub proxy: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Effective settings after applying env > config file > default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub docs_url: String,
    pub algorithms_url: String,
    pub registry: PathBuf,
    pub api_url: String,
    pub user_agent: String,
    pub root_pages: Vec<String>,
    pub proxy: Option<String>,
    pub timeout_ms: u64,
}

impl DocToolConfig {
    /// Resolve every setting, reading overrides through `env`. Blank values are
    /// treated as unset and an unparseable timeout falls back to the file value.
    pub fn resolve(&self, env: impl Fn(&str) -> Option<String>) -> ResolvedConfig {
        let lookup = |key: &str| {
            env(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let docs_url = lookup("DOCS_URL")
            .or_else(|| self.docs.url.clone())
            .unwrap_or_else(|| DEFAULT_DOCS_URL.to_string());
        let algorithms_path = self
            .docs
            .algorithms_path
            .as_deref()
            .unwrap_or(DEFAULT_ALGORITHMS_PATH)
            .trim_matches('/');
        let mut algorithms_url = format!("{}/", docs_url.trim_end_matches('/'));
        if !algorithms_path.is_empty() {
            algorithms_url.push_str(algorithms_path);
            algorithms_url.push('/');
        }

        let root_pages = if self.wiki.root_pages.is_empty() {
            DEFAULT_ROOT_PAGES
                .iter()
                .map(|page| (*page).to_string())
                .collect()
        } else {
            self.wiki.root_pages.clone()
        };

        ResolvedConfig {
            docs_url,
            algorithms_url,
            registry: self
                .docs
                .registry
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REGISTRY_FILENAME)),
            api_url: lookup("WIKI_API_URL")
                .or_else(|| self.wiki.api_url.clone())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            user_agent: lookup("WIKI_USER_AGENT")
                .or_else(|| self.wiki.user_agent.clone())
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            root_pages,
            proxy: lookup("DOCTOOL_HTTP_PROXY").or_else(|| self.http.proxy.clone()),
            timeout_ms: lookup("DOCTOOL_HTTP_TIMEOUT_MS")
                .and_then(|value| value.parse::<u64>().ok())
                .or(self.http.timeout_ms)
                .unwrap_or(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Documentation base URL: env DOCS_URL > config > DEFAULT_DOCS_URL.
    pub fn docs_url(&self) -> String {
        self.resolve(env_override).docs_url
    }

    /// Destination prefix for algorithm pages, always ending in a slash.
    pub fn algorithms_url(&self) -> String {
        self.resolve(env_override).algorithms_url
    }

    pub fn registry_path(&self) -> PathBuf {
        self.resolve(env_override).registry
    }

    /// Wiki API URL: env WIKI_API_URL > config > DEFAULT_API_URL.
    pub fn api_url(&self) -> String {
        self.resolve(env_override).api_url
    }

    pub fn user_agent(&self) -> String {
        self.resolve(env_override).user_agent
    }

    pub fn root_pages(&self) -> Vec<String> {
        self.resolve(env_override).root_pages
    }

    /// Forward proxy for link probes: env DOCTOOL_HTTP_PROXY > config > none.
    pub fn proxy(&self) -> Option<String> {
        self.resolve(env_override).proxy
    }

    pub fn timeout_ms(&self) -> u64 {
        self.resolve(env_override).timeout_ms
    }

    pub fn diagnostics(&self) -> String {
        let resolved = self.resolve(env_override);
        [
            format!("docs_url: {}", resolved.docs_url),
            format!("algorithms_url: {}", resolved.algorithms_url),
            format!(
                "registry: {}",
                resolved.registry.to_string_lossy().replace('\\', "/")
            ),
            format!("api_url: {}", resolved.api_url),
            format!("user_agent: {}", resolved.user_agent),
            format!("root_pages: {}", resolved.root_pages.join(", ")),
            format!("proxy: {}", resolved.proxy.as_deref().unwrap_or("<none>")),
            format!("timeout_ms: {}", resolved.timeout_ms),
        ]
        .join("\n")
    }
}

/// Load and parse a DocToolConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<DocToolConfig> {
    if !config_path.exists() {
        return Ok(DocToolConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: DocToolConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_override(key: &str) -> Option<String> {
    env::var(key).ok()
}
