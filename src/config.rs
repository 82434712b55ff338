//! Configuration loading for the main file and the per-endpoint directory.
//!
//! The main file (`configs/config.yaml`) carries the listener port, optional
//! TLS material paths, and the logging block. Routing is declared in
//! `configs/endpoints/*.yaml`, one file per site, each mapping request paths
//! to a strategy, a backend pool, and quarantine rules.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use tracing::debug;
use url::Url;

use crate::error::{Result, ShuntError};

/// Logging settings from the main config
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output destination ("stdout" or a file path)
    pub output: String,
    /// Output format ("json" or "text")
    pub format: String,
}

/// Contents of the main config file
#[derive(Debug, Clone, Deserialize)]
pub struct MainConfig {
    /// Listener port
    pub port: u16,
    #[serde(default)]
    pub https_cert_path: Option<String>,
    #[serde(default)]
    pub https_key_path: Option<String>,
    pub log: LogConfig,
}

impl MainConfig {
    /// Check required fields
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(ShuntError::InvalidConfig(
                "port must be specified and non-zero".into(),
            ));
        }
        if self.log.level.is_empty() {
            return Err(ShuntError::InvalidConfig("log.level must be specified".into()));
        }
        if self.log.output.is_empty() {
            return Err(ShuntError::InvalidConfig("log.output must be specified".into()));
        }
        if self.log.format.is_empty() {
            return Err(ShuntError::InvalidConfig("log.format must be specified".into()));
        }
        Ok(())
    }
}

/// Read the main config file and validate it
pub fn load_main_config(path: impl AsRef<Path>) -> Result<MainConfig> {
    let data = fs::read_to_string(path)?;
    let cfg: MainConfig = serde_yaml::from_str(&data)?;
    cfg.validate()?;
    Ok(cfg)
}

/// A backend endpoint with optional SOCKS5 egress and selection weight
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Backend {
    /// Target URL, used verbatim as the outbound request target
    pub url: String,
    /// Optional SOCKS5 intermediary (host:port)
    #[serde(default)]
    pub socks5: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Weight for the weighted strategy; 0 excludes the backend from it
    #[serde(default)]
    pub weight: u32,
}

impl Backend {
    /// Validate the URL scheme and the credential pairing
    pub fn validate(&self) -> Result<()> {
        let parsed = Url::parse(&self.url).map_err(|e| {
            ShuntError::InvalidConfig(format!("backend URL {:?}: {}", self.url, e))
        })?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ShuntError::InvalidConfig(format!(
                    "backend URL {:?} has unsupported scheme {:?}",
                    self.url, other
                )))
            }
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(ShuntError::InvalidConfig(format!(
                "backend {:?}: username and password must be set together",
                self.url
            )));
        }
        Ok(())
    }
}

/// A quarantine rule after flattening: one token, one ban duration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanRule {
    pub token: String,
    pub duration: Duration,
}

/// One path binding after flattening and global-rule merging
#[derive(Debug, Clone)]
pub struct RouteConfig {
    pub path: String,
    pub strategy: String,
    pub backends: Vec<Backend>,
    pub rules: Vec<BanRule>,
}

/// Rule as written in config files: a token list sharing one duration
#[derive(Debug, Clone, Deserialize)]
struct RawBanRule {
    #[serde(rename = "match")]
    tokens: Vec<String>,
    /// Ban duration in seconds
    duration: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct RawRoute {
    strategy: String,
    urls: Vec<Backend>,
    #[serde(default)]
    ban: Vec<RawBanRule>,
}

/// One file from the endpoints directory
#[derive(Debug, Deserialize)]
struct EndpointFile {
    #[serde(default)]
    enabled: bool,
    #[serde(default, deserialize_with = "de_unique_paths")]
    endpoints: Vec<(String, RawRoute)>,
    #[serde(default)]
    global_ban: Vec<RawBanRule>,
}

/// Deserialize the path mapping in declaration order, rejecting duplicates
fn de_unique_paths<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<(String, RawRoute)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PathMapVisitor;

    impl<'de> Visitor<'de> for PathMapVisitor {
        type Value = Vec<(String, RawRoute)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a mapping from request path to route settings")
        }

        fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries: Vec<(String, RawRoute)> = Vec::new();
            while let Some((path, route)) = map.next_entry::<String, RawRoute>()? {
                if entries.iter().any(|(p, _)| p == &path) {
                    return Err(serde::de::Error::custom(format!(
                        "duplicate path {:?}",
                        path
                    )));
                }
                entries.push((path, route));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(PathMapVisitor)
}

/// Flatten per-path rules to one entry per token, then merge global rules.
///
/// A global token is only appended when no local rule already carries it,
/// so the local duration wins on conflicts.
fn flatten_rules(local: &[RawBanRule], global: &[RawBanRule]) -> Vec<BanRule> {
    let mut rules: Vec<BanRule> = Vec::new();
    for raw in local {
        for token in &raw.tokens {
            rules.push(BanRule {
                token: token.clone(),
                duration: Duration::from_secs(raw.duration),
            });
        }
    }
    for raw in global {
        for token in &raw.tokens {
            if !rules.iter().any(|r| r.token.eq_ignore_ascii_case(token)) {
                rules.push(BanRule {
                    token: token.clone(),
                    duration: Duration::from_secs(raw.duration),
                });
            }
        }
    }
    rules
}

/// Load every enabled endpoint file from a directory.
///
/// Directories, `config.yaml`, and files without a `.yaml` suffix are
/// ignored. Parse errors, invalid backends, and duplicate paths (within a
/// file or across files) fail the load.
pub fn load_endpoints(dir: impl AsRef<Path>) -> Result<Vec<RouteConfig>> {
    let mut routes = Vec::new();
    let mut seen: HashMap<String, String> = HashMap::new();

    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let file_path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if file_path.is_dir()
            || name == "config.yaml"
            || file_path.extension().map_or(true, |ext| ext != "yaml")
        {
            continue;
        }

        let data = fs::read_to_string(&file_path)?;
        let file: EndpointFile = serde_yaml::from_str(&data)
            .map_err(|e| ShuntError::InvalidConfig(format!("{}: {}", name, e)))?;
        if !file.enabled {
            debug!(file = %name, "skipping disabled endpoint config");
            continue;
        }

        for (route_path, raw) in file.endpoints {
            if !route_path.starts_with('/') {
                return Err(ShuntError::InvalidConfig(format!(
                    "{}: path {:?} must begin with '/'",
                    name, route_path
                )));
            }
            if let Some(prev) = seen.insert(route_path.clone(), name.clone()) {
                return Err(ShuntError::InvalidConfig(format!(
                    "duplicate path {:?} in {} (also declared in {})",
                    route_path, name, prev
                )));
            }
            for backend in &raw.urls {
                backend.validate()?;
            }
            routes.push(RouteConfig {
                path: route_path,
                strategy: raw.strategy,
                backends: raw.urls,
                rules: flatten_rules(&raw.ban, &file.global_ban),
            });
        }
    }

    Ok(routes)
}
