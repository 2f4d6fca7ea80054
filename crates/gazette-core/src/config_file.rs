use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub portal: Option<PortalConfig>,
    pub browser: Option<BrowserConfig>,
    pub timeouts: Option<TimeoutsConfig>,
    pub classifier: Option<ClassifierConfig>,
    pub store: Option<StoreConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortalConfig {
    pub search_url: Option<String>,
    pub category: Option<String>,
    pub query_text: Option<String>,
    pub max_pages: Option<usize>,
    pub detail_pages_per_second: Option<u32>,
    pub document_url_pattern: Option<String>,
    pub max_document_mb: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowserConfig {
    pub webdriver_url: Option<String>,
    pub chromedriver_path: Option<String>,
    pub headless: Option<bool>,
    pub user_agent: Option<String>,
    pub launch_retries: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    pub wait_secs: Option<u64>,
    pub poll_ms: Option<u64>,
    pub page_load_secs: Option<u64>,
    pub document_fetch_secs: Option<u64>,
    pub navigation_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub threshold: Option<f64>,
    pub extra_domain_terms: Option<Vec<String>>,
    pub extra_party_terms: Option<Vec<String>>,
    pub extra_payment_terms: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub database_path: Option<String>,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(#[from] std::io::Error),
}

/// Platform config directory path: `<config_dir>/gazette/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("gazette").join("config.toml"))
}

/// Default location of the publication database:
/// `<data_dir>/gazette/publications.db`.
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gazette")
        .join("publications.db")
}

/// Load config by cascading CWD `.gazette.toml` over platform config.
/// CWD values override platform values. Unreadable files are skipped
/// with a warning.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_if_present(&p));
    let cwd = load_if_present(Path::new(".gazette.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

fn load_if_present(path: &Path) -> Option<ConfigFile> {
    if !path.exists() {
        return None;
    }
    match load_from_path(path) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring config file");
            None
        }
    }
}

/// Load a config from a specific path.
pub fn load_from_path(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Field-level overlay: the overlay's value wins when present.
fn pick<S, T>(
    overlay: &Option<S>,
    base: &Option<S>,
    field: impl Fn(&S) -> Option<T>,
) -> Option<T> {
    overlay
        .as_ref()
        .and_then(&field)
        .or_else(|| base.as_ref().and_then(&field))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let (bp, op) = (&base.portal, &overlay.portal);
    let (bb, ob) = (&base.browser, &overlay.browser);
    let (bt, ot) = (&base.timeouts, &overlay.timeouts);
    let (bc, oc) = (&base.classifier, &overlay.classifier);
    let (bs, os) = (&base.store, &overlay.store);

    ConfigFile {
        portal: Some(PortalConfig {
            search_url: pick(op, bp, |p| p.search_url.clone()),
            category: pick(op, bp, |p| p.category.clone()),
            query_text: pick(op, bp, |p| p.query_text.clone()),
            max_pages: pick(op, bp, |p| p.max_pages),
            detail_pages_per_second: pick(op, bp, |p| p.detail_pages_per_second),
            document_url_pattern: pick(op, bp, |p| p.document_url_pattern.clone()),
            max_document_mb: pick(op, bp, |p| p.max_document_mb),
        }),
        browser: Some(BrowserConfig {
            webdriver_url: pick(ob, bb, |b| b.webdriver_url.clone()),
            chromedriver_path: pick(ob, bb, |b| b.chromedriver_path.clone()),
            headless: pick(ob, bb, |b| b.headless),
            user_agent: pick(ob, bb, |b| b.user_agent.clone()),
            launch_retries: pick(ob, bb, |b| b.launch_retries),
        }),
        timeouts: Some(TimeoutsConfig {
            wait_secs: pick(ot, bt, |t| t.wait_secs),
            poll_ms: pick(ot, bt, |t| t.poll_ms),
            page_load_secs: pick(ot, bt, |t| t.page_load_secs),
            document_fetch_secs: pick(ot, bt, |t| t.document_fetch_secs),
            navigation_attempts: pick(ot, bt, |t| t.navigation_attempts),
        }),
        classifier: Some(ClassifierConfig {
            threshold: pick(oc, bc, |c| c.threshold),
            extra_domain_terms: pick(oc, bc, |c| c.extra_domain_terms.clone()),
            extra_party_terms: pick(oc, bc, |c| c.extra_party_terms.clone()),
            extra_payment_terms: pick(oc, bc, |c| c.extra_payment_terms.clone()),
        }),
        store: Some(StoreConfig {
            database_path: pick(os, bs, |s| s.database_path.clone()),
        }),
    }
}

/// Save the config to the platform config directory.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, ConfigError> {
    let path = config_path().ok_or(ConfigError::NoConfigDir)?;
    save_to_path(config, &path)?;
    Ok(path)
}

pub fn save_to_path(config: &ConfigFile, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_deserializes() {
        let toml_str = "[portal]\ncategory = \"-11\"\n\n[browser]\nheadless = false\n";
        let parsed: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(parsed.portal.unwrap().category.as_deref(), Some("-11"));
        assert_eq!(parsed.browser.unwrap().headless, Some(false));
        assert!(parsed.store.is_none());
    }

    #[test]
    fn merge_overlay_wins() {
        let base = ConfigFile {
            store: Some(StoreConfig {
                database_path: Some("/base/pubs.db".to_string()),
            }),
            timeouts: Some(TimeoutsConfig {
                wait_secs: Some(10),
                poll_ms: Some(250),
                ..Default::default()
            }),
            ..Default::default()
        };
        let overlay = ConfigFile {
            store: Some(StoreConfig {
                database_path: Some("/overlay/pubs.db".to_string()),
            }),
            timeouts: Some(TimeoutsConfig {
                wait_secs: Some(30),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge(base, overlay);
        assert_eq!(
            merged.store.unwrap().database_path.as_deref(),
            Some("/overlay/pubs.db")
        );
        let timeouts = merged.timeouts.unwrap();
        assert_eq!(timeouts.wait_secs, Some(30));
        assert_eq!(timeouts.poll_ms, Some(250));
    }

    #[test]
    fn merge_base_preserved_when_overlay_absent() {
        let base = ConfigFile {
            classifier: Some(ClassifierConfig {
                threshold: Some(5.5),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge(base, ConfigFile::default());
        assert_eq!(merged.classifier.unwrap().threshold, Some(5.5));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = ConfigFile {
            portal: Some(PortalConfig {
                max_pages: Some(50),
                ..Default::default()
            }),
            ..Default::default()
        };
        save_to_path(&config, &path).unwrap();
        assert_eq!(load_from_path(&path).unwrap(), config);
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[portal\nmax_pages = ").unwrap();
        assert!(matches!(
            load_from_path(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
