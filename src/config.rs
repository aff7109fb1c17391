use crate::error::{Error, Result};
use crate::filter::SearchFilter;
use crate::poller::PollPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const API_KEY_VAR: &str = "PL_API_KEY";
pub const BASE_URL_VAR: &str = "PL_BASE_URL";
pub const DEFAULT_BASE_URL: &str = "https://api.planet.com/data/v1/";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// API credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: &str) -> Result<Self> {
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::Config("API key is empty".to_string()));
        }
        Ok(Self(key.to_string()))
    }

    pub fn expose(self: &Self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub api_key: ApiKey,
    pub base_url: Url,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            api_key,
            // constant, always parses
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base url is valid"),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        // Url::join drops the last path segment unless it ends with '/'
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        self.base_url = Url::parse(&normalized)
            .map_err(|e| Error::Config(format!("invalid base url '{}': {}", base_url, e)))?;
        Ok(self)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The API key has to be present in the environment; there is no fallback.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let key = lookup(API_KEY_VAR)
            .ok_or_else(|| Error::Config(format!("{} is not set", API_KEY_VAR)))?;
        let config = Self::new(ApiKey::new(&key)?);
        match lookup(BASE_URL_VAR) {
            Some(base_url) => config.with_base_url(&base_url),
            None => Ok(config),
        }
    }

    pub fn endpoint(self: &Self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PollSettings {
    pub interval_secs: u64,
    pub max_attempts: u32,
    pub transient_retries: u32,
    pub handle_ttl_secs: i64,
}

impl Default for PollSettings {
    fn default() -> Self {
        let policy = PollPolicy::default();
        Self {
            interval_secs: policy.interval.as_secs(),
            max_attempts: policy.max_attempts,
            transient_retries: policy.transient_retries,
            handle_ttl_secs: policy.handle_ttl.num_seconds(),
        }
    }
}

impl From<&PollSettings> for PollPolicy {
    fn from(settings: &PollSettings) -> Self {
        PollPolicy {
            interval: Duration::from_secs(settings.interval_secs),
            max_attempts: settings.max_attempts,
            transient_retries: settings.transient_retries,
            handle_ttl: chrono::Duration::seconds(settings.handle_ttl_secs),
        }
    }
}

fn default_limit() -> usize {
    1
}

/// What to search for and which asset of the selected items to fetch.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Selection {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub item_types: Vec<String>,
    pub asset: String,
    #[serde(default)]
    ids_to_download: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub polling: PollSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<SearchFilter>,
}

pub const SELECTION_TEMPLATE: &str = r#"
name = "San Francisco, July 2016"
description = "Clear PlanetScope scenes over the San Francisco peninsula"
item_types = ["PSScene"]
asset = "ortho_visual"
limit = 1

[polling]
interval_secs = 10
max_attempts = 60
transient_retries = 3
handle_ttl_secs = 3600

[filter]
type = "AndFilter"

[[filter.config]]
type = "GeometryFilter"
field_name = "geometry"
config = { type = "Polygon", coordinates = [[[-122.52, 37.70], [-122.35, 37.70], [-122.35, 37.83], [-122.52, 37.83], [-122.52, 37.70]]] }

[[filter.config]]
type = "DateRangeFilter"
field_name = "acquired"
config = { gte = "2016-07-01T00:00:00Z", lte = "2016-08-01T00:00:00Z" }

[[filter.config]]
type = "RangeFilter"
field_name = "cloud_cover"
config = { lte = 0.5 }
"#;

impl Selection {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn template() -> Result<Self> {
        Self::parse(SELECTION_TEMPLATE)
    }

    fn parse(content: &str) -> Result<Self> {
        let selection: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        selection.validate()?;
        Ok(selection)
    }

    fn validate(self: &Self) -> Result<()> {
        if self.item_types.is_empty() {
            return Err(Error::Config("no item_types given".to_string()));
        }
        if self.filter.is_none() && self.ids_to_download.is_empty() {
            return Err(Error::Config(
                "either a filter or ids_to_download is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_policy(self: &Self) -> PollPolicy {
        PollPolicy::from(&self.polling)
    }

    /// Explicit item ids, duplicates removed, first occurrence wins.
    pub fn ids_to_download(self: &Self) -> Option<Vec<String>> {
        if self.ids_to_download.is_empty() {
            return None;
        }
        let mut ids: Vec<String> = Vec::with_capacity(self.ids_to_download.len());
        for id in &self.ids_to_download {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        Some(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| vars.get(k).cloned()
    }

    #[test]
    fn test_missing_api_key_is_an_error() {
        let err = ClientConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains(API_KEY_VAR)));
    }

    #[test]
    fn test_blank_api_key_is_an_error() {
        assert!(ClientConfig::from_lookup(lookup(&[(API_KEY_VAR, "  ")])).is_err());
    }

    #[test]
    fn test_config_from_lookup() {
        let config = ClientConfig::from_lookup(lookup(&[
            (API_KEY_VAR, "abc123"),
            (BASE_URL_VAR, "http://localhost:8080/data/v1"),
        ]))
        .unwrap();
        assert_eq!(config.api_key.expose(), "abc123");
        assert_eq!(
            config.endpoint("quick-search").unwrap().as_str(),
            "http://localhost:8080/data/v1/quick-search"
        );
    }

    #[test]
    fn test_api_key_is_redacted() {
        let config = ClientConfig::new(ApiKey::new("secret-key").unwrap());
        let printed = format!("{:?}", config);
        assert!(!printed.contains("secret-key"));
    }

    #[test]
    fn test_template() {
        let selection = Selection::template().unwrap();
        assert_eq!(selection.item_types, vec!["PSScene"]);
        assert_eq!(selection.asset, "ortho_visual");
        assert_eq!(selection.poll_policy().max_attempts, 60);
        match selection.filter {
            Some(SearchFilter::AndFilter { ref config }) => assert_eq!(config.len(), 3),
            ref other => panic!("unexpected filter {:?}", other),
        }
    }

    #[test]
    fn test_write_and_read_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selection.toml");
        let selection = Selection::template().unwrap();
        selection.write(&path).unwrap();

        let selection = Selection::read(&path).unwrap();
        assert_eq!(selection.name, "San Francisco, July 2016");
        assert_eq!(selection.filter, Selection::template().unwrap().filter);
    }

    #[test]
    fn test_ids_deduplicated_in_order() {
        let selection: Selection = toml::from_str(
            r#"
            name = "ids"
            item_types = ["PSScene"]
            asset = "ortho_visual"
            ids_to_download = ["b", "a", "b", "c", "a"]
            "#,
        )
        .unwrap();
        assert_eq!(
            selection.ids_to_download(),
            Some(vec!["b".to_string(), "a".to_string(), "c".to_string()])
        );
        assert_eq!(selection.polling, PollSettings::default());
    }

    #[test]
    fn test_selection_needs_filter_or_ids() {
        let content = r#"
            name = "empty"
            item_types = ["PSScene"]
            asset = "ortho_visual"
        "#;
        assert!(matches!(Selection::parse(content), Err(Error::Config(_))));
    }
}
