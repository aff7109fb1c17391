use crate::error::{Error, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use url::Url;

/// One capture record returned by a search.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(rename = "_links", default)]
    pub links: ItemLinks,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct ItemLinks {
    #[serde(rename = "_self", skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets: Option<String>,
}

impl Item {
    pub fn item_type(self: &Self) -> Option<&str> {
        self.properties.get("item_type")?.as_str()
    }

    pub fn acquired(self: &Self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.properties.get("acquired")?.as_str()?)
    }

    pub fn cloud_cover(self: &Self) -> Option<f64> {
        self.properties.get("cloud_cover")?.as_f64()
    }
}

/// Items of one search, in the order the service returned them.
#[derive(Clone, Debug, Default)]
pub struct SearchResult {
    pub items: Vec<Item>,
}

impl SearchResult {
    pub fn len(self: &Self) -> usize {
        self.items.len()
    }

    pub fn is_empty(self: &Self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(self: &Self) -> Vec<&str> {
        self.items.iter().map(|i| i.id.as_str()).collect()
    }
}

/// A single page of a search response.
#[derive(Deserialize, Debug)]
pub(crate) struct SearchPage {
    pub features: Vec<Item>,
    #[serde(rename = "_links", default)]
    pub links: PageLinks,
}

#[derive(Deserialize, Debug, Default)]
pub(crate) struct PageLinks {
    #[serde(rename = "_next")]
    pub next: Option<String>,
}

impl SearchPage {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::Schema(format!("search response: {}", e)))
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Inactive,
    Activating,
    Active,
    Failed,
}

#[derive(Deserialize, Debug)]
struct AssetDescriptor {
    status: AssetStatus,
    #[serde(rename = "_links")]
    links: AssetLinks,
    location: Option<String>,
    expires_at: Option<String>,
}

#[derive(Deserialize, Debug)]
struct AssetLinks {
    #[serde(rename = "_self")]
    self_link: String,
    activate: Option<String>,
}

/// A named product of an item as last observed on the service.
#[derive(Clone, Debug, PartialEq)]
pub struct Asset {
    pub name: String,
    pub status: AssetStatus,
    pub self_link: String,
    pub activate_link: Option<String>,
    pub location: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Asset {
    pub fn from_value(name: &str, value: Value) -> Result<Self> {
        let descriptor: AssetDescriptor = serde_json::from_value(value)
            .map_err(|e| Error::Schema(format!("asset '{}': {}", name, e)))?;

        let expires_at = match descriptor.expires_at.as_deref() {
            Some(s) => Some(parse_timestamp(s).ok_or_else(|| {
                Error::Schema(format!("asset '{}': bad expires_at '{}'", name, s))
            })?),
            None => None,
        };

        Ok(Self {
            name: name.to_string(),
            status: descriptor.status,
            self_link: descriptor.links.self_link,
            activate_link: descriptor.links.activate,
            location: descriptor.location,
            expires_at,
        })
    }

    /// Short-lived download handle. Only available once the asset is active.
    /// `fallback_ttl` bounds the handle when the service does not report an expiry.
    pub fn retrieval_handle(
        self: &Self,
        observed_at: DateTime<Utc>,
        fallback_ttl: Duration,
    ) -> Result<RetrievalHandle> {
        if self.status != AssetStatus::Active {
            return Err(Error::Schema(format!(
                "asset '{}' is {:?}, not active",
                self.name, self.status
            )));
        }
        let location = self.location.as_deref().ok_or_else(|| {
            Error::Schema(format!("active asset '{}' without location", self.name))
        })?;
        let url = Url::parse(location)?;
        let expires_at = self.expires_at.unwrap_or(observed_at + fallback_ttl);

        Ok(RetrievalHandle {
            asset: self.name.clone(),
            url,
            expires_at,
        })
    }
}

pub fn parse_assets(value: Value) -> Result<BTreeMap<String, Asset>> {
    let map = match value {
        Value::Object(map) => map,
        other => {
            return Err(Error::Schema(format!(
                "asset listing is not an object: {}",
                other
            )))
        }
    };
    map.into_iter()
        .map(|(name, v)| Asset::from_value(&name, v).map(|a| (name, a)))
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetrievalHandle {
    pub asset: String,
    pub url: Url,
    pub expires_at: DateTime<Utc>,
}

impl RetrievalHandle {
    pub fn is_expired(self: &Self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The service emits both RFC 3339 timestamps and naive ones that are implicitly UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
