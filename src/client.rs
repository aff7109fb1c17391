use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::filter::SearchFilter;
use crate::http::{HttpOps, ReqwestHttp};
use crate::item::{parse_assets, Asset, AssetStatus, Item, SearchPage, SearchResult};
use log::{debug, info};
use serde_json::json;
use std::collections::BTreeMap;

const SEARCH_PATH: &str = "quick-search";

/// Catalogue client. All wire access goes through `H`.
pub struct Client<H: HttpOps> {
    http: H,
    config: ClientConfig,
}

impl Client<ReqwestHttp> {
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let http = ReqwestHttp::new(config.clone())?;
        Ok(Self { http, config })
    }
}

impl<H: HttpOps> Client<H> {
    pub fn new(http: H, config: ClientConfig) -> Self {
        Self { http, config }
    }

    pub fn config(self: &Self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn http(self: &Self) -> &H {
        &self.http
    }

    /// Search for up to `limit` items, following `_next` links across pages.
    pub async fn search(
        self: &Self,
        item_types: &[String],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<SearchResult> {
        let mut items: Vec<Item> = vec![];
        if limit == 0 {
            return Ok(SearchResult { items });
        }

        let url = self.config.endpoint(SEARCH_PATH)?;
        let body = json!({"item_types": item_types, "filter": filter.to_json()?});
        let mut page = SearchPage::from_value(self.http.post_json(url.as_str(), &body).await?)?;

        loop {
            debug!("search page with {} items", page.features.len());
            let last_page = page.features.is_empty();
            items.extend(page.features);
            if items.len() >= limit || last_page {
                break;
            }
            match page.links.next {
                Some(next) => {
                    page = SearchPage::from_value(self.http.get_json(&next).await?)?;
                }
                None => break,
            }
        }
        items.truncate(limit);
        info!("search returned {} items", items.len());
        Ok(SearchResult { items })
    }

    pub async fn assets(self: &Self, item: &Item) -> Result<BTreeMap<String, Asset>> {
        match &item.links.assets {
            Some(url) => parse_assets(self.http.get_json(url).await?),
            None => {
                let item_type = item.item_type().ok_or_else(|| {
                    Error::Schema(format!("item '{}' has no item_type", item.id))
                })?;
                self.assets_by_id(item_type, &item.id).await
            }
        }
    }

    pub async fn assets_by_id(
        self: &Self,
        item_type: &str,
        item_id: &str,
    ) -> Result<BTreeMap<String, Asset>> {
        let url = self
            .config
            .endpoint(&format!("item-types/{}/items/{}/assets", item_type, item_id))?;
        parse_assets(self.http.get_json(url.as_str()).await?)
    }

    /// A single named asset of an item. Absent names are `NotFound`.
    pub async fn asset(self: &Self, item_type: &str, item_id: &str, name: &str) -> Result<Asset> {
        let mut assets = self.assets_by_id(item_type, item_id).await?;
        assets
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("asset '{}' of item '{}'", name, item_id)))
    }

    /// Ask the service to prepare `asset`. Already active assets are left alone.
    pub async fn activate(self: &Self, asset: &Asset) -> Result<()> {
        if asset.status == AssetStatus::Active {
            debug!("asset {} already active", asset.name);
            return Ok(());
        }
        let link = asset.activate_link.as_deref().ok_or_else(|| {
            Error::NotFound(format!("activation link for asset '{}'", asset.name))
        })?;
        let status = self.http.trigger(link).await?;
        info!("activation of {} requested ({})", asset.name, status);
        Ok(())
    }

    /// Current descriptor of `asset`, fetched from its self link.
    pub async fn refresh(self: &Self, asset: &Asset) -> Result<Asset> {
        let value = self.http.get_json(&asset.self_link).await?;
        Asset::from_value(&asset.name, value)
    }

    pub async fn poll(self: &Self, asset: &Asset) -> Result<AssetStatus> {
        Ok(self.refresh(asset).await?.status)
    }
}
