//! HTTP client for the media server's API
//!
//! Covers the three surfaces the refresh pipeline needs: the user list, the
//! playback-reporting playlist per user, and the paged item listing that
//! feeds the catalog sync. The engine runs as a synchronous batch job, so
//! the client is blocking.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::source::{CatalogSource, EventSource};
use crate::types::{CatalogItem, ItemKind, PlaybackEvent, UserWatchHistory};

/// Response from GET /Users/Query
#[derive(Debug, Deserialize)]
struct UsersResponse {
    #[serde(rename = "Items", default)]
    items: Vec<UserRecord>,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Id")]
    id: String,
}

/// One page from GET /Items (`QueryResult<BaseItemDto>`)
#[derive(Debug, Deserialize)]
struct ItemsPage {
    #[serde(rename = "Items", default)]
    items: Vec<ItemRecord>,
    #[serde(rename = "TotalRecordCount", default)]
    total_record_count: usize,
}

#[derive(Debug, Deserialize)]
struct ItemRecord {
    #[serde(rename = "Id")]
    id: serde_json::Value,
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "Type", default)]
    item_type: Option<String>,
    #[serde(rename = "SeriesName", default)]
    series_name: Option<String>,
    #[serde(rename = "SeriesId", default)]
    series_id: Option<serde_json::Value>,
    #[serde(rename = "ParentIndexNumber", default)]
    season_number: Option<i64>,
    #[serde(rename = "IndexNumber", default)]
    episode_number: Option<i64>,
    #[serde(rename = "RunTimeTicks", default)]
    runtime_ticks: Option<i64>,
    #[serde(rename = "PremiereDate", default)]
    premiere_date: Option<String>,
    #[serde(rename = "ProductionYear", default)]
    production_year: Option<i64>,
    #[serde(rename = "CommunityRating", default)]
    community_rating: Option<f64>,
}

/// Item ids arrive as strings or numbers depending on server version.
fn id_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl ItemRecord {
    fn into_catalog_item(self) -> CatalogItem {
        CatalogItem {
            item_id: id_to_string(&self.id),
            item_name: self.name.unwrap_or_default(),
            item_kind: ItemKind::from_source(self.item_type.as_deref().unwrap_or("")),
            runtime_ticks: self.runtime_ticks,
            series_name: self.series_name,
            series_id: self.series_id.as_ref().map(id_to_string),
            season_number: self.season_number,
            episode_number: self.episode_number,
            premiere_date: self.premiere_date,
            production_year: self.production_year,
            community_rating: self.community_rating,
        }
    }
}

/// Blocking HTTP client for the media server.
pub struct MediaServerClient {
    config: ServerConfig,
    http_client: Client,
    base_url: String,
    api_key: String,
}

impl MediaServerClient {
    /// Create a new client from configuration.
    ///
    /// Returns an error if the configuration is missing required fields.
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| Error::Config("server.base_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| Error::Config("server.api_key is required".to_string()))?;

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            base_url,
            api_key,
        })
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::blocking::Response> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http_client
            .get(&url)
            .query(query)
            .query(&[("api_key", self.api_key.as_str())])
            .send()
            .map_err(|e| Error::Source(format!("HTTP request to {} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Source(format!(
                "API error ({}) from {}",
                status, path
            )));
        }
        Ok(response)
    }

    /// Check the server is reachable.
    pub fn ping(&self) -> Result<()> {
        self.get("/System/Ping", &[])?;
        Ok(())
    }

    /// Fetch all users (including hidden ones), name -> id.
    pub fn list_users(&self) -> Result<BTreeMap<String, String>> {
        let response = self.get("/Users/Query", &[("IsHidden", "true".to_string())])?;
        let users: UsersResponse = response
            .json()
            .map_err(|e| Error::Source(format!("failed to parse user list: {}", e)))?;

        Ok(users
            .items
            .into_iter()
            .map(|u| (u.name, u.id))
            .collect())
    }

    /// Fetch one user's playback history from the reporting endpoint.
    pub fn user_watch_history(
        &self,
        user_id: &str,
        lookback_days: u32,
        aggregated: bool,
    ) -> Result<Vec<PlaybackEvent>> {
        let response = self.get(
            "/user_usage_stats/UserPlaylist",
            &[
                ("user_id", user_id.to_string()),
                ("aggregate_data", aggregated.to_string()),
                ("days", lookback_days.to_string()),
            ],
        )?;
        response
            .json()
            .map_err(|e| Error::Source(format!("failed to parse watch history: {}", e)))
    }

    fn items_page(&self, start_index: usize, limit: usize) -> Result<ItemsPage> {
        let response = self.get(
            "/Items",
            &[
                ("IncludeItemTypes", "Movie,Episode".to_string()),
                ("Recursive", "true".to_string()),
                (
                    "Fields",
                    "RunTimeTicks,SeriesName,SeriesId,ParentIndexNumber,IndexNumber,\
                     PremiereDate,ProductionYear,CommunityRating"
                        .to_string(),
                ),
                ("StartIndex", start_index.to_string()),
                ("Limit", limit.to_string()),
            ],
        )?;
        response
            .json()
            .map_err(|e| Error::Source(format!("failed to parse items page: {}", e)))
    }
}

impl EventSource for MediaServerClient {
    fn fetch_all_watch_history(
        &self,
        lookback_days: u32,
        aggregated: bool,
    ) -> Result<UserWatchHistory> {
        let users = self.list_users()?;
        tracing::info!(users = users.len(), "Fetching watch history");

        let mut history = UserWatchHistory::new();
        for (name, id) in users {
            let events = self.user_watch_history(&id, lookback_days, aggregated)?;
            tracing::debug!(user = %name, events = events.len(), "Fetched user history");
            history.insert(name, events);
        }
        Ok(history)
    }
}

impl CatalogSource for MediaServerClient {
    /// Page through the whole library until every movie and episode is seen.
    fn fetch_items(&self) -> Result<Vec<CatalogItem>> {
        let page_size = self.config.page_size;
        let mut items = Vec::new();
        let mut start = 0usize;
        let mut total = None;

        loop {
            let page = self.items_page(start, page_size)?;
            let got = page.items.len();
            if total.is_none() {
                total = Some(page.total_record_count);
            }

            items.extend(page.items.into_iter().map(ItemRecord::into_catalog_item));

            if got == 0 || start + got >= total.unwrap_or(0) {
                break;
            }
            start += got;
        }

        tracing::info!(items = items.len(), "Fetched library items");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_requires_config() {
        let config = ServerConfig::default();
        assert!(MediaServerClient::new(config).is_err());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = ServerConfig {
            base_url: Some("https://media.example.com/emby/".to_string()),
            api_key: Some("k".to_string()),
            ..Default::default()
        };
        let client = MediaServerClient::new(config).unwrap();
        assert_eq!(client.base_url, "https://media.example.com/emby");
    }

    #[test]
    fn test_item_record_mapping() {
        let json = r#"{
            "Id": 528946,
            "Name": "Super Soft Birthday",
            "Type": "Episode",
            "SeriesName": "Letterkenny",
            "SeriesId": "528900",
            "ParentIndexNumber": 1,
            "IndexNumber": 2,
            "RunTimeTicks": 15630000000,
            "ProductionYear": 2016
        }"#;
        let record: ItemRecord = serde_json::from_str(json).unwrap();
        let item = record.into_catalog_item();

        assert_eq!(item.item_id, "528946");
        assert_eq!(item.item_kind, ItemKind::Episode);
        assert_eq!(item.series_id.as_deref(), Some("528900"));
        assert_eq!(item.season_number, Some(1));
        assert_eq!(item.runtime_seconds(), Some(1563));
    }

    #[test]
    fn test_item_record_unknown_type() {
        let json = r#"{"Id": "abc", "Name": "Some Trailer", "Type": "Trailer"}"#;
        let record: ItemRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.into_catalog_item().item_kind, ItemKind::Other);
    }
}
