//! Hosted backend adapter
//!
//! Rows are read and written through the backend's REST interface
//! (`/rest/v1/bookmarks`); the change feed comes from the realtime
//! websocket. Row level security on the backend is what actually enforces
//! ownership; the owner filter is sent anyway so the request is explicit.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::realtime::{spawn_change_feed, RealtimeConfig};
use super::{ChangeFeed, RemoteStore};
use crate::error::{StoreError, StoreResult};
use crate::models::{Bookmark, NewBookmark};

/// Body of an insert request
#[derive(Debug, Serialize)]
struct InsertRow<'a> {
    user_id: Uuid,
    url: &'a str,
    title: &'a str,
}

/// Bookmark store on the hosted backend
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: String,
}

impl SupabaseStore {
    /// Create a store for `base_url` using the public API key and a user token
    pub fn new(base_url: &str, api_key: &str, access_token: &str) -> StoreResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", header_value(api_key)?);
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("Bearer {}", access_token))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("marks/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token: access_token.to_string(),
        })
    }

    /// REST endpoint of the bookmarks table
    fn table_url(&self) -> String {
        format!("{}/rest/v1/bookmarks", self.base_url)
    }

    fn list_query(owner: Uuid) -> Vec<(&'static str, String)> {
        vec![
            ("select", "*".to_string()),
            ("user_id", format!("eq.{}", owner)),
            ("order", "created_at.desc".to_string()),
        ]
    }

    fn delete_query(owner: Uuid, id: Uuid) -> Vec<(&'static str, String)> {
        vec![
            ("id", format!("eq.{}", id)),
            ("user_id", format!("eq.{}", owner)),
        ]
    }
}

fn header_value(raw: &str) -> StoreResult<HeaderValue> {
    HeaderValue::from_str(raw)
        .map_err(|_| StoreError::Config("credential contains invalid characters".to_string()))
}

/// Turn a non-success response into an error
async fn check(response: Response) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or(body);

    Err(StoreError::from_status(status.as_u16(), message))
}

#[async_trait]
impl RemoteStore for SupabaseStore {
    async fn query(&self, owner: Uuid) -> StoreResult<Vec<Bookmark>> {
        let response = self
            .client
            .get(self.table_url())
            .query(&Self::list_query(owner))
            .send()
            .await?;

        let rows: Vec<Bookmark> = check(response).await?.json().await?;
        debug!("Fetched {} bookmarks", rows.len());
        Ok(rows)
    }

    async fn insert(&self, owner: Uuid, draft: &NewBookmark) -> StoreResult<Bookmark> {
        let body = InsertRow {
            user_id: owner,
            url: draft.url(),
            title: draft.title(),
        };

        let response = self
            .client
            .post(self.table_url())
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await?;

        let mut rows: Vec<Bookmark> = check(response).await?.json().await?;
        if rows.is_empty() {
            return Err(StoreError::InvalidResponse(
                "insert returned no row".to_string(),
            ));
        }
        Ok(rows.swap_remove(0))
    }

    async fn delete(&self, owner: Uuid, id: Uuid) -> StoreResult<()> {
        let response = self
            .client
            .delete(self.table_url())
            .query(&Self::delete_query(owner, id))
            .send()
            .await?;

        // Deleting a row that is already gone is not an error here
        match check(response).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn subscribe(&self, owner: Uuid) -> StoreResult<ChangeFeed> {
        let config = RealtimeConfig::new(&self.base_url, &self.api_key, &self.access_token);
        Ok(spawn_change_feed(config, owner))
    }
}
