//! PostgREST profile store adapter.
//!
//! Profiles live in a `profiles` table exposed at `/rest/v1/{table}`. Row
//! filters use PostgREST's `column=eq.value` syntax and writes ask for the
//! updated row back via `Prefer: return=representation`.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::auth::types::{ProfileUpdate, UserProfile};
use crate::traits::{Headers, HttpClient, ProfileStore, ProfileStoreError, Response};

/// Profile store over HTTP.
pub struct HttpProfileStore {
    http: Arc<dyn HttpClient>,
    base_url: String,
    anon_key: String,
    table: String,
}

impl HttpProfileStore {
    pub fn new(
        http: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            table: table.into(),
        }
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn row_url(&self, user_id: &str) -> String {
        format!("{}?id=eq.{}", self.table_url(), urlencoding::encode(user_id))
    }

    fn headers(&self, access_token: &str, prefer: Option<&str>) -> Headers {
        let mut headers = Headers::new();
        headers.insert("apikey".to_string(), self.anon_key.clone());
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", access_token),
        );
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());
        if let Some(prefer) = prefer {
            headers.insert("Prefer".to_string(), prefer.to_string());
        }
        headers
    }
}

fn store_error(response: &Response) -> ProfileStoreError {
    let body: serde_json::Value = response.json().unwrap_or(serde_json::Value::Null);
    let message = body
        .get("message")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| {
            let raw = response.snippet(200);
            if raw.trim().is_empty() {
                format!("HTTP {}", response.status)
            } else {
                raw
            }
        });
    ProfileStoreError::new(message, Some(response.status))
}

/// PostgREST returns rows as an array; take the first.
fn first_row(response: &Response) -> Result<Option<UserProfile>, ProfileStoreError> {
    let rows: Vec<UserProfile> = response.json().map_err(|e| {
        ProfileStoreError::new(
            format!(
                "Invalid profile response: {}. Response: {}",
                e,
                response.snippet(200)
            ),
            Some(response.status),
        )
    })?;
    Ok(rows.into_iter().next())
}

#[async_trait]
impl ProfileStore for HttpProfileStore {
    async fn fetch(
        &self,
        user_id: &str,
        access_token: &str,
    ) -> Result<Option<UserProfile>, ProfileStoreError> {
        let url = format!("{}&select=*", self.row_url(user_id));
        debug!(user_id, "Fetching profile");
        let response = self
            .http
            .get(&url, &self.headers(access_token, None))
            .await
            .map_err(|e| ProfileStoreError::new(format!("network error: {}", e), None))?;
        if !response.is_success() {
            return Err(store_error(&response));
        }
        first_row(&response)
    }

    async fn upsert(
        &self,
        profile: &UserProfile,
        access_token: &str,
    ) -> Result<UserProfile, ProfileStoreError> {
        let body = serde_json::to_string(profile)
            .map_err(|e| ProfileStoreError::new(format!("Failed to encode profile: {}", e), None))?;
        let response = self
            .http
            .post(
                &self.table_url(),
                &body,
                &self.headers(
                    access_token,
                    Some("resolution=merge-duplicates,return=representation"),
                ),
            )
            .await
            .map_err(|e| ProfileStoreError::new(format!("network error: {}", e), None))?;
        if !response.is_success() {
            return Err(store_error(&response));
        }
        Ok(first_row(&response)?.unwrap_or_else(|| profile.clone()))
    }

    async fn update(
        &self,
        user_id: &str,
        changes: &ProfileUpdate,
        access_token: &str,
    ) -> Result<UserProfile, ProfileStoreError> {
        let mut body = serde_json::to_value(changes)
            .map_err(|e| ProfileStoreError::new(format!("Failed to encode update: {}", e), None))?;
        if let Some(map) = body.as_object_mut() {
            map.insert(
                "updated_at".to_string(),
                serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        let response = self
            .http
            .patch(
                &self.row_url(user_id),
                &body.to_string(),
                &self.headers(access_token, Some("return=representation")),
            )
            .await
            .map_err(|e| ProfileStoreError::new(format!("network error: {}", e), None))?;
        if !response.is_success() {
            return Err(store_error(&response));
        }
        first_row(&response)?
            .ok_or_else(|| ProfileStoreError::new("profile not found", Some(404)))
    }

    async fn ping(&self) -> Result<(), ProfileStoreError> {
        let url = format!("{}?select=id&limit=1", self.table_url());
        let response = self
            .http
            .get(&url, &self.headers(&self.anon_key, None))
            .await
            .map_err(|e| ProfileStoreError::new(format!("network error: {}", e), None))?;
        // Row-level security may hide every row; any non-5xx answer means the store is up.
        if response.status >= 500 {
            return Err(store_error(&response));
        }
        Ok(())
    }
}
