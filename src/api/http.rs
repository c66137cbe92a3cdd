// ABOUTME: HTTP client for the racing data service, built on reqwest.
// ABOUTME: Implements RacingApi with one request per call and typed errors.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::client::RacingApi;
use super::{ClubRoster, EventResult, EventSignup, RiderProfile, UpcomingEvent};
use crate::config::ApiConfig;
use crate::error::ApiError;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the racing data service.
#[derive(Debug, Clone)]
pub struct HttpRacingApi {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl HttpRacingApi {
    /// Create a client for `base_url`, authenticating with `api_key`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http,
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, ApiError> {
        Self::new(
            config.base_url.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        url: String,
    ) -> Result<T, ApiError> {
        let response = request
            .header("Authorization", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "api response");
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        self.send(self.http.get(&url), url).await
    }
}

#[async_trait]
impl RacingApi for HttpRacingApi {
    async fn club_members(&self, club_id: u64) -> Result<ClubRoster, ApiError> {
        self.get(&format!("/public/clubs/{club_id}")).await
    }

    async fn riders_bulk(&self, rider_ids: &[u64]) -> Result<Vec<RiderProfile>, ApiError> {
        let url = self.url("/public/riders");
        self.send(self.http.post(&url).json(rider_ids), url).await
    }

    async fn rider(&self, rider_id: u64) -> Result<RiderProfile, ApiError> {
        self.get(&format!("/public/riders/{rider_id}")).await
    }

    async fn upcoming_events(&self, hours: u32) -> Result<Vec<UpcomingEvent>, ApiError> {
        let url = self.url("/api/events/upcoming");
        let request = self.http.get(&url).query(&[("hours", hours)]);
        self.send(request, url).await
    }

    async fn event_signups(&self, event_id: u64) -> Result<Vec<EventSignup>, ApiError> {
        self.get(&format!("/api/events/{event_id}/signups")).await
    }

    async fn event_results(&self, event_id: u64) -> Result<Vec<EventResult>, ApiError> {
        self.get(&format!("/public/results/{event_id}")).await
    }
}
