use crate::error::{RelayError, RelayResult};
use crate::statuspage::models::{Incident, IncidentsPage, MaintenancesPage};
use chrono::Utc;
use reqwest::redirect::Policy;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Some status pages serve different content to non-browser agents.
pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/93.0.4531.0 Safari/537.36 Edg/93.0.916.1";

/// Outcome of one list fetch. A non-200 status carries no incidents; the
/// poller decides whether the status range warrants source re-validation.
#[derive(Debug)]
pub struct SourceFetch {
    pub status: u16,
    pub incidents: Vec<Incident>,
}

impl SourceFetch {
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

#[derive(Clone)]
pub struct StatuspageClient {
    http_client: Client,
}

impl StatuspageClient {
    pub fn new() -> Self {
        // 30-second timeout to bound hung fetches; redirects are surfaced to
        // the caller rather than followed, since a redirect-class response is
        // the signal that a source may have moved or been deleted.
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(Policy::none())
            .build()
            .expect("Failed to build HTTP client");

        Self { http_client }
    }

    pub async fn fetch_incidents(&self, page_url: &str) -> RelayResult<SourceFetch> {
        self.fetch_list::<IncidentsPage>(page_url, "incidents.json")
            .await
            .map(|(status, page)| SourceFetch {
                status,
                incidents: page.map(|p| p.incidents).unwrap_or_default(),
            })
    }

    pub async fn fetch_maintenances(&self, page_url: &str) -> RelayResult<SourceFetch> {
        self.fetch_list::<MaintenancesPage>(page_url, "scheduled-maintenances.json")
            .await
            .map(|(status, page)| SourceFetch {
                status,
                incidents: page.map(|p| p.scheduled_maintenances).unwrap_or_default(),
            })
    }

    /// Fetch the source's root page body for the validity-marker check.
    pub async fn fetch_root(&self, page_url: &str) -> RelayResult<(u16, String)> {
        let response = self
            .http_client
            .get(page_url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| RelayError::SourceUnreachable {
                url: page_url.to_string(),
                detail: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }

    async fn fetch_list<T: serde::de::DeserializeOwned>(
        &self,
        page_url: &str,
        endpoint: &str,
    ) -> RelayResult<(u16, Option<T>)> {
        // Cache-buster matches what browser clients of these pages send
        let url = format!(
            "{}/api/v2/{}?ts={}",
            page_url.trim_end_matches('/'),
            endpoint,
            Utc::now().timestamp_millis()
        );
        debug!("Fetching {}", url);

        let response = self
            .http_client
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| RelayError::SourceUnreachable {
                url: page_url.to_string(),
                detail: e.to_string(),
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            return Ok((status, None));
        }

        let page = response.json::<T>().await?;
        Ok((status, Some(page)))
    }
}

impl Default for StatuspageClient {
    fn default() -> Self {
        Self::new()
    }
}
