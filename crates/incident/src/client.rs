use config::PollConfig;
use eyre::{Context, Result, eyre};
use reqwest::{Client as HttpClient, RequestBuilder, header::ACCEPT};
use serde::de::DeserializeOwned;
use url::Url;

use crate::types::{Activity, Incident, Page, ResourceId};

/// Page size requested from every list endpoint. Only the first page is read.
pub const PAGE_SIZE: u32 = 99;

/// Server-side filter keeping only unresolved incidents.
const ACTIVE_QUERY: &str = r#"status != "ok""#;

const INCIDENT_PLACEHOLDER: &str = "{incident_id}";

/// Client for the BigPanda incidents and activities endpoints.
#[derive(Debug, Clone)]
pub struct Client {
    http: HttpClient,
    api_token: String,
    incidents_url: Url,
    activities_url: String,
}

impl Client {
    /// Create a new BigPanda API client.
    ///
    /// `incidents_url` is fully resolved; `activities_url` is a template
    /// containing `{incident_id}`.
    pub fn new(api_token: String, incidents_url: Url, activities_url: String) -> Self {
        Self { http: HttpClient::new(), api_token, incidents_url, activities_url }
    }

    /// Create a client from a poller configuration.
    pub fn from_config(config: &PollConfig) -> Result<Self> {
        Ok(Self::new(
            config.api_token.clone(),
            config.incidents_url()?,
            config.activities_url.clone(),
        ))
    }

    /// Authenticate the request.
    fn auth(&self, rb: RequestBuilder) -> RequestBuilder {
        rb.bearer_auth(&self.api_token).header(ACCEPT, "application/json")
    }

    /// Fetch the first page of unresolved incidents, most recently changed first.
    pub async fn fetch_incidents(&self) -> Result<Vec<Incident>> {
        let page_size = PAGE_SIZE.to_string();
        let rb = self.http.get(self.incidents_url.clone()).query(&[
            ("sort_by", "last_change"),
            ("page", "1"),
            ("page_size", page_size.as_str()),
            ("query", ACTIVE_QUERY),
        ]);
        self.get_items(rb).await.wrap_err("failed to fetch incidents")
    }

    /// Fetch the first page of activities of one incident.
    pub async fn fetch_activities(&self, incident_id: &ResourceId) -> Result<Vec<Activity>> {
        let url = self.activities_url(incident_id)?;
        let page_size = PAGE_SIZE.to_string();
        let rb = self.http.get(url).query(&[("page", "1"), ("page_size", page_size.as_str())]);
        self.get_items(rb)
            .await
            .wrap_err_with(|| format!("failed to fetch activities for incident {incident_id}"))
    }

    fn activities_url(&self, incident_id: &ResourceId) -> Result<Url> {
        let resolved = self.activities_url.replace(INCIDENT_PLACEHOLDER, &incident_id.to_string());
        Url::parse(&resolved).wrap_err_with(|| format!("invalid activities url {resolved:?}"))
    }

    /// Send the request and decode the `items` of a successful response.
    ///
    /// A non-success status becomes an error carrying the status and body.
    async fn get_items<T: DeserializeOwned>(&self, rb: RequestBuilder) -> Result<Vec<T>> {
        let resp = self.auth(rb).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(eyre!("HTTP status {status}: {body}"));
        }
        Ok(resp.json::<Page<T>>().await?.items)
    }
}
