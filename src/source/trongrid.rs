//! TronGrid events API client.

use super::{EventPage, EventSource, RawEvent, SourceError};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const RETRY_MAX_ELAPSED: Duration = Duration::from_secs(30);

/// Event source backed by the TronGrid per-contract events endpoint.
///
/// Only confirmed events are requested. Pagination is cursor-based via the
/// endpoint's `fingerprint` parameter.
#[derive(Debug, Clone)]
pub struct TronGridSource {
    client: Client,
    base_url: String,
    contract: String,
    api_key: Option<String>,
    page_limit: u32,
}

impl TronGridSource {
    /// Create a client for one contract's event feed.
    ///
    /// `contract` may be in either address encoding; the endpoint accepts
    /// both. The API key header is only required on mainnet.
    pub fn new(
        base_url: String,
        contract: String,
        api_key: Option<String>,
        page_limit: u32,
    ) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            client,
            base_url,
            contract,
            api_key,
            page_limit,
        }
    }

    fn events_url(&self) -> String {
        format!(
            "{}/v1/contracts/{}/events",
            self.base_url.trim_end_matches('/'),
            self.contract
        )
    }

    async fn get_page_body(&self, cursor: Option<&str>) -> Result<serde_json::Value, SourceError> {
        let url = self.events_url();
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(RETRY_MAX_ELAPSED),
            ..Default::default()
        };

        retry(backoff, || async {
            let mut request = self.client.get(&url).query(&[
                ("limit", self.page_limit.to_string()),
                ("only_confirmed", "true".to_string()),
            ]);
            if let Some(cursor) = cursor {
                request = request.query(&[("fingerprint", cursor)]);
            }
            if let Some(key) = &self.api_key {
                request = request.header("TRON-PRO-API-KEY", key);
            }

            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    backoff::Error::transient(SourceError::Timeout)
                } else {
                    backoff::Error::transient(SourceError::Network(e.to_string()))
                }
            })?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Err(backoff::Error::permanent(SourceError::ContractNotFound));
            }
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(backoff::Error::transient(SourceError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(SourceError::Http {
                    status: status.as_u16(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(SourceError::Http {
                    status: status.as_u16(),
                }));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| backoff::Error::permanent(SourceError::Parse(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl EventSource for TronGridSource {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<EventPage, SourceError> {
        debug!(contract = %self.contract, cursor = cursor.unwrap_or(""), "fetching events page");

        let body = self.get_page_body(cursor).await?;

        let envelopes = body
            .get("data")
            .and_then(|v| v.as_array())
            .ok_or_else(|| SourceError::Parse("missing data array".to_string()))?;

        let mut events = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            match serde_json::from_value::<RawEvent>(envelope.clone()) {
                Ok(raw) => events.push(raw),
                Err(e) => {
                    warn!("skipping malformed event envelope: {}", e);
                }
            }
        }

        let next_cursor = extract_cursor(&body);
        Ok(EventPage {
            events,
            next_cursor,
        })
    }
}

/// Pull the pagination cursor out of a response body.
///
/// The endpoint has been observed to hand it back in three shapes:
/// `meta.fingerprint`, a top-level `fingerprint`, and `meta.links.next`.
/// All cursor probing lives here and nowhere else.
fn extract_cursor(body: &serde_json::Value) -> Option<String> {
    let candidate = body
        .pointer("/meta/fingerprint")
        .or_else(|| body.get("fingerprint"))
        .or_else(|| body.pointer("/meta/links/next"));

    candidate
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
