//! HTTP ledger connector
//!
//! Talks to a JSON ledger gateway:
//!
//! - `GET {base}/block-number` → `{"blockNumber": N}`
//! - `GET {base}/events/{name}?fromBlock=N` → `[RawEvent, ...]`
//!
//! The gateway has no push channel, so the live feed polls the events
//! endpoint and emits only events past the last one delivered. A failed poll
//! ends the feed with [`FeedItem::Disconnected`].

use crate::error::{Result, SyncError};
use crate::event::{BlockNumber, RawEvent};
use crate::source::{EventFeed, FeedItem, LedgerConnection, LedgerConnector};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockNumberResponse {
    block_number: BlockNumber,
}

/// Connector for an HTTP ledger gateway
#[derive(Debug, Clone)]
pub struct HttpLedgerConnector {
    base_url: String,
    auth_token: Option<String>,
    poll_interval: Duration,
    http: reqwest::Client,
}

impl HttpLedgerConnector {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            poll_interval: Duration::from_millis(crate::config::DEFAULT_POLL_INTERVAL_MS),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl LedgerConnector for HttpLedgerConnector {
    async fn connect(&self) -> Result<Arc<dyn LedgerConnection>> {
        let connection = HttpLedgerConnection {
            base_url: self.base_url.clone(),
            auth_token: self.auth_token.clone(),
            poll_interval: self.poll_interval,
            http: self.http.clone(),
        };
        // Height check so a dead gateway fails here rather than on first use.
        let height = connection.current_block().await?;
        tracing::info!(url = %self.base_url, height, "Connected to ledger gateway");
        Ok(Arc::new(connection))
    }
}

#[derive(Debug, Clone)]
struct HttpLedgerConnection {
    base_url: String,
    auth_token: Option<String>,
    poll_interval: Duration,
    http: reqwest::Client,
}

impl HttpLedgerConnection {
    fn add_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref token) = self.auth_token {
            req.bearer_auth(token)
        } else {
            req
        }
    }

    /// `{base}/events/{event_name}` with the name percent-encoded as one
    /// path segment.
    fn events_url(&self, event_name: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            SyncError::Fatal(format!("Invalid ledger URL {}: {}", self.base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| SyncError::Fatal(format!("Ledger URL {} cannot have a path", self.base_url)))?
            .pop_if_empty()
            .push("events")
            .push(event_name);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T> {
        let resp = self.add_auth(req).send().await?;
        let status = resp.status();
        match status.as_u16() {
            200..=299 => Ok(resp.json().await?),
            401 | 403 => Err(SyncError::Fatal(format!(
                "{} rejected with status {}",
                what, status
            ))),
            _ => Err(SyncError::transport(format!(
                "{} failed with status {}",
                what, status
            ))),
        }
    }
}

#[async_trait]
impl LedgerConnection for HttpLedgerConnection {
    async fn current_block(&self) -> Result<BlockNumber> {
        let url = format!("{}/block-number", self.base_url);
        let body: BlockNumberResponse = self.get_json(self.http.get(&url), "block-number").await?;
        Ok(body.block_number)
    }

    async fn events_from_block(
        &self,
        event_name: &str,
        from_block: BlockNumber,
    ) -> Result<Vec<RawEvent>> {
        let req = self
            .http
            .get(self.events_url(event_name)?)
            .query(&[("fromBlock", from_block)]);
        let mut events: Vec<RawEvent> = self.get_json(req, "events").await?;
        events.retain(|e| e.event_name == event_name && e.block_number >= from_block);
        events.sort_by_key(|e| e.position());
        Ok(events)
    }

    fn subscribe(&self, event_name: &str, from_block: BlockNumber) -> EventFeed {
        let connection = self.clone();
        let event_name = event_name.to_string();

        let stream = async_stream::stream! {
            let mut next_from = from_block;
            let mut last: Option<(BlockNumber, u64)> = None;

            loop {
                match connection.events_from_block(&event_name, next_from).await {
                    Ok(events) => {
                        for event in events {
                            if last.map_or(true, |pos| event.position() > pos) {
                                last = Some(event.position());
                                next_from = event.block_number;
                                yield FeedItem::Event(event);
                            }
                        }
                    }
                    Err(e) => {
                        yield FeedItem::Disconnected {
                            reason: format!("Poll failed: {}", e),
                        };
                        break;
                    }
                }
                tokio::time::sleep(connection.poll_interval).await;
            }
        };
        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectPolicy;
    use crate::source::LedgerEventSource;
    use futures::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // Nothing listens on port 9 (discard) in test environments.
    const DEAD_GATEWAY: &str = "http://127.0.0.1:9/";

    #[test]
    fn test_base_url_is_normalized() {
        let connector = HttpLedgerConnector::new(DEAD_GATEWAY, None);
        assert_eq!(connector.base_url(), "http://127.0.0.1:9");
    }

    #[test]
    fn test_response_shapes() {
        let body: BlockNumberResponse = serde_json::from_str(r#"{"blockNumber": 1234}"#).unwrap();
        assert_eq!(body.block_number, 1234);

        let events: Vec<RawEvent> = serde_json::from_str(
            r#"[{"blockNumber": 5, "logIndex": 1, "eventName": "ContourChanged",
                 "tokenId": "99", "contour": ["w24q8r9pgd0p"]}]"#,
        )
        .unwrap();
        assert_eq!(events[0].position(), (5, 1));
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_transport_error() {
        let connector = HttpLedgerConnector::new(DEAD_GATEWAY, Some("token".to_string()));
        let err = connector.connect().await.unwrap_err();
        assert!(err.is_transport(), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn test_failed_poll_ends_feed_with_disconnect() {
        let connection = HttpLedgerConnection {
            base_url: "http://127.0.0.1:9".to_string(),
            auth_token: None,
            poll_interval: Duration::from_millis(1),
            http: reqwest::Client::new(),
        };

        let items: Vec<FeedItem> = connection.subscribe("ContourChanged", 0).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], FeedItem::Disconnected { .. }));
    }

    fn event_json(block: u64, log_index: u64, name: &str) -> serde_json::Value {
        json!({
            "blockNumber": block,
            "logIndex": log_index,
            "eventName": name,
            "tokenId": "99",
            "contour": ["w24q8r9pgd0p", "w24q8r3newq1", "w24q8r6pm9gc"]
        })
    }

    async fn mount_block_number(server: &MockServer, height: u64) {
        Mock::given(method("GET"))
            .and(path("/block-number"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "blockNumber": height })))
            .mount(server)
            .await;
    }

    #[test]
    fn test_event_name_is_one_encoded_segment() {
        let connection = HttpLedgerConnection {
            base_url: "http://127.0.0.1:9/api".to_string(),
            auth_token: None,
            poll_interval: Duration::from_millis(1),
            http: reqwest::Client::new(),
        };
        let url = connection.events_url("Contour Changed/v2").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9/api/events/Contour%20Changed%2Fv2");
    }

    #[tokio::test]
    async fn test_reads_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/block-number"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "blockNumber": 12 })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/events/ContourChanged"))
            .and(query_param("fromBlock", "5"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                event_json(7, 1, "ContourChanged"),
                event_json(5, 0, "ContourChanged"),
                event_json(3, 0, "ContourChanged"),
                event_json(6, 0, "Transfer"),
            ])))
            .mount(&server)
            .await;

        let connector = HttpLedgerConnector::new(server.uri(), Some("secret".to_string()));
        let connection = connector.connect().await.unwrap();

        assert_eq!(connection.current_block().await.unwrap(), 12);
        let events = connection.events_from_block("ContourChanged", 5).await.unwrap();
        let positions: Vec<(u64, u64)> = events.iter().map(|e| e.position()).collect();
        assert_eq!(positions, vec![(5, 0), (7, 1)]);
        assert_eq!(events[0].contour.len(), 3);
    }

    #[tokio::test]
    async fn test_auth_rejections_are_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/block-number"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = HttpLedgerConnector::new(server.uri(), None)
            .connect()
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Fatal(_)), "unexpected error: {}", err);

        let server = MockServer::start().await;
        mount_block_number(&server, 3).await;
        Mock::given(method("GET"))
            .and(path("/events/ContourChanged"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let connection = HttpLedgerConnector::new(server.uri(), Some("stale".to_string()))
            .connect()
            .await
            .unwrap();
        let err = connection.events_from_block("ContourChanged", 0).await.unwrap_err();
        assert!(matches!(err, SyncError::Fatal(_)), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn test_server_error_is_retried_after_reconnect() {
        let server = MockServer::start().await;
        mount_block_number(&server, 9).await;
        Mock::given(method("GET"))
            .and(path("/events/ContourChanged"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/events/ContourChanged"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([event_json(9, 0, "ContourChanged")])),
            )
            .mount(&server)
            .await;

        let connector = Arc::new(HttpLedgerConnector::new(server.uri(), None));
        let source =
            LedgerEventSource::connect(connector, ReconnectPolicy::fixed(Duration::from_millis(1)))
                .await;

        let events = source.events_from_block("ContourChanged", 0).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(source.generation(), 1);
    }

    #[tokio::test]
    async fn test_poll_feed_delivers_each_event_once() {
        let server = MockServer::start().await;
        mount_block_number(&server, 6).await;
        Mock::given(method("GET"))
            .and(path("/events/ContourChanged"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                event_json(5, 0, "ContourChanged"),
                event_json(6, 0, "ContourChanged"),
            ])))
            .mount(&server)
            .await;

        let connection = HttpLedgerConnector::new(server.uri(), None)
            .with_poll_interval(Duration::from_millis(1))
            .connect()
            .await
            .unwrap();
        let mut feed = connection.subscribe("ContourChanged", 0);

        let first = feed.next().await.unwrap();
        let second = feed.next().await.unwrap();
        assert!(matches!(first, FeedItem::Event(ref e) if e.position() == (5, 0)));
        assert!(matches!(second, FeedItem::Event(ref e) if e.position() == (6, 0)));

        // Later polls return the same events; none are delivered again.
        let again = tokio::time::timeout(Duration::from_millis(100), feed.next()).await;
        assert!(again.is_err(), "duplicate item: {:?}", again);

        let requests = server.received_requests().await.unwrap();
        assert!(requests
            .iter()
            .any(|r| r.url.query() == Some("fromBlock=6")));
    }
}
