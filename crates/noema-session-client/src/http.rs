// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! History client: snapshot, replay window, session listing and per-session
//! detail endpoints over HTTP.

use noema_proto::rest::{
    DecisionTrace, QrvEvent, QrvEventsResponse, ReplayQuery, ReplayResponse, ReplayWindow,
    SessionSummary, SnapshotResponse,
};
use noema_proto::Subgraph;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Failure of a history request.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be sent or the body could not be read.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("{url} returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
        /// Response body (possibly empty).
        body: String,
    },
    /// The body is not the expected JSON shape.
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Source of historical session data.
pub trait HistorySource: Send + Sync {
    /// Latest values and graph seed of a session.
    fn fetch_snapshot(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<SnapshotResponse, FetchError>> + Send;

    /// Decoded replay window; undecodable messages are counted.
    fn fetch_replay(
        &self,
        session_id: &str,
        query: &ReplayQuery,
    ) -> impl Future<Output = Result<ReplayWindow, FetchError>> + Send;

    /// Known sessions.
    fn list_sessions(&self) -> impl Future<Output = Result<Vec<SessionSummary>, FetchError>> + Send;
}

/// Query of a level subgraph fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubgraphQuery {
    /// Level to slice.
    pub level: i64,
    /// Optional focus node.
    pub center_node_id: Option<String>,
    /// Hop radius around the focus node.
    pub radius: u32,
    /// Server-side node cap.
    pub max_nodes: u32,
}

impl Default for SubgraphQuery {
    fn default() -> Self {
        Self {
            level: 0,
            center_node_id: None,
            radius: 1,
            max_nodes: 500,
        }
    }
}

/// `reqwest`-backed [`HistorySource`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    /// Client for `api_base` with a request timeout.
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(http, api_base))
    }

    /// Client reusing an existing `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, api_base: &str) -> Self {
        Self {
            http,
            base: api_base.trim_end_matches('/').to_owned(),
        }
    }

    /// Absolute URL for an API path such as `/v1/sessions`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Slice of the graph around an optional focus node.
    pub async fn fetch_subgraph(
        &self,
        session_id: &str,
        query: &SubgraphQuery,
    ) -> Result<Subgraph, FetchError> {
        let mut pairs = vec![
            ("radius", query.radius.to_string()),
            ("max_nodes", query.max_nodes.to_string()),
        ];
        if let Some(center) = &query.center_node_id {
            pairs.push(("center_node_id", center.clone()));
        }
        let path = format!("/v1/sessions/{session_id}/mpg/{}/subgraph", query.level);
        self.get_json(&path, &pairs).await
    }

    /// Rogue-variable events recorded for a session.
    pub async fn fetch_qrv_events(&self, session_id: &str) -> Result<Vec<QrvEvent>, FetchError> {
        let resp: QrvEventsResponse = self.get_json(&qrv_events_path(session_id), &[]).await?;
        Ok(resp.events)
    }

    /// Phase trace of one decision.
    pub async fn fetch_decision_trace(
        &self,
        session_id: &str,
        decision_id: &str,
    ) -> Result<DecisionTrace, FetchError> {
        self.get_json(&decision_path(session_id, decision_id), &[])
            .await
    }

    async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T, FetchError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self.url(path);
        let resp = self.http.get(&url).query(query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                url,
                body,
            });
        }
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn qrv_events_path(session_id: &str) -> String {
    format!("/v1/sessions/{session_id}/qrv_events")
}

fn decision_path(session_id: &str, decision_id: &str) -> String {
    format!("/v1/sessions/{session_id}/decisions/{decision_id}")
}

impl HistorySource for ApiClient {
    async fn fetch_snapshot(&self, session_id: &str) -> Result<SnapshotResponse, FetchError> {
        self.get_json(&format!("/v1/sessions/{session_id}/snapshot"), &[])
            .await
    }

    async fn fetch_replay(
        &self,
        session_id: &str,
        query: &ReplayQuery,
    ) -> Result<ReplayWindow, FetchError> {
        let resp: ReplayResponse = self
            .get_json(&format!("/v1/sessions/{session_id}/replay"), &query.to_pairs())
            .await?;
        let window = resp.into_window_with(|err| {
            debug!(session_id = %session_id, %err, "replay message rejected");
        });
        Ok(window)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, FetchError> {
        self.get_json("/v1/sessions", &[]).await
    }
}
