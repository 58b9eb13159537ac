// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client side of the Noema telemetry backend.
//!
//! Two halves:
//! - a live [`TransportSession`] that subscribes to one session's stream and
//!   queues decoded events into a [`SessionInbox`], with keep-alive probing
//!   and graceful close;
//! - a [`HistorySource`] for snapshots, replay windows and session listings
//!   ([`http::ApiClient`] talks to the real backend over HTTP).
//!
//! Transports plug in through [`Connector`]: [`ws::WsConnector`] for the
//! backend's WebSocket endpoint and [`memory::memory_transport`] for tests.

mod session;
mod transport;

pub mod http;
pub mod memory;
pub mod tool;
pub mod ws;

pub use http::{ApiClient, FetchError, HistorySource, SubgraphQuery};
pub use session::{CloseReason, SessionConfig, SessionEvent, SessionInbox, TransportSession};
pub use tool::{InboxPort, SessionPort};
pub use transport::{Connection, Connector, Incoming, TransportError};
