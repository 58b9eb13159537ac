// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Synchronization engine of a Noema viewer.
//!
//! Folds decoded envelopes into a [`noema_graph::GraphReplica`] and a
//! [`LatestValues`] cache, arbitrates live tailing against replay through a
//! [`PlaybackController`], and turns the result into one bounded, smoothed
//! [`VisualSnapshot`] per tick. [`SyncSession`] wires those pieces to a
//! transport session and a history source.

use noema_session_client::{FetchError, TransportError};
use thiserror::Error;

pub mod builder;
pub mod cache;
pub mod mapping;
pub mod playback;
mod session;
pub mod timeline;

pub use builder::{
    BandLevel, BuilderConfig, EdgeInstance, NodeInstance, PhaseIndicator, VisualSnapshot,
    VisualStateBuilder,
};
pub use cache::{LatestValues, PhaseMark, Stamped};
pub use mapping::Ribbon;
pub use playback::{
    Delivery, PlaybackController, PlaybackError, PlaybackMode, TickOutcome, TimedFrame,
};
pub use session::{SyncConfig, SyncSession, SyncStats};

/// Failures surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The live connection could not be opened.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A history request failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// A playback command was rejected.
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    /// Smoothing factor outside (0, 1].
    #[error("smoothing factor {0} is outside (0, 1]")]
    InvalidSmoothing(f64),
    /// The operation needs an open session.
    #[error("no session is open")]
    NoSession,
}
