// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Saved client preferences shared by Noema tools (connection, playback, smoothing).

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Store key the preferences live under.
pub const PREFS_KEY: &str = "client-prefs";

/// Saved preferences for a Noema client.
///
/// Every field has a default so older files missing newer keys still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientPrefs {
    /// Backend HTTP base URL; the stream URL is derived from it.
    pub api_base: String,
    /// Message kinds to subscribe to; empty means all.
    pub message_kinds: Vec<String>,
    /// Keep-alive probe interval in seconds.
    pub keepalive_secs: u64,
    /// Silence tolerated before a probe counts as failed, in seconds.
    pub probe_timeout_secs: u64,
    /// Builder ticks per second.
    pub tick_hz: u32,
    /// Smoothing factor in (0, 1].
    pub alpha: f64,
    /// Replay clock period in milliseconds.
    pub playback_period_ms: u64,
    /// Initial replay rate.
    pub playback_rate: f64,
    /// Recent anomaly events kept.
    pub anomaly_capacity: usize,
    /// Recent flip events kept.
    pub flip_capacity: usize,
}

impl Default for ClientPrefs {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8000".to_owned(),
            message_kinds: Vec::new(),
            keepalive_secs: 15,
            probe_timeout_secs: 45,
            tick_hz: 30,
            alpha: 0.25,
            playback_period_ms: 100,
            playback_rate: 1.0,
            anomaly_capacity: 16,
            flip_capacity: 16,
        }
    }
}

impl ClientPrefs {
    /// Reject values no client can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key, reason: &str| {
            Err(ConfigError::Invalid {
                key,
                reason: reason.to_owned(),
            })
        };
        if self.api_base.trim().is_empty() {
            return invalid("api_base", "must not be empty");
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return invalid("alpha", "must be in (0, 1]");
        }
        if !(self.playback_rate.is_finite() && self.playback_rate > 0.0) {
            return invalid("playback_rate", "must be a positive number");
        }
        if self.tick_hz == 0 {
            return invalid("tick_hz", "must be at least 1");
        }
        if self.playback_period_ms == 0 {
            return invalid("playback_period_ms", "must be at least 1");
        }
        if self.keepalive_secs == 0 || self.probe_timeout_secs < self.keepalive_secs {
            return invalid(
                "probe_timeout_secs",
                "keepalive must be non-zero and not exceed the probe timeout",
            );
        }
        Ok(())
    }
}
