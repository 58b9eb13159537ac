// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Stored prefs, command-line overrides, and the resulting sync knobs.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use noema_app_core::prefs::ClientPrefs;
use noema_proto::MessageKind;
use noema_session_client::SessionConfig;
use noema_sync::{BuilderConfig, SyncConfig};

/// Flag values that take precedence over stored prefs.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_base: Option<String>,
    pub message_kinds: Vec<String>,
    pub tick_hz: Option<u32>,
    pub alpha: Option<f64>,
    pub playback_rate: Option<f64>,
    pub keepalive_secs: Option<u64>,
    pub probe_timeout_secs: Option<u64>,
}

/// Layer `overrides` onto `prefs` and validate the result.
pub fn apply_overrides(mut prefs: ClientPrefs, overrides: &Overrides) -> Result<ClientPrefs> {
    if let Some(base) = &overrides.api_base {
        prefs.api_base.clone_from(base);
    }
    if !overrides.message_kinds.is_empty() {
        prefs.message_kinds.clone_from(&overrides.message_kinds);
    }
    if let Some(hz) = overrides.tick_hz {
        prefs.tick_hz = hz;
    }
    if let Some(alpha) = overrides.alpha {
        prefs.alpha = alpha;
    }
    if let Some(rate) = overrides.playback_rate {
        prefs.playback_rate = rate;
    }
    if let Some(secs) = overrides.keepalive_secs {
        prefs.keepalive_secs = secs;
    }
    if let Some(secs) = overrides.probe_timeout_secs {
        prefs.probe_timeout_secs = secs;
    }
    prefs.validate().context("invalid client preferences")?;
    Ok(prefs)
}

/// Sync knobs for validated prefs.
pub fn sync_config(prefs: &ClientPrefs, replay_max_messages: Option<u32>) -> Result<SyncConfig> {
    let message_kinds = prefs
        .message_kinds
        .iter()
        .map(|raw| MessageKind::from_str(raw).with_context(|| format!("message kind {raw:?}")))
        .collect::<Result<Vec<_>>>()?;
    Ok(SyncConfig {
        message_kinds,
        session: SessionConfig {
            keepalive_interval: Duration::from_secs(prefs.keepalive_secs),
            probe_timeout: Duration::from_secs(prefs.probe_timeout_secs),
            ..SessionConfig::default()
        },
        builder: BuilderConfig {
            alpha: prefs.alpha,
            ..BuilderConfig::default()
        },
        playback_period: Duration::from_millis(prefs.playback_period_ms),
        playback_rate: prefs.playback_rate,
        anomaly_capacity: prefs.anomaly_capacity,
        flip_capacity: prefs.flip_capacity,
        replay_max_messages,
        ..SyncConfig::default()
    })
}

/// Interval between builder ticks.
pub fn tick_period(prefs: &ClientPrefs) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(prefs.tick_hz.max(1)))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn flags_win_over_stored_prefs() {
        let stored = ClientPrefs {
            api_base: "http://stored:8000".into(),
            tick_hz: 10,
            ..ClientPrefs::default()
        };
        let overrides = Overrides {
            api_base: Some("http://flag:9000".into()),
            message_kinds: vec!["mpg_delta".into(), "belief-state".into()],
            ..Overrides::default()
        };
        let prefs = apply_overrides(stored, &overrides).unwrap();
        assert_eq!(prefs.api_base, "http://flag:9000");
        assert_eq!(prefs.tick_hz, 10);

        let config = sync_config(&prefs, Some(500)).unwrap();
        assert_eq!(
            config.message_kinds,
            vec![MessageKind::GraphDelta, MessageKind::BeliefState]
        );
        assert_eq!(config.replay_max_messages, Some(500));
        assert_eq!(config.session.keepalive_interval, Duration::from_secs(15));
        assert_eq!(tick_period(&prefs), Duration::from_millis(100));
    }

    #[test]
    fn bad_overrides_are_rejected() {
        let overrides = Overrides {
            alpha: Some(1.5),
            ..Overrides::default()
        };
        assert!(apply_overrides(ClientPrefs::default(), &overrides).is_err());

        let prefs = ClientPrefs {
            message_kinds: vec!["heartbeat".into()],
            ..ClientPrefs::default()
        };
        assert!(sync_config(&prefs, None).is_err());
    }
}
