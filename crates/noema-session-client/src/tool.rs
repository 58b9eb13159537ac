// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tool-facing session adapter: a port trait plus an inbox-backed
//! implementation.
//!
//! Consumers (the sync engine, the tail CLI) drain events on their own tick
//! through [`SessionPort`] without knowing which transport produced them.

use crate::session::{SessionEvent, SessionInbox};

/// Abstract port for receiving session events.
pub trait SessionPort {
    /// Drain up to `max` queued events without waiting.
    fn drain_events(&mut self, max: usize) -> Vec<SessionEvent>;
    /// True once the session behind the port delivered `Closed`, or when no
    /// session is installed.
    fn is_closed(&self) -> bool;
    /// Drop the installed session, discarding anything still queued.
    fn clear(&mut self);
}

impl SessionPort for SessionInbox {
    fn drain_events(&mut self, max: usize) -> Vec<SessionEvent> {
        self.drain(max)
    }

    fn is_closed(&self) -> bool {
        SessionInbox::is_closed(self)
    }

    fn clear(&mut self) {
        while self.try_recv().is_some() {}
    }
}

/// Holds the inbox of the current session, if any.
#[derive(Debug, Default)]
pub struct InboxPort {
    inbox: Option<SessionInbox>,
}

impl InboxPort {
    /// Construct a new, empty port.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the inbox of a freshly opened session, replacing any previous one.
    pub fn set_inbox(&mut self, inbox: SessionInbox) {
        self.inbox = Some(inbox);
    }

    /// Session id of the installed inbox.
    pub fn session_id(&self) -> Option<&str> {
        self.inbox.as_ref().map(SessionInbox::session_id)
    }
}

impl SessionPort for InboxPort {
    fn drain_events(&mut self, max: usize) -> Vec<SessionEvent> {
        self.inbox
            .as_mut()
            .map_or_else(Vec::new, |inbox| inbox.drain(max))
    }

    fn is_closed(&self) -> bool {
        self.inbox.as_ref().is_none_or(SessionInbox::is_closed)
    }

    fn clear(&mut self) {
        self.inbox = None;
    }
}
