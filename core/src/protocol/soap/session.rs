/*
 * session.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Chiacchiera, a cross-platform messenger plugin.
 *
 * Chiacchiera is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Chiacchiera is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Chiacchiera.  If not, see <http://www.gnu.org/licenses/>.
 */

//! The session a connection works for: where the passport ticket comes from and where
//! session-level errors go.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::warn;

use super::error::SessionError;

pub trait Session: Send + Sync {
    /// Current `MSPAuth` ticket for the `Cookie` header.
    fn ticket(&self) -> String;

    /// A condition the whole session should react to (sign-out, retry later, ...).
    fn session_error(&self, error: SessionError);
}

/// Session that keeps the ticket behind a mutex and forwards errors over a channel.
pub struct ChannelSession {
    ticket: Mutex<String>,
    errors: mpsc::UnboundedSender<SessionError>,
}

impl ChannelSession {
    pub fn new(ticket: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionError>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            ticket: Mutex::new(ticket.into()),
            errors: tx,
        });
        (session, rx)
    }

    /// Replace the ticket after an SSO exchange; later requests use the new one.
    pub fn set_ticket(&self, ticket: impl Into<String>) {
        *self.ticket.lock().unwrap_or_else(PoisonError::into_inner) = ticket.into();
    }
}

impl Session for ChannelSession {
    fn ticket(&self) -> String {
        self.ticket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn session_error(&self, error: SessionError) {
        if self.errors.send(error).is_err() {
            warn!("session error dropped, receiver gone");
        }
    }
}
