/*
 * auth.rs
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

//! Lock-key challenge cycle for offline-message requests.
//!
//! The OIM service answers an unknown or stale lock key with an `AuthenticationFailed`
//! fault carrying a `LockKeyChallenge`. The response to the challenge becomes the lock key
//! for this and later requests, and the failed request is sent again with its original
//! sequence number.

use tracing::{debug, warn};

use super::challenge::lock_key_response;
use super::request::{Credential, SoapRequest};
use super::xml::FaultInfo;
use crate::config::ChallengeKeys;

/// What to do with a request that got an `AuthenticationFailed` fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    /// Requeue it at the head; its body will be recomposed with the current lock key.
    Resend,
    /// Fail it with the fault.
    Terminal,
}

/// Lock key and sequence counter shared by every request on one connection.
#[derive(Debug)]
pub struct AuthChallengeCycle {
    lock_key: Option<String>,
    sequence: u64,
    keys: ChallengeKeys,
    max_resends: u8,
}

impl AuthChallengeCycle {
    pub fn new(keys: ChallengeKeys, max_resends: u8) -> Self {
        Self {
            lock_key: None,
            sequence: 1,
            keys,
            max_resends,
        }
    }

    pub fn lock_key(&self) -> Option<&str> {
        self.lock_key.as_deref()
    }

    /// Sequence number the next new request will get.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Compose the body for the next transmission of `request`. The sequence number is
    /// fixed at the first call and reused afterwards.
    pub fn prepare(&self, request: &mut SoapRequest) {
        if let Some(auth) = request.auth.as_mut() {
            let sequence = *auth.sequence.get_or_insert(self.sequence);
            let credential = Credential {
                lock_key: self.lock_key.clone(),
                sequence,
            };
            request.body = auth.compose(&credential);
        }
    }

    /// `request` has been written. Advance the counter, once per logical request, when it
    /// went out with a lock key.
    pub fn transmitted(&mut self, request: &mut SoapRequest) {
        let auth = match request.auth.as_mut() {
            Some(auth) => auth,
            None => return,
        };
        if auth.counted || self.lock_key.is_none() {
            return;
        }
        if let Some(sequence) = auth.sequence {
            self.sequence = self.sequence.max(sequence + 1);
            auth.counted = true;
        }
    }

    pub fn on_fault(&mut self, request: &mut SoapRequest, fault: &FaultInfo) -> AuthDecision {
        let id = request.id();
        let auth = match request.auth.as_mut() {
            Some(auth) => auth,
            None => return AuthDecision::Terminal,
        };
        if auth.resends >= self.max_resends {
            warn!(id, resends = auth.resends, "lock key resend limit reached");
            return AuthDecision::Terminal;
        }
        match fault.lock_key_challenge() {
            Some(challenge) => {
                if auth.last_challenge.as_deref() == Some(challenge) {
                    warn!(id, challenge, "same lock key challenge twice");
                    return AuthDecision::Terminal;
                }
                let key = lock_key_response(challenge, &self.keys);
                debug!(id, challenge, "answered lock key challenge");
                self.lock_key = Some(key);
                auth.last_challenge = Some(challenge.to_string());
            }
            None if self.lock_key.is_some() && !auth.cleared => {
                debug!(id, "lock key refused without challenge, clearing it");
                self.lock_key = None;
                auth.cleared = true;
            }
            None => return AuthDecision::Terminal,
        }
        auth.resends += 1;
        AuthDecision::Resend
    }
}
