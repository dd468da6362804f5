/*
 * queue.rs
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

//! FIFO of requests bound to one connection, with a single in-flight slot.

use std::collections::VecDeque;

use tracing::debug;

use super::connection::ConnectionState;
use super::error::RequestError;
use super::request::SoapRequest;

#[derive(Debug, Default)]
pub struct RequestQueue {
    pending: VecDeque<SoapRequest>,
    in_flight: Option<SoapRequest>,
    next_id: u64,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the creation id and append. Returns the id.
    pub fn enqueue(&mut self, mut request: SoapRequest) -> u64 {
        self.next_id += 1;
        request.set_id(self.next_id);
        debug!(id = self.next_id, kind = %request.kind(), "request queued");
        self.pending.push_back(request);
        self.next_id
    }

    /// Put a request back at the head so it is the next one sent (redirects, resends).
    pub fn requeue_front(&mut self, request: SoapRequest) {
        self.pending.push_front(request);
    }

    /// Next request to be sent (the head of the pending queue).
    pub fn front(&self) -> Option<&SoapRequest> {
        self.pending.front()
    }

    /// Move the head into the in-flight slot, if the connection can send and nothing is in
    /// flight. Returns the request to write.
    pub fn dispatch_next(&mut self, state: ConnectionState) -> Option<&mut SoapRequest> {
        if !matches!(state, ConnectionState::Connected | ConnectionState::ConnectedIdle) {
            return None;
        }
        if self.in_flight.is_some() {
            return None;
        }
        self.in_flight = self.pending.pop_front();
        self.in_flight.as_mut()
    }

    pub fn in_flight(&self) -> Option<&SoapRequest> {
        self.in_flight.as_ref()
    }

    pub fn in_flight_mut(&mut self) -> Option<&mut SoapRequest> {
        self.in_flight.as_mut()
    }

    pub fn take_in_flight(&mut self) -> Option<SoapRequest> {
        self.in_flight.take()
    }

    /// Requests waiting to be sent (not counting the one in flight).
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Nothing pending and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.pending.is_empty()
    }

    /// Fail every request, in-flight first then pending in FIFO order. Returns how many
    /// were completed.
    pub fn flush(&mut self, error: RequestError) -> usize {
        let mut count = 0;
        if let Some(request) = self.in_flight.take() {
            request.complete(Err(error.clone()));
            count += 1;
        }
        while let Some(request) = self.pending.pop_front() {
            request.complete(Err(error.clone()));
            count += 1;
        }
        if count > 0 {
            debug!(count, error = %error, "queue flushed");
        }
        count
    }
}
