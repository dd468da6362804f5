/*
 * error.rs
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

//! Request and session errors.

use std::io;

use thiserror::Error;

use super::response::SoapResponse;
use super::xml::FaultInfo;

/// Outcome of a request that did not produce a response for its callback.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    /// Connect, TLS, read or write failed (or the peer closed) while the request was queued
    /// or in flight.
    #[error("transport error: {message}")]
    Transport { kind: io::ErrorKind, message: String },

    /// The connection was torn down before the request was answered.
    #[error("request aborted")]
    Aborted,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("too many redirects ({0})")]
    TooManyRedirects(u8),

    /// 401; the reason is the `cbtxt` text of `WWW-Authenticate` when present.
    #[error("unauthorized{}", .0.as_deref().map(|r| format!(": {}", r)).unwrap_or_default())]
    Unauthorized(Option<String>),

    #[error("service unavailable")]
    ServiceUnavailable,

    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    /// Lock-key challenge cycle gave up.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(FaultInfo),
}

impl RequestError {
    pub fn transport(kind: io::ErrorKind, message: impl Into<String>) -> Self {
        RequestError::Transport {
            kind,
            message: message.into(),
        }
    }
}

impl From<io::Error> for RequestError {
    fn from(e: io::Error) -> Self {
        RequestError::transport(e.kind(), e.to_string())
    }
}

/// What a request's completion callback receives.
pub type RequestResult = Result<SoapResponse, RequestError>;

/// Conditions reported to the session rather than (only) to one request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The passport ticket was refused (HTTP 401).
    #[error("unauthorized{}", .reason.as_deref().map(|r| format!(": {}", r)).unwrap_or_default())]
    Unauthorized { reason: Option<String> },

    #[error("service unavailable")]
    ServiceUnavailable,

    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    /// A lock-key challenge could not be answered.
    #[error("lock key challenge rejected")]
    ChallengeRejected,

    #[error("connection to {host} lost: {message}")]
    ConnectionLost { host: String, message: String },
}
