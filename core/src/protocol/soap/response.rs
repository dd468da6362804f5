/*
 * response.rs
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

//! A complete SOAP response as framed by the parser.

use std::borrow::Cow;

use bytes::Bytes;

use super::xml::{self, FaultInfo};

/// How the connection treats a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 301 or 302: follow `Location`.
    Redirect,
    /// 401: session-level authentication failure.
    Unauthorized,
    /// 503
    ServiceUnavailable,
    /// 200 or 500: the body may carry a SOAP Fault.
    OkOrFaultPossible,
    Unknown,
}

impl StatusClass {
    pub fn of(code: u16) -> Self {
        match code {
            301 | 302 => StatusClass::Redirect,
            401 => StatusClass::Unauthorized,
            503 => StatusClass::ServiceUnavailable,
            200 | 500 => StatusClass::OkOrFaultPossible,
            _ => StatusClass::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SoapResponse {
    pub status: u16,
    pub class: StatusClass,
    /// Header names as received; look up with [`SoapResponse::header`].
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// Body length declared by `Content-Length`; always equal to `body.len()`.
    pub content_length: usize,
}

impl SoapResponse {
    /// First header with this name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// The SOAP Fault in the body, if any.
    pub fn fault(&self) -> Option<FaultInfo> {
        if self.body.is_empty() {
            return None;
        }
        xml::extract_fault(&self.body)
    }

    pub fn is_fault(&self) -> bool {
        self.fault().is_some()
    }

    /// Text of the element at `path` below the document root, e.g. `Body/Fault/faultcode`.
    pub fn text_at(&self, path: &str) -> Option<String> {
        xml::text_at(&self.body, path)
    }
}
