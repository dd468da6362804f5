/*
 * uri.rs
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

//! SOAP endpoints: host, port and request path. Redirect targets arrive as
//! `scheme://host[:port][/path]` (HTTP `Location` header or a fault's `redirectUrl`)
//! and are split here into a new endpoint.

use std::fmt;

/// Default port for SOAP web services (implicit TLS).
pub const DEFAULT_SOAP_PORT: u16 = 443;

/// One SOAP destination: host, port and path used in the request line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

/// Normalize path for the request line: ensure a single leading slash.
fn path_with_leading_slash(path: &str) -> String {
    let path = path.trim_start_matches('/');
    format!("/{}", path)
}

impl Endpoint {
    /// Endpoint on the default SOAP port.
    pub fn new(host: impl Into<String>, path: &str) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SOAP_PORT,
            path: path_with_leading_slash(path),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// True if both endpoints can share one socket (same host and port; path may differ).
    pub fn same_authority(&self, other: &Endpoint) -> bool {
        self.port == other.port && self.host.eq_ignore_ascii_case(&other.host)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, self.path)
    }
}

/// Split a redirect target of the form `scheme://host[:port][/path]`.
///
/// The scheme is required but otherwise ignored: the transport security mode comes from
/// configuration, not from the redirect. Missing port falls back to `default_port`,
/// missing path to `/`. Returns None for anything without a scheme or host.
pub fn parse_redirect_url(url: &str, default_port: u16) -> Option<Endpoint> {
    let url = url.trim();
    let (scheme, rest) = url.split_once("://")?;
    if scheme.is_empty() {
        return None;
    }
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };
    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => (h, p.parse::<u16>().ok()?),
        None => (authority, default_port),
    };
    if host.is_empty() {
        return None;
    }
    Some(Endpoint {
        host: host.to_string(),
        port,
        path: path_with_leading_slash(path),
    })
}
