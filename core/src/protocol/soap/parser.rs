/*
 * parser.rs
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

//! Response framing for SOAP replies: status line, headers, then exactly `Content-Length`
//! body bytes. Chunked transfer encoding is never used by the services and is not handled.
//!
//! All functions are pure and work on whatever has accumulated so far; a `None` means
//! "not yet", and calling again with more bytes is always safe.

use std::io;

use bytes::Bytes;
use percent_encoding::percent_decode_str;

use super::response::{SoapResponse, StatusClass};

/// Largest response accepted, head and body together. Address books for large contact
/// lists run to a few megabytes.
pub const MAX_RESPONSE_SIZE: usize = 16 * 1024 * 1024;

/// Offset of the first body byte (just past the first `\r\n\r\n`), if the head is complete.
pub fn find_header_body_boundary(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Find CRLF in buf; return the number of bytes before it.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Status code from `HTTP/1.1 200 OK` (reason phrase optional).
pub fn status_code(head: &[u8]) -> Option<u16> {
    let line_end = find_crlf(head).unwrap_or(head.len());
    let line = std::str::from_utf8(&head[..line_end]).ok()?;
    let parts: Vec<&str> = line.splitn(3, ' ').collect();
    if !parts.first()?.starts_with("HTTP/") {
        return None;
    }
    parts.get(1).and_then(|s| s.parse::<u16>().ok())
}

/// Classify the status line at the start of `bytes`. Anything unreadable is `Unknown`.
pub fn status_class(bytes: &[u8]) -> StatusClass {
    status_code(bytes).map(StatusClass::of).unwrap_or(StatusClass::Unknown)
}

/// Header lines after the status line, as trimmed (name, value) pairs.
fn header_lines(head: &str) -> impl Iterator<Item = (&str, &str)> {
    head.split("\r\n").skip(1).filter_map(|line| {
        let colon = line.find(':')?;
        Some((line[..colon].trim(), line[colon + 1..].trim()))
    })
}

/// Value of the first header called `name` (case-insensitive) in a response head.
pub fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    header_lines(head)
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

/// Declared body length. Absent or unparseable means the response never completes.
pub fn content_length(head: &str) -> Option<usize> {
    header_value(head, "Content-Length").and_then(|v| v.parse::<usize>().ok())
}

/// Human-readable reason from a Passport `WWW-Authenticate` header: the `cbtxt=` field,
/// percent-decoded, e.g. `...,cbtxt=Invalid%20credentials` gives `Invalid credentials`.
pub fn cbtxt_reason(www_authenticate: &str) -> Option<String> {
    let start = www_authenticate.find("cbtxt=")? + "cbtxt=".len();
    let rest = &www_authenticate[start..];
    let raw = rest.split(',').next().unwrap_or(rest).trim().trim_matches('"');
    if raw.is_empty() {
        return None;
    }
    Some(percent_decode_str(raw).decode_utf8_lossy().into_owned())
}

/// Frame one response from the front of `buf`.
///
/// Returns the response and the number of bytes it occupied, or `Ok(None)` while the head
/// or body is still incomplete. A head that is not UTF-8 or has no status code is an
/// `InvalidData` error, as is a response larger than [`MAX_RESPONSE_SIZE`].
pub fn parse_response(buf: &[u8]) -> io::Result<Option<(SoapResponse, usize)>> {
    let body_start = match find_header_body_boundary(buf) {
        Some(n) => n,
        None if buf.len() > MAX_RESPONSE_SIZE => {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "response head too large"))
        }
        None => return Ok(None),
    };
    let head = std::str::from_utf8(&buf[..body_start - 4]).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidData, "invalid response head UTF-8")
    })?;
    let status = status_code(head.as_bytes()).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "invalid status line")
    })?;
    let length = match content_length(head) {
        Some(n) => n,
        None if buf.len() > MAX_RESPONSE_SIZE => {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "response without Content-Length too large"))
        }
        None => return Ok(None),
    };
    let end = match body_start.checked_add(length) {
        Some(end) if end <= MAX_RESPONSE_SIZE => end,
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Content-Length {} too large", length),
            ))
        }
    };
    if buf.len() < end {
        return Ok(None);
    }
    let headers = header_lines(head)
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .collect();
    let response = SoapResponse {
        status,
        class: StatusClass::of(status),
        headers,
        body: Bytes::copy_from_slice(&buf[body_start..end]),
        content_length: length,
    };
    Ok(Some((response, end)))
}
