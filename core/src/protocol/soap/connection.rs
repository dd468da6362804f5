/*
 * connection.rs
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

//! SOAP connection state machine.
//!
//! One connection serves one queue of requests, one request on the wire at a time. The
//! connection issues transport commands and reacts to transport events; it never blocks
//! and never touches a socket itself.
//!
//! ```text
//! Unconnected --connect--> Connecting --on_connected--> Connected --write--> Processing
//!      ^                                                                         |
//!      +------ response (per-response policy), redirect, error -----------------+
//!                                        ConnectedIdle <-- response (keep-alive) -+
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tracing::{debug, info, warn};

use super::auth::{AuthChallengeCycle, AuthDecision};
use super::error::{RequestError, SessionError};
use super::parser::{self, cbtxt_reason};
use super::queue::RequestQueue;
use super::request::{encode_request, SoapRequest};
use super::response::{SoapResponse, StatusClass};
use super::session::Session;
use super::transport::Transport;
use crate::config::{ReconnectPolicy, SoapConfig};
use crate::uri::{parse_redirect_url, Endpoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    /// Socket up, nothing written yet.
    Connected,
    /// A request is on the wire and its response is awaited.
    Processing,
    /// Socket kept open after a response, nothing to send.
    ConnectedIdle,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Processing => "processing",
            ConnectionState::ConnectedIdle => "connected-idle",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct SoapConnection<T: Transport> {
    transport: T,
    config: SoapConfig,
    session: Arc<dyn Session>,
    state: ConnectionState,
    /// Where the current socket goes.
    endpoint: Option<Endpoint>,
    read_buf: BytesMut,
    queue: RequestQueue,
    auth: AuthChallengeCycle,
}

impl<T: Transport> SoapConnection<T> {
    pub fn new(transport: T, config: SoapConfig, session: Arc<dyn Session>) -> Self {
        let auth = AuthChallengeCycle::new(config.challenge.clone(), config.max_auth_resends);
        Self {
            transport,
            config,
            session,
            state: ConnectionState::Unconnected,
            endpoint: None,
            read_buf: BytesMut::with_capacity(8192),
            queue: RequestQueue::new(),
            auth,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &SoapConfig {
        &self.config
    }

    /// Endpoint of the current (or connecting) socket.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn auth(&self) -> &AuthChallengeCycle {
        &self.auth
    }

    /// A request is on the wire.
    pub fn awaiting_response(&self) -> bool {
        self.queue.in_flight().is_some()
    }

    /// Requests not yet answered, including the one in flight.
    pub fn pending(&self) -> usize {
        self.queue.len() + usize::from(self.awaiting_response())
    }

    /// Queue a request and get things moving. Returns its id.
    pub fn enqueue(&mut self, request: SoapRequest) -> u64 {
        let id = self.queue.enqueue(request);
        match self.state {
            ConnectionState::Unconnected => self.connect_head(),
            ConnectionState::Connected | ConnectionState::ConnectedIdle => self.dispatch(),
            ConnectionState::Connecting | ConnectionState::Processing => {}
        }
        id
    }

    // ── Transport events ──────────────────────────────────────────────

    pub fn on_connected(&mut self) {
        if self.state != ConnectionState::Connecting {
            warn!(state = %self.state, "connected event in unexpected state");
            return;
        }
        if let Some(endpoint) = &self.endpoint {
            debug!(host = %endpoint.host, port = endpoint.port, "soap connection established");
        }
        self.state = ConnectionState::Connected;
        self.dispatch();
    }

    /// The in-flight request's bytes have all been written.
    pub fn on_write_complete(&mut self) {
        if let Some(request) = self.queue.in_flight_mut() {
            if let Some(on_written) = request.take_on_written() {
                on_written();
            }
            self.auth.transmitted(request);
        }
    }

    pub fn on_data(&mut self, data: &[u8]) {
        if !self.awaiting_response() {
            warn!(len = data.len(), state = %self.state, "discarding data with no request in flight");
            return;
        }
        self.read_buf.extend_from_slice(data);
        match parser::parse_response(&self.read_buf) {
            Ok(None) => {}
            Ok(Some((response, used))) => {
                self.read_buf.advance(used);
                if !self.read_buf.is_empty() {
                    warn!(len = self.read_buf.len(), "discarding bytes after response");
                    self.read_buf.clear();
                }
                self.handle_response(response);
            }
            Err(e) => {
                warn!(error = %e, "unparseable response");
                if let Some(request) = self.queue.take_in_flight() {
                    request.complete(Err(RequestError::Malformed(e.to_string())));
                }
                self.close_socket();
                self.connect_head();
            }
        }
    }

    /// Fatal transport error: drop the socket and fail every queued request.
    pub fn on_error(&mut self, error: io::Error) {
        let host = self
            .endpoint
            .as_ref()
            .map(|e| e.host.clone())
            .unwrap_or_default();
        self.close_socket();
        let failed = self
            .queue
            .flush(RequestError::transport(error.kind(), error.to_string()));
        if failed == 0 {
            debug!(host = %host, error = %error, "transport error with nothing queued");
            return;
        }
        warn!(host = %host, error = %error, failed, "soap connection lost");
        self.session.session_error(SessionError::ConnectionLost {
            host,
            message: error.to_string(),
        });
    }

    /// Peer closed the connection.
    pub fn on_closed(&mut self) {
        if self.awaiting_response() || self.state == ConnectionState::Connecting {
            self.on_error(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            ));
            return;
        }
        debug!(state = %self.state, "idle soap connection closed by peer");
        self.close_socket();
        self.connect_head();
    }

    /// A connect or an awaited read took too long.
    pub fn on_timeout(&mut self) {
        if self.awaiting_response() || self.state == ConnectionState::Connecting {
            self.on_error(io::Error::new(io::ErrorKind::TimedOut, "soap request timed out"));
        }
    }

    /// Drop the socket and fail everything still queued with `Aborted`.
    pub fn teardown(&mut self) {
        if self.state != ConnectionState::Unconnected {
            self.close_socket();
        }
        self.queue.flush(RequestError::Aborted);
    }

    // ── Internals ─────────────────────────────────────────────────────

    fn connect_head(&mut self) {
        let endpoint = match self.queue.front() {
            Some(request) => request.endpoint().clone(),
            None => return,
        };
        info!(host = %endpoint.host, port = endpoint.port, path = %endpoint.path, "connecting");
        self.state = ConnectionState::Connecting;
        self.read_buf.clear();
        self.transport.connect(&endpoint);
        self.endpoint = Some(endpoint);
    }

    fn close_socket(&mut self) {
        if self.state != ConnectionState::Unconnected {
            self.transport.close();
        }
        self.state = ConnectionState::Unconnected;
        self.endpoint = None;
        self.read_buf.clear();
    }

    /// Write the head request if the socket is free.
    fn dispatch(&mut self) {
        if !matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::ConnectedIdle
        ) || self.awaiting_response()
        {
            return;
        }
        let needs_other_host = match (self.queue.front(), &self.endpoint) {
            (Some(head), Some(current)) => !head.endpoint().same_authority(current),
            _ => false,
        };
        if needs_other_host {
            debug!("next request targets another host, reconnecting");
            self.close_socket();
            self.connect_head();
            return;
        }
        let ticket = self.session.ticket();
        let request = match self.queue.dispatch_next(self.state) {
            Some(request) => request,
            None => {
                self.state = ConnectionState::ConnectedIdle;
                return;
            }
        };
        self.auth.prepare(request);
        let wire = encode_request(request, &ticket, &self.config.user_agent);
        debug!(
            id = request.id(),
            kind = %request.kind(),
            path = %request.endpoint().path,
            len = wire.len(),
            "sending soap request"
        );
        self.state = ConnectionState::Processing;
        self.transport.write(wire);
    }

    fn handle_response(&mut self, response: SoapResponse) {
        let mut request = match self.queue.take_in_flight() {
            Some(request) => request,
            None => return,
        };
        debug!(id = request.id(), status = response.status, len = response.content_length, "soap response");
        match response.class {
            StatusClass::Redirect => {
                let target = response
                    .header("Location")
                    .and_then(|l| parse_redirect_url(l, self.config.port));
                match target {
                    Some(target) => return self.redirect(request, target),
                    None => request.complete(Err(RequestError::Malformed(
                        "redirect without a usable Location".into(),
                    ))),
                }
            }
            StatusClass::Unauthorized => {
                let reason = response.header("WWW-Authenticate").and_then(cbtxt_reason);
                warn!(id = request.id(), reason = ?reason, "ticket refused");
                self.session.session_error(SessionError::Unauthorized {
                    reason: reason.clone(),
                });
                request.complete(Err(RequestError::Unauthorized(reason)));
            }
            StatusClass::ServiceUnavailable => {
                warn!(id = request.id(), "service unavailable");
                self.session.session_error(SessionError::ServiceUnavailable);
                request.complete(Err(RequestError::ServiceUnavailable));
            }
            StatusClass::OkOrFaultPossible => match response.fault() {
                Some(fault) if fault.is_redirect() => {
                    let target = fault
                        .redirect_url
                        .as_deref()
                        .and_then(|u| parse_redirect_url(u, self.config.port));
                    match target {
                        Some(target) => return self.redirect(request, target),
                        None => request.complete(Err(RequestError::Malformed(
                            "redirect fault without a usable redirectUrl".into(),
                        ))),
                    }
                }
                Some(fault) if fault.is_authentication_failed() && request.has_challenge() => {
                    match self.auth.on_fault(&mut request, &fault) {
                        AuthDecision::Resend => {
                            debug!(id = request.id(), sequence = ?request.sequence(), "resending with lock key");
                            self.queue.requeue_front(request);
                        }
                        AuthDecision::Terminal => {
                            warn!(id = request.id(), fault = %fault, "lock key challenge failed");
                            self.session.session_error(SessionError::ChallengeRejected);
                            request.complete(Err(RequestError::AuthenticationFailed(fault)));
                        }
                    }
                }
                _ => request.complete(Ok(response)),
            },
            StatusClass::Unknown => {
                warn!(id = request.id(), status = response.status, "unexpected HTTP status");
                self.session
                    .session_error(SessionError::HttpStatus(response.status));
                request.complete(Err(RequestError::HttpStatus(response.status)));
            }
        }
        self.after_response();
    }

    /// Send `request` again, unchanged apart from its destination.
    fn redirect(&mut self, mut request: SoapRequest, target: Endpoint) {
        if request.redirects >= self.config.max_redirects {
            warn!(id = request.id(), hops = request.redirects, "too many redirects");
            let hops = request.redirects;
            request.complete(Err(RequestError::TooManyRedirects(hops)));
            self.after_response();
            return;
        }
        info!(id = request.id(), from = %request.endpoint, to = %target, "following redirect");
        request.redirects += 1;
        request.endpoint = target;
        self.queue.requeue_front(request);
        self.close_socket();
        self.connect_head();
    }

    fn after_response(&mut self) {
        match self.config.reconnect {
            ReconnectPolicy::PerResponse => {
                self.close_socket();
                self.connect_head();
            }
            ReconnectPolicy::KeepAlive => {
                self.state = ConnectionState::ConnectedIdle;
                self.dispatch();
            }
        }
    }
}

impl<T: Transport> Drop for SoapConnection<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::soap::request::{Credential, PartnerScenario, RequestKind};
    use crate::protocol::soap::transport::{IoCommand, IoQueue};
    use crate::protocol::soap::error::RequestResult;
    use bytes::Bytes;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSession {
        errors: Mutex<Vec<SessionError>>,
    }

    impl Session for RecordingSession {
        fn ticket(&self) -> String {
            "t=ticket&p=profile".to_string()
        }

        fn session_error(&self, error: SessionError) {
            self.errors.lock().unwrap().push(error);
        }
    }

    type Log = Arc<Mutex<Vec<(String, RequestResult)>>>;

    fn setup(config: SoapConfig) -> (SoapConnection<IoQueue>, Arc<RecordingSession>, Log) {
        let session = Arc::new(RecordingSession::default());
        let conn = SoapConnection::new(IoQueue::new(), config, session.clone());
        (conn, session, Arc::new(Mutex::new(Vec::new())))
    }

    fn request(log: &Log, name: &str, endpoint: Endpoint) -> SoapRequest {
        let log = log.clone();
        let name = name.to_string();
        SoapRequest::new(
            RequestKind::FetchAddressBook { scenario: PartnerScenario::Initial },
            format!("<body>{}</body>", name),
            move |_, result| log.lock().unwrap().push((name, result)),
        )
        .with_endpoint(endpoint)
    }

    fn ab() -> Endpoint {
        Endpoint::new("omega.contacts.msn.com", "/abservice/abservice.asmx")
    }

    fn http(status: &str, headers: &[&str], body: &str) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {}\r\n", status);
        for h in headers {
            out.push_str(h);
            out.push_str("\r\n");
        }
        out.push_str(&format!("Content-Length: {}\r\n\r\n{}", body.len(), body));
        out.into_bytes()
    }

    fn fault_body(code: &str, extra: &str) -> String {
        format!(
            "<soap:Envelope xmlns:soap=\"s\"><soap:Body><soap:Fault>\
             <faultcode>{}</faultcode><faultstring>fault</faultstring>{}\
             </soap:Fault></soap:Body></soap:Envelope>",
            code, extra
        )
    }

    fn written(cmd: Option<IoCommand>) -> String {
        match cmd {
            Some(IoCommand::Write(data)) => String::from_utf8(data.to_vec()).unwrap(),
            other => panic!("expected write, got {:?}", other),
        }
    }

    fn names(log: &Log) -> Vec<String> {
        log.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
    }

    /// Connect, write and complete the write for the head request; returns the wire text.
    fn open_and_send(conn: &mut SoapConnection<IoQueue>) -> String {
        assert!(matches!(conn.transport_mut().pop(), Some(IoCommand::Connect(_))));
        conn.on_connected();
        let wire = written(conn.transport_mut().pop());
        conn.on_write_complete();
        wire
    }

    #[test]
    fn state_names() {
        assert_eq!(ConnectionState::ConnectedIdle.to_string(), "connected-idle");
        assert_eq!(ConnectionState::Unconnected.as_str(), "unconnected");
    }

    #[test]
    fn enqueue_connects_then_writes() {
        let (mut conn, _, log) = setup(SoapConfig::default());
        conn.enqueue(request(&log, "a", ab()));
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(conn.transport_mut().pop(), Some(IoCommand::Connect(ab())));
        conn.on_connected();
        assert_eq!(conn.state(), ConnectionState::Processing);
        let wire = written(conn.transport_mut().pop());
        assert!(wire.starts_with("POST /abservice/abservice.asmx HTTP/1.1\r\n"));
        assert!(wire.contains("Cookie: MSPAuth=t=ticket&p=profile\r\n"));
        assert!(wire.ends_with("\r\n\r\n<body>a</body>"));
    }

    #[test]
    fn requests_complete_in_order_one_at_a_time() {
        let (mut conn, _, log) = setup(SoapConfig::default());
        conn.enqueue(request(&log, "a", ab()));
        conn.enqueue(request(&log, "b", ab()));
        let wire_a = open_and_send(&mut conn);
        assert!(wire_a.ends_with("<body>a</body>"));
        assert!(conn.transport_mut().is_empty(), "b must wait for a's response");

        conn.on_data(&http("200 OK", &[], "<ok/>"));
        assert_eq!(names(&log), ["a"]);
        assert_eq!(conn.transport_mut().pop(), Some(IoCommand::Close));
        let wire_b = open_and_send(&mut conn);
        assert!(wire_b.ends_with("<body>b</body>"));
        conn.on_data(&http("200 OK", &[], "<ok/>"));
        assert_eq!(names(&log), ["a", "b"]);
        assert!(log.lock().unwrap().iter().all(|(_, r)| r.is_ok()));
        assert_eq!(conn.state(), ConnectionState::Unconnected);
    }

    #[test]
    fn response_split_into_single_bytes() {
        let (mut conn, _, log) = setup(SoapConfig::default());
        conn.enqueue(request(&log, "a", ab()));
        open_and_send(&mut conn);
        let raw = http("200 OK", &["Content-Type: text/xml"], &"x".repeat(57));
        for b in &raw {
            conn.on_data(std::slice::from_ref(b));
        }
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        let resp = log[0].1.as_ref().unwrap();
        assert_eq!(resp.body.len(), 57);
    }

    #[test]
    fn http_redirect_reissues_same_request() {
        let (mut conn, _, log) = setup(SoapConfig::default());
        conn.enqueue(request(&log, "a", ab()));
        let first = open_and_send(&mut conn);
        conn.on_data(&http("302 Found", &["Location: http://h2/p2"], ""));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(conn.transport_mut().pop(), Some(IoCommand::Close));
        assert_eq!(
            conn.transport_mut().pop(),
            Some(IoCommand::Connect(Endpoint::new("h2", "/p2")))
        );
        conn.on_connected();
        let second = written(conn.transport_mut().pop());
        assert!(second.starts_with("POST /p2 HTTP/1.1\r\n"));
        assert!(second.contains("Host: h2\r\n"));
        let headers_only = |w: &str| -> String {
            w.lines().filter(|l| !l.starts_with("POST ") && !l.starts_with("Host: ")).collect()
        };
        assert_eq!(headers_only(&first), headers_only(&second));
        conn.on_data(&http("200 OK", &[], "<ok/>"));
        assert_eq!(names(&log), ["a"]);
    }

    #[test]
    fn fault_redirect_is_followed() {
        let (mut conn, _, log) = setup(SoapConfig::default());
        conn.enqueue(request(&log, "a", ab()));
        open_and_send(&mut conn);
        let body = fault_body(
            "psf:Redirect",
            "<psf:redirectUrl>https://by2.omega.contacts.msn.com/abservice/abservice.asmx</psf:redirectUrl>",
        );
        conn.on_data(&http("500 Internal Server Error", &[], &body));
        assert_eq!(conn.transport_mut().pop(), Some(IoCommand::Close));
        match conn.transport_mut().pop() {
            Some(IoCommand::Connect(e)) => assert_eq!(e.host, "by2.omega.contacts.msn.com"),
            other => panic!("expected connect, got {:?}", other),
        }
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn redirect_without_location_fails_request() {
        let (mut conn, _, log) = setup(SoapConfig::default());
        conn.enqueue(request(&log, "a", ab()));
        conn.enqueue(request(&log, "b", ab()));
        open_and_send(&mut conn);
        conn.on_data(&http("301 Moved Permanently", &[], ""));
        {
            let log = log.lock().unwrap();
            assert!(matches!(log[0].1, Err(RequestError::Malformed(_))));
        }
        assert_eq!(conn.transport_mut().pop(), Some(IoCommand::Close));
        assert!(matches!(conn.transport_mut().pop(), Some(IoCommand::Connect(_))));
        conn.teardown();
    }

    #[test]
    fn redirect_hops_are_bounded() {
        let config = SoapConfig {
            max_redirects: 1,
            ..SoapConfig::default()
        };
        let (mut conn, _, log) = setup(config);
        conn.enqueue(request(&log, "a", ab()));
        open_and_send(&mut conn);
        conn.on_data(&http("302 Found", &["Location: http://h2/p2"], ""));
        conn.transport_mut().drain();
        conn.on_connected();
        conn.transport_mut().drain();
        conn.on_data(&http("302 Found", &["Location: http://h3/p3"], ""));
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert!(matches!(log[0].1, Err(RequestError::TooManyRedirects(1))));
    }

    #[test]
    fn redirect_keeps_queue_order() {
        let (mut conn, _, log) = setup(SoapConfig::default());
        conn.enqueue(request(&log, "a", ab()));
        conn.enqueue(request(&log, "b", ab()));
        open_and_send(&mut conn);
        conn.on_data(&http("302 Found", &["Location: http://h2/p2"], ""));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(conn.transport_mut().pop(), Some(IoCommand::Close));
        assert_eq!(
            conn.transport_mut().pop(),
            Some(IoCommand::Connect(Endpoint::new("h2", "/p2")))
        );
        conn.on_connected();
        let reissued = written(conn.transport_mut().pop());
        assert!(reissued.starts_with("POST /p2 HTTP/1.1\r\n"));
        assert!(reissued.ends_with("<body>a</body>"));
        conn.on_write_complete();
        assert!(conn.transport_mut().is_empty(), "b must wait for a's response");

        conn.on_data(&http("200 OK", &[], "<ok/>"));
        assert_eq!(names(&log), ["a"]);
        assert_eq!(conn.transport_mut().pop(), Some(IoCommand::Close));
        let wire_b = open_and_send(&mut conn);
        assert!(wire_b.starts_with("POST /abservice/abservice.asmx HTTP/1.1\r\n"));
        assert!(wire_b.ends_with("<body>b</body>"));
        conn.on_data(&http("200 OK", &[], "<ok/>"));
        assert_eq!(names(&log), ["a", "b"]);
        assert!(log.lock().unwrap().iter().all(|(_, r)| r.is_ok()));
    }

    #[test]
    fn fault_redirect_in_ok_response_is_followed() {
        let (mut conn, _, log) = setup(SoapConfig::default());
        conn.enqueue(request(&log, "a", ab()));
        conn.enqueue(request(&log, "b", ab()));
        open_and_send(&mut conn);
        let body = fault_body(
            "psf:Redirect",
            "<psf:redirectUrl>https://h2/p2</psf:redirectUrl>",
        );
        conn.on_data(&http("200 OK", &[], &body));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(conn.transport_mut().pop(), Some(IoCommand::Close));
        assert_eq!(
            conn.transport_mut().pop(),
            Some(IoCommand::Connect(Endpoint::new("h2", "/p2")))
        );
        let reissued = open_and_send(&mut conn);
        assert!(reissued.ends_with("<body>a</body>"));
        conn.on_data(&http("200 OK", &[], "<ok/>"));
        assert_eq!(names(&log), ["a"]);
        conn.teardown();
        assert_eq!(names(&log), ["a", "b"]);
    }

    #[test]
    fn redirect_without_port_uses_configured_port() {
        let config = SoapConfig {
            port: 8443,
            ..SoapConfig::default()
        };
        let (mut conn, _, log) = setup(config);
        conn.enqueue(request(&log, "a", ab()));
        assert_eq!(conn.transport_mut().pop(), Some(IoCommand::Connect(ab())));
        conn.on_connected();
        conn.transport_mut().drain();
        conn.on_write_complete();
        conn.on_data(&http("302 Found", &["Location: http://h2/p2"], ""));
        assert_eq!(conn.transport_mut().pop(), Some(IoCommand::Close));
        assert_eq!(
            conn.transport_mut().pop(),
            Some(IoCommand::Connect(Endpoint::new("h2", "/p2").with_port(8443)))
        );
        conn.teardown();
    }

    #[test]
    fn oversized_content_length_fails_request() {
        let (mut conn, _, log) = setup(SoapConfig::default());
        conn.enqueue(request(&log, "a", ab()));
        conn.enqueue(request(&log, "b", ab()));
        open_and_send(&mut conn);
        conn.on_data(b"HTTP/1.1 200 OK\r\nContent-Length: 18446744073709551615\r\n\r\n<x/>");
        assert_eq!(names(&log), ["a"]);
        assert!(matches!(log.lock().unwrap()[0].1, Err(RequestError::Malformed(_))));
        assert_eq!(conn.transport_mut().pop(), Some(IoCommand::Close));
        let wire_b = open_and_send(&mut conn);
        assert!(wire_b.ends_with("<body>b</body>"));
        conn.teardown();
    }

    #[test]
    fn service_unavailable_notifies_session_once() {
        let (mut conn, session, log) = setup(SoapConfig::default());
        conn.enqueue(request(&log, "a", ab()));
        open_and_send(&mut conn);
        conn.on_data(&http("503 Service Unavailable", &[], ""));
        assert_eq!(*session.errors.lock().unwrap(), [SessionError::ServiceUnavailable]);
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert!(matches!(log[0].1, Err(RequestError::ServiceUnavailable)));
    }

    #[test]
    fn unauthorized_carries_cbtxt() {
        let (mut conn, session, log) = setup(SoapConfig::default());
        conn.enqueue(request(&log, "a", ab()));
        open_and_send(&mut conn);
        conn.on_data(&http(
            "401 Unauthorized",
            &["WWW-Authenticate: Passport1.4 da-status=failed,cbtxt=Ticket%20expired"],
            "",
        ));
        let reason = Some("Ticket expired".to_string());
        assert_eq!(
            *session.errors.lock().unwrap(),
            [SessionError::Unauthorized { reason: reason.clone() }]
        );
        let log = log.lock().unwrap();
        assert!(matches!(&log[0].1, Err(RequestError::Unauthorized(r)) if *r == reason));
    }

    #[test]
    fn other_status_is_session_error() {
        let (mut conn, session, log) = setup(SoapConfig::default());
        conn.enqueue(request(&log, "a", ab()));
        open_and_send(&mut conn);
        conn.on_data(&http("404 Not Found", &[], ""));
        assert_eq!(*session.errors.lock().unwrap(), [SessionError::HttpStatus(404)]);
        assert!(matches!(log.lock().unwrap()[0].1, Err(RequestError::HttpStatus(404))));
    }

    #[test]
    fn plain_fault_is_a_normal_response() {
        let (mut conn, session, log) = setup(SoapConfig::default());
        conn.enqueue(request(&log, "a", ab()));
        open_and_send(&mut conn);
        let body = fault_body("soap:Client", "<detail><errorcode>ContactDoesNotExist</errorcode></detail>");
        conn.on_data(&http("500 Internal Server Error", &[], &body));
        assert!(session.errors.lock().unwrap().is_empty());
        let log = log.lock().unwrap();
        let resp = log[0].1.as_ref().unwrap();
        assert_eq!(resp.status, 500);
        assert_eq!(resp.fault().unwrap().error_code(), Some("ContactDoesNotExist"));
    }

    fn oim_request(log: &Log, sent: &Arc<Mutex<Vec<Credential>>>) -> SoapRequest {
        let log = log.clone();
        let sent = sent.clone();
        SoapRequest::with_challenge(
            RequestKind::SendOfflineMessage { to: "bob@example.com".into() },
            move |c: &Credential| {
                sent.lock().unwrap().push(c.clone());
                Bytes::from(format!(
                    "<Sequence>{}</Sequence><LockKey>{}</LockKey>",
                    c.sequence,
                    c.lock_key.clone().unwrap_or_default()
                ))
            },
            move |_, result| log.lock().unwrap().push(("oim".to_string(), result)),
        )
        .with_endpoint(Endpoint::new("ows.messenger.msn.com", "/OimWS/oim.asmx"))
    }

    #[test]
    fn auth_challenge_resends_with_same_sequence() {
        let (mut conn, session, log) = setup(SoapConfig::default());
        let sent = Arc::new(Mutex::new(Vec::new()));
        conn.enqueue(oim_request(&log, &sent));
        let first = open_and_send(&mut conn);
        assert!(first.contains("<Sequence>1</Sequence><LockKey></LockKey>"));
        let body = fault_body(
            "q0:AuthenticationFailed",
            "<detail><LockKeyChallenge>C</LockKeyChallenge></detail>",
        );
        conn.on_data(&http("500 Internal Server Error", &[], &body));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(conn.transport_mut().pop(), Some(IoCommand::Close));
        let second = open_and_send(&mut conn);
        let key = crate::protocol::soap::challenge::lock_key_response("C", &conn.config().challenge);
        assert!(second.contains(&format!("<Sequence>1</Sequence><LockKey>{}</LockKey>", key)));
        conn.on_data(&http("200 OK", &[], "<ok/>"));
        assert_eq!(log.lock().unwrap().len(), 1);
        assert!(log.lock().unwrap()[0].1.is_ok());
        assert!(session.errors.lock().unwrap().is_empty());
        assert_eq!(conn.auth().sequence(), 2);
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].sequence, sent[1].sequence);
    }

    #[test]
    fn auth_failure_without_challenge_is_terminal() {
        let (mut conn, session, log) = setup(SoapConfig::default());
        let sent = Arc::new(Mutex::new(Vec::new()));
        conn.enqueue(oim_request(&log, &sent));
        open_and_send(&mut conn);
        conn.on_data(&http("500 Internal Server Error", &[], &fault_body("q0:AuthenticationFailed", "")));
        assert_eq!(*session.errors.lock().unwrap(), [SessionError::ChallengeRejected]);
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert!(matches!(log[0].1, Err(RequestError::AuthenticationFailed(_))));
        assert_eq!(conn.transport_mut().pop(), Some(IoCommand::Close));
        assert!(conn.transport_mut().is_empty(), "no resend");
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn auth_fault_without_retry_metadata_is_delivered() {
        let (mut conn, session, log) = setup(SoapConfig::default());
        conn.enqueue(request(&log, "a", ab()));
        open_and_send(&mut conn);
        let body = fault_body("q0:AuthenticationFailed", "<detail><LockKeyChallenge>C</LockKeyChallenge></detail>");
        conn.on_data(&http("500 Internal Server Error", &[], &body));
        assert!(session.errors.lock().unwrap().is_empty());
        assert!(log.lock().unwrap()[0].1.is_ok());
    }

    #[test]
    fn teardown_fails_everything_in_order() {
        let (mut conn, _, log) = setup(SoapConfig::default());
        for name in ["a", "b", "c"] {
            conn.enqueue(request(&log, name, ab()));
        }
        open_and_send(&mut conn);
        conn.teardown();
        assert_eq!(names(&log), ["a", "b", "c"]);
        assert!(log
            .lock()
            .unwrap()
            .iter()
            .all(|(_, r)| matches!(r, Err(RequestError::Aborted))));
        conn.teardown();
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[test]
    fn drop_flushes_queue() {
        let (mut conn, _, log) = setup(SoapConfig::default());
        conn.enqueue(request(&log, "a", ab()));
        conn.enqueue(request(&log, "b", ab()));
        drop(conn);
        assert_eq!(names(&log), ["a", "b"]);
    }

    #[test]
    fn transport_error_flushes_and_reports() {
        let (mut conn, session, log) = setup(SoapConfig::default());
        conn.enqueue(request(&log, "a", ab()));
        conn.enqueue(request(&log, "b", ab()));
        open_and_send(&mut conn);
        conn.on_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
        assert_eq!(conn.state(), ConnectionState::Unconnected);
        assert_eq!(names(&log), ["a", "b"]);
        assert!(log.lock().unwrap().iter().all(|(_, r)| matches!(
            r,
            Err(RequestError::Transport { kind: io::ErrorKind::ConnectionReset, .. })
        )));
        let errors = session.errors.lock().unwrap();
        assert!(matches!(&errors[..], [SessionError::ConnectionLost { host, .. }] if host == "omega.contacts.msn.com"));
    }

    #[test]
    fn new_work_after_error_reconnects() {
        let (mut conn, _, log) = setup(SoapConfig::default());
        conn.enqueue(request(&log, "a", ab()));
        conn.transport_mut().drain();
        conn.on_error(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        conn.transport_mut().drain();
        conn.enqueue(request(&log, "b", ab()));
        assert_eq!(conn.transport_mut().pop(), Some(IoCommand::Connect(ab())));
        conn.teardown();
    }

    #[test]
    fn eof_in_flight_fails_request() {
        let (mut conn, session, log) = setup(SoapConfig::default());
        conn.enqueue(request(&log, "a", ab()));
        open_and_send(&mut conn);
        conn.on_closed();
        assert!(matches!(
            log.lock().unwrap()[0].1,
            Err(RequestError::Transport { kind: io::ErrorKind::UnexpectedEof, .. })
        ));
        assert_eq!(session.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn timeout_in_flight_fails_request() {
        let (mut conn, _, log) = setup(SoapConfig::default());
        conn.enqueue(request(&log, "a", ab()));
        open_and_send(&mut conn);
        conn.on_timeout();
        assert!(matches!(
            log.lock().unwrap()[0].1,
            Err(RequestError::Transport { kind: io::ErrorKind::TimedOut, .. })
        ));
    }

    #[test]
    fn keep_alive_reuses_socket() {
        let config = SoapConfig {
            reconnect: ReconnectPolicy::KeepAlive,
            ..SoapConfig::default()
        };
        let (mut conn, session, log) = setup(config);
        conn.enqueue(request(&log, "a", ab()));
        conn.enqueue(request(&log, "b", ab()));
        open_and_send(&mut conn);
        conn.on_data(&http("200 OK", &[], "<ok/>"));
        assert_eq!(conn.state(), ConnectionState::Processing);
        let wire_b = written(conn.transport_mut().pop());
        assert!(wire_b.ends_with("<body>b</body>"));
        conn.on_write_complete();
        conn.on_data(&http("200 OK", &[], "<ok/>"));
        assert_eq!(conn.state(), ConnectionState::ConnectedIdle);
        assert!(conn.transport_mut().is_empty());

        // idle EOF is quiet
        conn.on_closed();
        assert_eq!(conn.state(), ConnectionState::Unconnected);
        assert!(session.errors.lock().unwrap().is_empty());
        assert_eq!(names(&log), ["a", "b"]);
    }

    #[test]
    fn keep_alive_switches_host_for_other_endpoint() {
        let config = SoapConfig {
            reconnect: ReconnectPolicy::KeepAlive,
            ..SoapConfig::default()
        };
        let (mut conn, _, log) = setup(config);
        let oim = Endpoint::new("rsi.hotmail.com", "/rsi/rsi.asmx");
        conn.enqueue(request(&log, "a", ab()));
        conn.enqueue(request(&log, "b", oim.clone()));
        open_and_send(&mut conn);
        conn.on_data(&http("200 OK", &[], "<ok/>"));
        assert_eq!(conn.transport_mut().pop(), Some(IoCommand::Close));
        assert_eq!(conn.transport_mut().pop(), Some(IoCommand::Connect(oim)));
        conn.teardown();
    }

    #[test]
    fn idle_enqueue_dispatches_immediately() {
        let config = SoapConfig {
            reconnect: ReconnectPolicy::KeepAlive,
            ..SoapConfig::default()
        };
        let (mut conn, _, log) = setup(config);
        conn.enqueue(request(&log, "a", ab()));
        open_and_send(&mut conn);
        conn.on_data(&http("200 OK", &[], "<ok/>"));
        assert_eq!(conn.state(), ConnectionState::ConnectedIdle);
        conn.enqueue(request(&log, "b", ab()));
        assert_eq!(conn.state(), ConnectionState::Processing);
        assert!(written(conn.transport_mut().pop()).ends_with("<body>b</body>"));
        conn.teardown();
    }

    #[test]
    fn stray_data_is_discarded() {
        let (mut conn, _, log) = setup(SoapConfig::default());
        conn.on_data(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(conn.state(), ConnectionState::Unconnected);
        assert_eq!(conn.pending(), 0);
    }

    #[test]
    fn written_callback_fires_per_transmission() {
        let (mut conn, _, log) = setup(SoapConfig::default());
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        conn.enqueue(request(&log, "a", ab()).on_written(move || *c.lock().unwrap() += 1));
        open_and_send(&mut conn);
        assert_eq!(*count.lock().unwrap(), 1);
        conn.on_write_complete();
        assert_eq!(*count.lock().unwrap(), 1);
        conn.teardown();
    }
}
