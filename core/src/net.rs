/*
 * net.rs
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

//! TCP and TLS streams for SOAP endpoints (rustls via tokio-rustls).
//!
//! SOAP services are reached with implicit TLS: TCP connect, then the handshake straight
//! away. Plain TCP exists only so the pipeline can be exercised against local servers.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream as TokioTlsStream;
use tokio_rustls::rustls::client::ClientConfig;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::RootCertStore;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::uri::Endpoint;

/// Build a root certificate store: platform native certs first, then webpki-roots as fallback.
fn build_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            for cert in certs {
                let _ = root_store.add(cert);
            }
        }
        Err(e) => warn!(error = %e, "cannot load native root certificates"),
    }
    if root_store.is_empty() {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    root_store
}

/// TLS client config for SOAP: HTTP/1.1 only (ALPN `http/1.1`), no client auth.
pub fn soap_client_config() -> Arc<ClientConfig> {
    let mut config = ClientConfig::builder()
        .with_root_certificates(build_root_store())
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Arc::new(config)
}

static SOAP_CONNECTOR: OnceLock<TlsConnector> = OnceLock::new();

fn soap_connector() -> &'static TlsConnector {
    SOAP_CONNECTOR.get_or_init(|| TlsConnector::from(soap_client_config()))
}

/// Unified stream: plain TCP or TLS. Implements AsyncRead + AsyncWrite.
pub enum SoapStream {
    Plain(TcpStream),
    Tls(Box<TokioTlsStream<TcpStream>>),
}

impl AsyncRead for SoapStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            SoapStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            SoapStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SoapStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            SoapStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            SoapStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            SoapStream::Plain(s) => Pin::new(s).poll_flush(cx),
            SoapStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            SoapStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            SoapStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

async fn open_stream(endpoint: &Endpoint, use_tls: bool) -> io::Result<SoapStream> {
    let addr = format!("{}:{}", endpoint.host, endpoint.port);
    let tcp = TcpStream::connect(&addr).await?;
    if !use_tls {
        return Ok(SoapStream::Plain(tcp));
    }
    let server_name = ServerName::try_from(endpoint.host.clone())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid host name"))?;
    let tls = soap_connector()
        .connect(server_name, tcp)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e))?;
    Ok(SoapStream::Tls(Box::new(tls)))
}

/// Connect to `endpoint`, with the TLS handshake when `use_tls` is set.
/// TCP connect and handshake together are bounded by `connect_timeout`.
pub async fn connect(
    endpoint: &Endpoint,
    use_tls: bool,
    connect_timeout: Duration,
) -> io::Result<SoapStream> {
    let stream = timeout(connect_timeout, open_stream(endpoint, use_tls))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
    debug!(host = %endpoint.host, port = endpoint.port, tls = use_tls, "connected");
    Ok(stream)
}
