/*
 * pipeline.rs
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

//! Pipeline task: owns one [`SoapConnection`] and its socket.
//!
//! Same shape as the other protocol pipelines: requests are queued via an
//! `mpsc::UnboundedSender` and a tokio::spawn'd loop feeds them to the connection, carries
//! out the transport commands it issues and hands socket events back to it.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::connection::SoapConnection;
use super::request::SoapRequest;
use super::session::Session;
use super::transport::{IoCommand, IoQueue};
use crate::config::SoapConfig;
use crate::net::{self, SoapStream};

const READ_CHUNK: usize = 16 * 1024;

/// Commands sent from handles to the pipeline task.
pub enum SoapCommand {
    Submit(SoapRequest),
    /// Fail everything still queued with `Aborted` and stop.
    Shutdown,
}

/// Handle to the SOAP pipeline task. Cheaply cloneable.
#[derive(Clone)]
pub struct SoapPipeline {
    command_tx: mpsc::UnboundedSender<SoapCommand>,
}

impl SoapPipeline {
    /// Queue a request. Returns immediately; the request's callback reports the outcome
    /// (`Aborted` if the pipeline has already stopped).
    pub fn submit(&self, request: SoapRequest) {
        let _ = self.command_tx.send(SoapCommand::Submit(request));
    }

    pub fn shutdown(&self) {
        let _ = self.command_tx.send(SoapCommand::Shutdown);
    }

    /// Returns true if the pipeline task is still running.
    pub fn is_alive(&self) -> bool {
        !self.command_tx.is_closed()
    }
}

/// Start the pipeline task on the current tokio runtime. No connection is made until the
/// first request arrives.
pub fn start_pipeline(config: SoapConfig, session: Arc<dyn Session>) -> SoapPipeline {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let conn = SoapConnection::new(IoQueue::new(), config, session);
    tokio::spawn(soap_pipeline_loop(conn, cmd_rx));
    SoapPipeline { command_tx: cmd_tx }
}

/// What woke the loop up.
enum LoopEvent {
    Submit(SoapRequest),
    Shutdown,
    Data(usize),
    Closed,
    ReadError(io::Error),
    TimedOut,
}

async fn soap_pipeline_loop(
    mut conn: SoapConnection<IoQueue>,
    mut cmd_rx: mpsc::UnboundedReceiver<SoapCommand>,
) {
    info!("soap pipeline started");
    let mut stream: Option<SoapStream> = None;
    let mut read_buf = vec![0u8; READ_CHUNK];

    // Set when a response starts being awaited, moved forward on every read, cleared once
    // nothing is in flight. Submits never touch it.
    let mut deadline: Option<Instant> = None;

    loop {
        run_io(&mut conn, &mut stream).await;

        if !conn.awaiting_response() {
            deadline = None;
        } else if deadline.is_none() {
            deadline = Some(Instant::now() + conn.config().idle_timeout);
        }
        let event = tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(SoapCommand::Submit(request)) => LoopEvent::Submit(request),
                Some(SoapCommand::Shutdown) | None => LoopEvent::Shutdown,
            },
            event = read_event(stream.as_mut(), &mut read_buf) => event,
            _ = idle_deadline(deadline) => LoopEvent::TimedOut,
        };

        match event {
            LoopEvent::Submit(request) => {
                conn.enqueue(request);
            }
            LoopEvent::Data(n) => {
                deadline = None;
                conn.on_data(&read_buf[..n]);
            }
            LoopEvent::Closed => conn.on_closed(),
            LoopEvent::ReadError(e) => conn.on_error(e),
            LoopEvent::TimedOut => {
                warn!(timeout = ?conn.config().idle_timeout, "no response from soap server");
                deadline = None;
                conn.on_timeout();
            }
            LoopEvent::Shutdown => {
                conn.teardown();
                run_io(&mut conn, &mut stream).await;
                break;
            }
        }
    }
    info!("soap pipeline stopped");
}

/// Read once from the socket; pends forever when there is none.
async fn read_event(stream: Option<&mut SoapStream>, buf: &mut [u8]) -> LoopEvent {
    let stream = match stream {
        Some(stream) => stream,
        None => return std::future::pending().await,
    };
    match stream.read(buf).await {
        Ok(0) => LoopEvent::Closed,
        Ok(n) => LoopEvent::Data(n),
        Err(e) => LoopEvent::ReadError(e),
    }
}

/// Resolves at `deadline`; pends forever without one.
async fn idle_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Carry out every transport command the connection has issued, feeding completions back.
async fn run_io(conn: &mut SoapConnection<IoQueue>, stream: &mut Option<SoapStream>) {
    while let Some(cmd) = conn.transport_mut().pop() {
        match cmd {
            IoCommand::Connect(endpoint) => {
                close_stream(stream).await;
                let use_tls = conn.config().use_tls;
                let connect_timeout = conn.config().connect_timeout;
                match net::connect(&endpoint, use_tls, connect_timeout).await {
                    Ok(s) => {
                        *stream = Some(s);
                        conn.on_connected();
                    }
                    Err(e) => {
                        warn!(endpoint = %endpoint, error = %e, "soap connect failed");
                        conn.on_error(e);
                    }
                }
            }
            IoCommand::Write(data) => {
                let result = match stream.as_mut() {
                    Some(s) => write_all(s, &data).await,
                    None => Err(io::Error::new(
                        io::ErrorKind::NotConnected,
                        "write without a connection",
                    )),
                };
                match result {
                    Ok(()) => conn.on_write_complete(),
                    Err(e) => conn.on_error(e),
                }
            }
            IoCommand::Close => close_stream(stream).await,
        }
    }
}

async fn write_all(stream: &mut SoapStream, data: &[u8]) -> io::Result<()> {
    stream.write_all(data).await?;
    stream.flush().await
}

async fn close_stream(stream: &mut Option<SoapStream>) {
    if let Some(mut s) = stream.take() {
        if let Err(e) = s.shutdown().await {
            debug!(error = %e, "soap socket shutdown");
        }
    }
}
