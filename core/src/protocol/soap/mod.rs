/*
 * mod.rs
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

//! SOAP over TLS for the messenger web services (contact list, address book, offline
//! messages, SSO).
//!
//! Requests for one destination are serialized through a [`SoapConnection`]: one request
//! on the wire at a time, responses framed by `Content-Length`, HTTP and SOAP-fault
//! redirects followed, and offline-message lock-key challenges answered and resent.
//! [`start_pipeline`] runs a connection on a tokio task.

pub mod auth;
pub mod challenge;
pub mod connection;
pub mod error;
pub mod parser;
pub mod pipeline;
pub mod queue;
pub mod request;
pub mod response;
pub mod session;
pub mod transport;
pub mod xml;

pub use auth::{AuthChallengeCycle, AuthDecision};
pub use connection::{ConnectionState, SoapConnection};
pub use error::{RequestError, RequestResult, SessionError};
pub use pipeline::{start_pipeline, SoapCommand, SoapPipeline};
pub use queue::RequestQueue;
pub use request::{encode_request, Credential, MemberList, PartnerScenario, RequestKind, SoapRequest};
pub use response::{SoapResponse, StatusClass};
pub use session::{ChannelSession, Session};
pub use transport::{IoCommand, IoQueue, Transport};
pub use xml::FaultInfo;
