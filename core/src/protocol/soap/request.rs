/*
 * request.rs
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

//! SOAP requests: the kinds the messenger issues, their default endpoints and actions, the
//! request object that travels through the queue, and the wire encoding.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use super::error::{RequestError, RequestResult};
use crate::uri::{Endpoint, DEFAULT_SOAP_PORT};

pub const SSO_HOST: &str = "login.live.com";
pub const SSO_PATH: &str = "/RST.srf";
pub const SSO_ACTION: &str = "http://schemas.xmlsoap.org/ws/2004/04/security/trust/RST/Issue";

pub const CONTACT_HOST: &str = "omega.contacts.msn.com";
pub const SHARING_PATH: &str = "/abservice/SharingService.asmx";
pub const ADDRESS_BOOK_PATH: &str = "/abservice/abservice.asmx";
const ADDRESS_BOOK_ACTION_BASE: &str = "http://www.msn.com/webservices/AddressBook/";

pub const OIM_SEND_HOST: &str = "ows.messenger.msn.com";
pub const OIM_SEND_PATH: &str = "/OimWS/oim.asmx";
pub const OIM_SEND_ACTION: &str = "http://messenger.live.com/ws/2006/09/oim/Store2";

pub const OIM_RETRIEVE_HOST: &str = "rsi.hotmail.com";
pub const OIM_RETRIEVE_PATH: &str = "/rsi/rsi.asmx";
pub const OIM_GET_ACTION: &str = "http://www.hotmail.msn.com/ws/2004/09/oim/rsi/GetMessage";
pub const OIM_DELETE_ACTION: &str = "http://www.hotmail.msn.com/ws/2004/09/oim/rsi/DeleteMessages";

/// Why the client is talking to the address book; sent in the request body's
/// `PartnerScenario` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartnerScenario {
    Initial,
    ContactSave,
    MessengerPendingList,
    ContactMsgrApi,
    BlockUnblock,
}

impl PartnerScenario {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartnerScenario::Initial => "Initial",
            PartnerScenario::ContactSave => "ContactSave",
            PartnerScenario::MessengerPendingList => "MessengerPendingList",
            PartnerScenario::ContactMsgrApi => "ContactMsgrAPI",
            PartnerScenario::BlockUnblock => "BlockUnblock",
        }
    }
}

/// Membership list a contact can be added to or removed from (`MemberRole`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberList {
    Forward,
    Allow,
    Block,
    Reverse,
    Pending,
}

impl MemberList {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberList::Forward => "Forward",
            MemberList::Allow => "Allow",
            MemberList::Block => "Block",
            MemberList::Reverse => "Reverse",
            MemberList::Pending => "Pending",
        }
    }

    pub fn from_role(role: &str) -> Option<Self> {
        match role {
            "Forward" => Some(MemberList::Forward),
            "Allow" => Some(MemberList::Allow),
            "Block" => Some(MemberList::Block),
            "Reverse" => Some(MemberList::Reverse),
            "Pending" => Some(MemberList::Pending),
            _ => None,
        }
    }
}

/// What a request is for. Handed back to the completion callback so it can interpret the
/// response without any per-request context of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// Passport ticket exchange (RST).
    SsoTicket,
    /// FindMembership
    FetchContactList { scenario: PartnerScenario },
    /// ABFindAll
    FetchAddressBook { scenario: PartnerScenario },
    /// ABAdd
    CreateAddressBook,
    /// ABContactAdd
    AddContact { passport: String },
    /// ABContactDelete
    DeleteContact { contact_id: String },
    /// ABContactUpdate
    UpdateContact { contact_id: String },
    /// ABGroupContactAdd
    AddContactToGroup { passport: String, group_id: String },
    /// ABGroupContactDelete
    RemoveContactFromGroup { contact_id: String, group_id: String },
    /// AddMember
    AddToList { passport: String, list: MemberList },
    /// DeleteMember
    RemoveFromList { passport: String, list: MemberList },
    /// ABGroupAdd
    AddGroup { name: String },
    /// ABGroupDelete
    DeleteGroup { group_id: String },
    /// ABGroupUpdate
    RenameGroup { group_id: String, name: String },
    /// Store2
    SendOfflineMessage { to: String },
    /// GetMessage
    FetchOfflineMessage { message_id: String },
    /// DeleteMessages
    DeleteOfflineMessages { message_ids: Vec<String> },
}

impl RequestKind {
    /// SOAP operation name, used in logs and address-book actions.
    pub fn name(&self) -> &'static str {
        match self {
            RequestKind::SsoTicket => "RequestSecurityToken",
            RequestKind::FetchContactList { .. } => "FindMembership",
            RequestKind::FetchAddressBook { .. } => "ABFindAll",
            RequestKind::CreateAddressBook => "ABAdd",
            RequestKind::AddContact { .. } => "ABContactAdd",
            RequestKind::DeleteContact { .. } => "ABContactDelete",
            RequestKind::UpdateContact { .. } => "ABContactUpdate",
            RequestKind::AddContactToGroup { .. } => "ABGroupContactAdd",
            RequestKind::RemoveContactFromGroup { .. } => "ABGroupContactDelete",
            RequestKind::AddToList { .. } => "AddMember",
            RequestKind::RemoveFromList { .. } => "DeleteMember",
            RequestKind::AddGroup { .. } => "ABGroupAdd",
            RequestKind::DeleteGroup { .. } => "ABGroupDelete",
            RequestKind::RenameGroup { .. } => "ABGroupUpdate",
            RequestKind::SendOfflineMessage { .. } => "Store2",
            RequestKind::FetchOfflineMessage { .. } => "GetMessage",
            RequestKind::DeleteOfflineMessages { .. } => "DeleteMessages",
        }
    }

    /// Default `SOAPAction` header value.
    pub fn soap_action(&self) -> String {
        match self {
            RequestKind::SsoTicket => SSO_ACTION.to_string(),
            RequestKind::SendOfflineMessage { .. } => OIM_SEND_ACTION.to_string(),
            RequestKind::FetchOfflineMessage { .. } => OIM_GET_ACTION.to_string(),
            RequestKind::DeleteOfflineMessages { .. } => OIM_DELETE_ACTION.to_string(),
            other => format!("{}{}", ADDRESS_BOOK_ACTION_BASE, other.name()),
        }
    }

    /// Default service endpoint. Redirects may move a request elsewhere.
    pub fn endpoint(&self) -> Endpoint {
        match self {
            RequestKind::SsoTicket => Endpoint::new(SSO_HOST, SSO_PATH),
            RequestKind::FetchContactList { .. }
            | RequestKind::AddToList { .. }
            | RequestKind::RemoveFromList { .. } => Endpoint::new(CONTACT_HOST, SHARING_PATH),
            RequestKind::SendOfflineMessage { .. } => Endpoint::new(OIM_SEND_HOST, OIM_SEND_PATH),
            RequestKind::FetchOfflineMessage { .. } | RequestKind::DeleteOfflineMessages { .. } => {
                Endpoint::new(OIM_RETRIEVE_HOST, OIM_RETRIEVE_PATH)
            }
            _ => Endpoint::new(CONTACT_HOST, ADDRESS_BOOK_PATH),
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Credential material handed to a body composer for each transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Lock-key response, once a challenge has been answered.
    pub lock_key: Option<String>,
    /// Sequence number of this logical request; identical on every resend.
    pub sequence: u64,
}

pub type Completion = Box<dyn FnOnce(RequestKind, RequestResult) + Send>;
pub type WriteDone = Box<dyn FnOnce() + Send>;
pub type BodyComposer = Box<dyn Fn(&Credential) -> Bytes + Send>;

/// Retry metadata of a request that takes part in the lock-key challenge cycle.
pub struct AuthRetry {
    compose: BodyComposer,
    pub(crate) sequence: Option<u64>,
    /// The sequence counter has already advanced for this request.
    pub(crate) counted: bool,
    pub(crate) last_challenge: Option<String>,
    pub(crate) resends: u8,
    /// A held credential has been dropped once without a new challenge.
    pub(crate) cleared: bool,
}

impl AuthRetry {
    fn new(compose: BodyComposer) -> Self {
        Self {
            compose,
            sequence: None,
            counted: false,
            last_challenge: None,
            resends: 0,
            cleared: false,
        }
    }

    pub(crate) fn compose(&self, credential: &Credential) -> Bytes {
        (self.compose)(credential)
    }
}

/// One logical request. Completed exactly once: by [`SoapRequest::complete`], or with
/// [`RequestError::Aborted`] if it is dropped unanswered.
pub struct SoapRequest {
    id: u64,
    pub(crate) endpoint: Endpoint,
    action: String,
    pub(crate) body: Bytes,
    kind: RequestKind,
    on_complete: Option<Completion>,
    on_written: Option<WriteDone>,
    pub(crate) redirects: u8,
    pub(crate) auth: Option<AuthRetry>,
}

impl SoapRequest {
    /// Request with a fixed body, sent to the kind's default endpoint and action.
    pub fn new<F>(kind: RequestKind, body: impl Into<Bytes>, on_complete: F) -> Self
    where
        F: FnOnce(RequestKind, RequestResult) + Send + 'static,
    {
        Self {
            id: 0,
            endpoint: kind.endpoint(),
            action: kind.soap_action(),
            body: body.into(),
            kind,
            on_complete: Some(Box::new(on_complete)),
            on_written: None,
            redirects: 0,
            auth: None,
        }
    }

    /// Request whose body carries the lock key and sequence number. `compose` is called
    /// before every transmission, including resends after a challenge.
    pub fn with_challenge<C, F>(kind: RequestKind, compose: C, on_complete: F) -> Self
    where
        C: Fn(&Credential) -> Bytes + Send + 'static,
        F: FnOnce(RequestKind, RequestResult) + Send + 'static,
    {
        let mut request = Self::new(kind, Bytes::new(), on_complete);
        request.auth = Some(AuthRetry::new(Box::new(compose)));
        request
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    /// Called when the request has first been written in full.
    pub fn on_written<W>(mut self, on_written: W) -> Self
    where
        W: FnOnce() + Send + 'static,
    {
        self.on_written = Some(Box::new(on_written));
        self
    }

    /// Creation order on its connection, assigned at enqueue.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    pub fn redirects(&self) -> u8 {
        self.redirects
    }

    /// Sequence number, once the request has been prepared for its first transmission.
    pub fn sequence(&self) -> Option<u64> {
        self.auth.as_ref().and_then(|a| a.sequence)
    }

    pub fn has_challenge(&self) -> bool {
        self.auth.is_some()
    }

    pub(crate) fn take_on_written(&mut self) -> Option<WriteDone> {
        self.on_written.take()
    }

    /// Deliver the outcome and free the request.
    pub fn complete(mut self, result: RequestResult) {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(self.kind.clone(), result);
        }
    }
}

impl Drop for SoapRequest {
    fn drop(&mut self) {
        if let Some(on_complete) = self.on_complete.take() {
            warn!(id = self.id, kind = %self.kind, "request dropped unanswered");
            on_complete(self.kind.clone(), Err(RequestError::Aborted));
        }
    }
}

impl fmt::Debug for SoapRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoapRequest")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("body_len", &self.body.len())
            .field("redirects", &self.redirects)
            .finish()
    }
}

/// Serialize `request` for the wire. Header order is fixed; the services are picky.
pub fn encode_request(request: &SoapRequest, ticket: &str, user_agent: &str) -> Bytes {
    let endpoint = &request.endpoint;
    let host = if endpoint.port != DEFAULT_SOAP_PORT {
        format!("{}:{}", endpoint.host, endpoint.port)
    } else {
        endpoint.host.clone()
    };
    let head = format!(
        "POST {} HTTP/1.1\r\n\
         SOAPAction: {}\r\n\
         Content-Type:text/xml; charset=utf-8\r\n\
         Cookie: MSPAuth={}\r\n\
         User-Agent: {}\r\n\
         Accept: */*\r\n\
         Host: {}\r\n\
         Content-Length: {}\r\n\
         Connection: Keep-Alive\r\n\
         Cache-Control: no-cache\r\n\
         \r\n",
        endpoint.path,
        request.action,
        ticket,
        user_agent,
        host,
        request.body.len()
    );
    let mut out = BytesMut::with_capacity(head.len() + request.body.len());
    out.put_slice(head.as_bytes());
    out.put_slice(&request.body);
    out.freeze()
}
