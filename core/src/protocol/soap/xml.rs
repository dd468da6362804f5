/*
 * xml.rs
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

//! SOAP envelope lookups with the quick_xml streaming reader.
//!
//! Element matching uses local names only, so `soap:Body`, `S:Body` and `Body` are the same
//! element. Paths are given below the document root: `Body/Fault/faultcode`.

use std::fmt;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

/// A SOAP Fault from a response body (SOAP 1.1 or 1.2 shape).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FaultInfo {
    /// Fault code as sent, usually with a namespace prefix (`q0:AuthenticationFailed`).
    pub code: String,
    pub reason: Option<String>,
    /// Target of a `Redirect` fault.
    pub redirect_url: Option<String>,
    /// Leaf elements under `detail`, by local name.
    pub detail: Vec<(String, String)>,
}

impl FaultInfo {
    /// Fault code without its namespace prefix.
    pub fn code_name(&self) -> &str {
        match self.code.rsplit_once(':') {
            Some((_, name)) => name,
            None => &self.code,
        }
    }

    pub fn is_authentication_failed(&self) -> bool {
        self.code_name() == "AuthenticationFailed"
    }

    /// A `Redirect` fault that actually names a target.
    pub fn is_redirect(&self) -> bool {
        self.code_name() == "Redirect" && self.redirect_url.is_some()
    }

    pub fn detail(&self, name: &str) -> Option<&str> {
        self.detail
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn lock_key_challenge(&self) -> Option<&str> {
        self.detail("LockKeyChallenge").filter(|c| !c.is_empty())
    }

    pub fn error_code(&self) -> Option<&str> {
        self.detail("errorcode")
    }
}

impl fmt::Display for FaultInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{}: {}", self.code, reason),
            None => f.write_str(&self.code),
        }
    }
}

fn path_matches(stack: &[Vec<u8>], want: &[&[u8]]) -> bool {
    stack.len() == want.len() + 1
        && stack[1..].iter().zip(want).all(|(have, want)| have.as_slice() == *want)
}

/// Text content of the first element at `path` below the root, or None if absent or the
/// document is malformed before it is reached.
pub fn text_at(xml: &[u8], path: &str) -> Option<String> {
    let want: Vec<&[u8]> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::as_bytes)
        .collect();
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut capture: Option<(usize, String)> = None;

    loop {
        match reader.read_event_into(&mut buf).ok()? {
            Event::Start(e) => {
                stack.push(e.local_name().as_ref().to_vec());
                if capture.is_none() && path_matches(&stack, &want) {
                    capture = Some((stack.len(), String::new()));
                }
            }
            Event::Empty(e) => {
                stack.push(e.local_name().as_ref().to_vec());
                if capture.is_none() && path_matches(&stack, &want) {
                    return Some(String::new());
                }
                stack.pop();
            }
            Event::Text(e) => {
                if let Some((_, text)) = capture.as_mut() {
                    text.push_str(&e.unescape().ok()?);
                }
            }
            Event::CData(e) => {
                if let Some((_, text)) = capture.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::End(_) => {
                if let Some((depth, _)) = &capture {
                    if *depth == stack.len() {
                        return capture.map(|(_, text)| text);
                    }
                }
                stack.pop();
            }
            Event::Eof => return None,
            _ => {}
        }
        buf.clear();
    }
}

fn is_fault_path(stack: &[Vec<u8>]) -> bool {
    stack.len() == 3 && stack[1] == b"Body" && stack[2] == b"Fault"
}

/// The Fault under the SOAP Body, if the body has one.
pub fn extract_fault(xml: &[u8]) -> Option<FaultInfo> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut fault_depth: Option<usize> = None;
    let mut text = String::new();
    // (path below Fault, text) for every leaf with content
    let mut leaves: Vec<(Vec<String>, String)> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).ok()? {
            Event::Start(e) => {
                stack.push(e.local_name().as_ref().to_vec());
                text.clear();
                if fault_depth.is_none() && is_fault_path(&stack) {
                    fault_depth = Some(stack.len());
                }
            }
            Event::Empty(e) => {
                stack.push(e.local_name().as_ref().to_vec());
                if fault_depth.is_none() && is_fault_path(&stack) {
                    return Some(FaultInfo::default());
                }
                stack.pop();
            }
            Event::Text(e) => {
                if fault_depth.is_some() {
                    text.push_str(&e.unescape().ok()?);
                }
            }
            Event::CData(e) => {
                if fault_depth.is_some() {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::End(_) => {
                if let Some(depth) = fault_depth {
                    if stack.len() == depth {
                        break;
                    }
                    if !text.is_empty() {
                        let path = stack[depth..]
                            .iter()
                            .map(|n| String::from_utf8_lossy(n).into_owned())
                            .collect();
                        leaves.push((path, std::mem::take(&mut text)));
                    }
                }
                stack.pop();
            }
            Event::Eof => {
                if fault_depth.is_none() {
                    return None;
                }
                break;
            }
            _ => {}
        }
        buf.clear();
    }
    Some(fault_from_leaves(leaves))
}

fn fault_from_leaves(leaves: Vec<(Vec<String>, String)>) -> FaultInfo {
    let mut fault = FaultInfo::default();
    for (path, value) in leaves {
        let names: Vec<&str> = path.iter().map(String::as_str).collect();
        match names.as_slice() {
            ["faultcode"] | ["Code", "Value"] => fault.code = value,
            ["faultstring"] | ["Reason", "Text"] => fault.reason = Some(value),
            ["detail" | "Detail", .., leaf] => fault.detail.push((leaf.to_string(), value)),
            [.., "redirectUrl"] => fault.redirect_url = Some(value),
            _ => {}
        }
    }
    fault
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTH_FAULT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <soap:Fault>
      <faultcode xmlns:q0="http://messenger.msn.com/ws/2004/09/oim/">q0:AuthenticationFailed</faultcode>
      <faultstring>Exception of type 'System.Web.Services.Protocols.SoapException' was thrown.</faultstring>
      <detail>
        <TweenerChallenge xmlns="http://messenger.msn.com/ws/2004/09/oim/">ct=1,rver=1</TweenerChallenge>
        <LockKeyChallenge xmlns="http://messenger.msn.com/ws/2004/09/oim/">72000000000000000000</LockKeyChallenge>
      </detail>
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#;

    #[test]
    fn text_at_uses_local_names() {
        let code = text_at(AUTH_FAULT.as_bytes(), "Body/Fault/faultcode");
        assert_eq!(code.as_deref(), Some("q0:AuthenticationFailed"));
        let challenge = text_at(AUTH_FAULT.as_bytes(), "Body/Fault/detail/LockKeyChallenge");
        assert_eq!(challenge.as_deref(), Some("72000000000000000000"));
        assert_eq!(text_at(AUTH_FAULT.as_bytes(), "Body/Fault/nothing"), None);
        assert_eq!(text_at(AUTH_FAULT.as_bytes(), "Fault/faultcode"), None);
    }

    #[test]
    fn auth_fault_fields() {
        let fault = extract_fault(AUTH_FAULT.as_bytes()).unwrap();
        assert_eq!(fault.code, "q0:AuthenticationFailed");
        assert_eq!(fault.code_name(), "AuthenticationFailed");
        assert!(fault.is_authentication_failed());
        assert!(!fault.is_redirect());
        assert_eq!(fault.lock_key_challenge(), Some("72000000000000000000"));
        assert_eq!(fault.detail("TweenerChallenge"), Some("ct=1,rver=1"));
        assert!(fault.reason.as_deref().unwrap().starts_with("Exception"));
    }

    #[test]
    fn redirect_fault() {
        let xml = "<soap:Envelope xmlns:soap=\"s\" xmlns:psf=\"p\"><soap:Body><soap:Fault>\
            <faultcode>psf:Redirect</faultcode>\
            <psf:redirectUrl>https://by2.omega.contacts.msn.com/abservice/abservice.asmx</psf:redirectUrl>\
            <faultstring>Redirect</faultstring>\
            </soap:Fault></soap:Body></soap:Envelope>";
        let fault = extract_fault(xml.as_bytes()).unwrap();
        assert!(fault.is_redirect());
        assert_eq!(
            fault.redirect_url.as_deref(),
            Some("https://by2.omega.contacts.msn.com/abservice/abservice.asmx")
        );
    }

    #[test]
    fn redirect_code_without_url_is_not_a_redirect() {
        let xml = "<Envelope><Body><Fault><faultcode>Redirect</faultcode></Fault></Body></Envelope>";
        let fault = extract_fault(xml.as_bytes()).unwrap();
        assert_eq!(fault.code_name(), "Redirect");
        assert!(!fault.is_redirect());
    }

    #[test]
    fn soap12_fault_and_errorcode() {
        let xml = "<env:Envelope xmlns:env=\"e\"><env:Body><env:Fault>\
            <env:Code><env:Value>env:Sender</env:Value></env:Code>\
            <env:Reason><env:Text>Member already exists</env:Text></env:Reason>\
            <env:Detail><errorcode>MemberAlreadyExists</errorcode></env:Detail>\
            </env:Fault></env:Body></env:Envelope>";
        let fault = extract_fault(xml.as_bytes()).unwrap();
        assert_eq!(fault.code_name(), "Sender");
        assert_eq!(fault.reason.as_deref(), Some("Member already exists"));
        assert_eq!(fault.error_code(), Some("MemberAlreadyExists"));
    }

    #[test]
    fn no_fault_in_normal_body() {
        let xml = "<soap:Envelope xmlns:soap=\"s\"><soap:Body><ABFindAllResponse/></soap:Body></soap:Envelope>";
        assert_eq!(extract_fault(xml.as_bytes()), None);
        assert_eq!(extract_fault(b""), None);
    }
}
