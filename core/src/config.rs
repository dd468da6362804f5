/*
 * config.rs
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

//! SOAP pipeline configuration: ports, timeouts, redirect and resend bounds, reconnect policy
//! and the product identity used for lock-key challenges.
//!
//! Stored in ~/.chiacchiera/soap.xml, kept apart from the UI's own config.xml. All XML reading
//! uses the quick_xml reader; elements not listed here are ignored and missing ones keep
//! their defaults.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use thiserror::Error;

use crate::uri::DEFAULT_SOAP_PORT;

/// Product identity the lock-key challenge is computed with (MSNP13 / WLM 8.1).
pub const DEFAULT_PRODUCT_ID: &str = "PROD01065C%ZFN6F";
pub const DEFAULT_PRODUCT_KEY: &str = "O4BG@C7BWLYQX?5G";

/// Client identifier sent in every request's User-Agent header.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/4.0 (compatible; MSIE 6.0; Windows NT 5.1; SV1; .NET CLR 1.1.4322; .NET CLR 2.0.50727; Windows Live Messenger 8.1.0178)";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("invalid value for <{name}>: {value:?}")]
    InvalidValue { name: String, value: String },
}

/// What the connection does with its socket once a response has been dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Close after every response and reconnect for the next request. The services have
    /// been seen to stall on a second read from the same socket.
    #[default]
    PerResponse,
    /// Keep the socket open and send the next request on it.
    KeepAlive,
}

impl ReconnectPolicy {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "per-response" => Some(Self::PerResponse),
            "keep-alive" => Some(Self::KeepAlive),
            _ => None,
        }
    }
}

/// Product id and key mixed into the lock-key challenge response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeKeys {
    pub product_id: String,
    pub product_key: String,
}

impl Default for ChallengeKeys {
    fn default() -> Self {
        Self {
            product_id: DEFAULT_PRODUCT_ID.to_string(),
            product_key: DEFAULT_PRODUCT_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SoapConfig {
    /// Port for redirect targets whose URL names none. Request endpoints carry their own.
    pub port: u16,
    /// TLS on every connection. Only tests against local servers turn this off.
    pub use_tls: bool,
    pub user_agent: String,
    /// Redirect hops followed for one request before it fails.
    pub max_redirects: u8,
    /// Automatic lock-key resends for one request before it fails.
    pub max_auth_resends: u8,
    pub connect_timeout: Duration,
    /// How long a read may stall while a response is awaited.
    pub idle_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub challenge: ChallengeKeys,
}

impl Default for SoapConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SOAP_PORT,
            use_tls: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_redirects: 5,
            max_auth_resends: 3,
            connect_timeout: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(60),
            reconnect: ReconnectPolicy::PerResponse,
            challenge: ChallengeKeys::default(),
        }
    }
}

/// Default config directory: ~/.chiacchiera.
pub fn default_config_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from).map(|h| h.join(".chiacchiera"))
}

/// Default SOAP config path: ~/.chiacchiera/soap.xml.
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|d| d.join("soap.xml"))
}

fn invalid(name: &[u8], value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: String::from_utf8_lossy(name).into_owned(),
        value: value.to_string(),
    }
}

fn parse_number<T: std::str::FromStr>(name: &[u8], value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| invalid(name, value))
}

fn parse_bool(name: &[u8], value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(invalid(name, value)),
    }
}

impl SoapConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => Self::from_xml(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Parse `<soap><port>443</port><tls>true</tls>...</soap>`. Timeouts are in seconds.
    pub fn from_xml(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();
        let mut element_name = Vec::<u8>::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Err(e) => return Err(ConfigError::Xml(e.to_string())),
                Ok(Event::Eof) => break,
                Ok(Event::Start(e)) => {
                    element_name.clear();
                    element_name.extend_from_slice(e.name().as_ref());
                }
                Ok(Event::Text(e)) => {
                    if element_name.is_empty() {
                        continue;
                    }
                    let text = e.unescape().map_err(|e| ConfigError::Xml(e.to_string()))?;
                    config.apply(&element_name, text.trim())?;
                    element_name.clear();
                }
                Ok(Event::End(_)) => element_name.clear(),
                _ => {}
            }
            buf.clear();
        }
        Ok(config)
    }

    fn apply(&mut self, name: &[u8], value: &str) -> Result<(), ConfigError> {
        match name {
            b"port" => self.port = parse_number(name, value)?,
            b"tls" => self.use_tls = parse_bool(name, value)?,
            b"user-agent" => self.user_agent = value.to_string(),
            b"max-redirects" => self.max_redirects = parse_number(name, value)?,
            b"max-auth-resends" => self.max_auth_resends = parse_number(name, value)?,
            b"connect-timeout" => {
                self.connect_timeout = Duration::from_secs(parse_number(name, value)?)
            }
            b"idle-timeout" => self.idle_timeout = Duration::from_secs(parse_number(name, value)?),
            b"reconnect" => {
                self.reconnect = ReconnectPolicy::from_name(value).ok_or_else(|| invalid(name, value))?
            }
            b"product-id" => self.challenge.product_id = value.to_string(),
            b"product-key" => self.challenge.product_key = value.to_string(),
            _ => {}
        }
        Ok(())
    }
}
