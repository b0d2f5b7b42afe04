//! Configuration types for qtools
//!
//! Values arrive here already parsed from the command line; this module
//! applies defaults and the checks that must pass before any reactor starts.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::address::{Endpoint, Scheme, Server};
use crate::error::{Error, Result};

/// Connection settings shared by every client tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectConfig {
    /// Container identity (generated when absent)
    #[serde(default)]
    pub id: Option<String>,

    /// Default server for URLs without one
    #[serde(default)]
    pub server: Server,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Allowed SASL mechanisms, comma or space separated
    #[serde(default = "default_allowed_mechs")]
    pub allowed_mechs: String,

    /// Connect using TLS
    #[serde(default)]
    pub tls: bool,

    #[serde(default)]
    pub cert: Option<PathBuf>,

    #[serde(default)]
    pub key: Option<PathBuf>,

    #[serde(default)]
    pub trust: Option<PathBuf>,

    /// File that receives `ready` once all links are open
    #[serde(default)]
    pub ready_file: Option<PathBuf>,
}

fn default_allowed_mechs() -> String {
    "anonymous,plain".to_string()
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            id: None,
            server: Server::default(),
            user: None,
            password: None,
            allowed_mechs: default_allowed_mechs(),
            tls: false,
            cert: None,
            key: None,
            trust: None,
            ready_file: None,
        }
    }
}

impl ConnectConfig {
    /// Check credential files and transport features
    pub fn validate(&self) -> Result<()> {
        check_file("Cert file", &self.cert)?;
        check_file("Key file", &self.key)?;
        check_file("Trust file", &self.trust)?;

        if self.tls {
            return Err(Error::Unsupported(
                "TLS connections are not available in this transport".to_string(),
            ));
        }

        Ok(())
    }

    /// Allowed SASL mechanisms, upper-cased
    pub fn mechanisms(&self) -> Vec<String> {
        self.allowed_mechs
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|m| !m.is_empty())
            .map(str::to_uppercase)
            .collect()
    }

    /// Resolve address URLs against the configured server
    pub fn endpoints(&self, urls: &[String]) -> Result<Vec<Endpoint>> {
        let endpoints = urls
            .iter()
            .map(|url| Endpoint::parse(url, &self.server, self.tls))
            .collect::<Result<Vec<_>>>()?;

        if endpoints.iter().any(|e| e.scheme == Scheme::Amqps) {
            return Err(Error::Unsupported(
                "amqps URLs need TLS, which is not available in this transport".to_string(),
            ));
        }

        Ok(endpoints)
    }
}

fn check_file(what: &str, path: &Option<PathBuf>) -> Result<()> {
    match path {
        Some(path) if !path.exists() => Err(Error::FileNotFound(format!(
            "{} '{}'",
            what,
            path.display()
        ))),
        _ => Ok(()),
    }
}

/// Settings for the send, receive and request tools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub connect: ConnectConfig,

    /// One endpoint per address URL
    pub endpoints: Vec<Endpoint>,

    /// Send without waiting for settlement
    #[serde(default)]
    pub presettled: bool,

    /// Stop after this many messages
    #[serde(default)]
    pub count: Option<u64>,

    /// Prefix output lines with the address
    #[serde(default = "default_true")]
    pub prefix: bool,

    /// Write messages as JSON records
    #[serde(default)]
    pub json: bool,

    /// Print application properties
    #[serde(default)]
    pub properties: bool,

    /// Maximum requests awaiting a response
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,

    /// Receiver credit window
    #[serde(default = "default_prefetch")]
    pub prefetch: u32,
}

fn default_true() -> bool {
    true
}

fn default_max_pending() -> usize {
    1024
}

fn default_prefetch() -> u32 {
    10
}

impl ClientConfig {
    /// Validate `connect` and resolve `urls` into endpoints
    pub fn new(connect: ConnectConfig, urls: &[String]) -> Result<Self> {
        connect.validate()?;

        if urls.is_empty() {
            return Err(Error::invalid_url("", "At least one address URL is required"));
        }

        let endpoints = connect.endpoints(urls)?;

        Ok(Self {
            connect,
            endpoints,
            presettled: false,
            count: None,
            prefix: true,
            json: false,
            properties: false,
            max_pending: default_max_pending(),
            prefetch: default_prefetch(),
        })
    }
}

/// Text transforms applied by the respond tool, in field order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformConfig {
    #[serde(default)]
    pub upper: bool,

    #[serde(default)]
    pub reverse: bool,

    #[serde(default)]
    pub append: Option<String>,
}

impl TransformConfig {
    /// Apply the configured transforms to `text`
    pub fn apply(&self, text: &str) -> String {
        let mut text = if self.upper {
            text.to_uppercase()
        } else {
            text.to_string()
        };

        if self.reverse {
            text = text.chars().rev().collect();
        }

        if let Some(suffix) = &self.append {
            text.push_str(suffix);
        }

        text
    }
}

/// Broker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub ready_file: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    crate::address::DEFAULT_PORT
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            id: None,
            host: default_host(),
            port: default_port(),
            ready_file: None,
        }
    }
}

impl BrokerConfig {
    /// `host:port` to listen on
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
