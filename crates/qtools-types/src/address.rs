//! Address URLs
//!
//! `[SCHEME:][//SERVER/]ADDRESS`, for example `queue0`, `//localhost/queue0`
//! or `amqp://example.net:10000/jobs`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default AMQP port
pub const DEFAULT_PORT: u16 = 5672;

/// Connection scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Amqp,
    Amqps,
}

impl std::str::FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "amqp" => Ok(Self::Amqp),
            "amqps" => Ok(Self::Amqps),
            _ => Err(format!("Unknown scheme: {}", s)),
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Amqp => write!(f, "amqp"),
            Self::Amqps => write!(f, "amqps"),
        }
    }
}

/// A `HOST[:PORT]` server location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

impl Server {
    /// Parse `HOST[:PORT]`
    pub fn parse(value: &str) -> Result<Self> {
        let (host, port) = split_host_port(value)
            .map_err(|reason| Error::invalid_url(value, reason))?;

        Ok(Self {
            host: host.unwrap_or("127.0.0.1").to_string(),
            port: port.unwrap_or(DEFAULT_PORT),
        })
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl std::fmt::Display for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A fully resolved address URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Queue or topic address, without the leading slash
    pub address: String,
}

impl Endpoint {
    /// Parse an address URL, filling in missing parts from `server`.
    ///
    /// With `tls` set the default scheme is `amqps`.
    pub fn parse(url: &str, server: &Server, tls: bool) -> Result<Self> {
        let (scheme, rest) = match url.split_once(':') {
            Some((prefix, rest))
                if !prefix.is_empty()
                    && !url.starts_with("//")
                    && !prefix.contains('/')
                    && prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '+') =>
            {
                let scheme = prefix
                    .parse::<Scheme>()
                    .map_err(|reason| Error::invalid_url(url, reason))?;
                (Some(scheme), rest)
            }
            _ => (None, url),
        };

        let (host, port, path) = match rest.strip_prefix("//") {
            Some(authority_and_path) => {
                let (authority, path) = match authority_and_path.find('/') {
                    Some(index) => authority_and_path.split_at(index),
                    None => (authority_and_path, ""),
                };
                let authority = authority.rsplit('@').next().unwrap_or(authority);
                let (host, port) =
                    split_host_port(authority).map_err(|reason| Error::invalid_url(url, reason))?;
                (host, port, path)
            }
            None => (None, None, rest),
        };

        let address = path.strip_prefix('/').unwrap_or(path);

        if address.is_empty() {
            return Err(Error::invalid_url(url, "The URL has no path"));
        }

        let default_scheme = if tls { Scheme::Amqps } else { Scheme::Amqp };

        Ok(Self {
            scheme: scheme.unwrap_or(default_scheme),
            host: host.unwrap_or(&server.host).to_string(),
            port: port.unwrap_or(server.port),
            address: address.to_string(),
        })
    }

    /// `host:port`, suitable for opening a socket
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `scheme://host:port`
    pub fn connection_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.connection_url(), self.address)
    }
}

fn split_host_port(value: &str) -> std::result::Result<(Option<&str>, Option<u16>), String> {
    let (host, port) = match value.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| format!("Invalid port '{}'", port))?;
            (host, Some(port))
        }
        None => (value, None),
    };

    let host = if host.is_empty() { None } else { Some(host) };

    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(url: &str) -> Result<Endpoint> {
        Endpoint::parse(url, &Server::default(), false)
    }

    #[test]
    fn test_bare_address() {
        let endpoint = parse("queue0").unwrap();
        assert_eq!(endpoint.scheme, Scheme::Amqp);
        assert_eq!(endpoint.host, "127.0.0.1");
        assert_eq!(endpoint.port, 5672);
        assert_eq!(endpoint.address, "queue0");
    }

    #[test]
    fn test_server_and_address() {
        let endpoint = parse("//localhost/queue0").unwrap();
        assert_eq!(endpoint.host, "localhost");
        assert_eq!(endpoint.port, 5672);
        assert_eq!(endpoint.address, "queue0");
    }

    #[test]
    fn test_full_url() {
        let endpoint = parse("amqps://10.0.0.10:10000/jobs/alpha").unwrap();
        assert_eq!(endpoint.scheme, Scheme::Amqps);
        assert_eq!(endpoint.host, "10.0.0.10");
        assert_eq!(endpoint.port, 10000);
        assert_eq!(endpoint.address, "jobs/alpha");
        assert_eq!(endpoint.socket_addr(), "10.0.0.10:10000");
    }

    #[test]
    fn test_tls_default_scheme() {
        let endpoint = Endpoint::parse("jobs", &Server::default(), true).unwrap();
        assert_eq!(endpoint.scheme, Scheme::Amqps);
    }

    #[test]
    fn test_server_override() {
        let server = Server::parse("example.net:1234").unwrap();
        let endpoint = Endpoint::parse("jobs", &server, false).unwrap();
        assert_eq!(endpoint.socket_addr(), "example.net:1234");

        let server = Server::parse("example.net").unwrap();
        assert_eq!(server.port, DEFAULT_PORT);
    }

    #[test]
    fn test_invalid_urls() {
        assert!(matches!(parse("//localhost"), Err(Error::InvalidUrl { .. })));
        assert!(matches!(parse("//localhost:x/q0"), Err(Error::InvalidUrl { .. })));
        assert!(matches!(parse("http://localhost/q0"), Err(Error::InvalidUrl { .. })));
        assert!(matches!(parse(""), Err(Error::InvalidUrl { .. })));
    }
}
