//! Port/protocol discovery for first-time registration.
//!
//! Operators often type a bare host name or the wrong scheme/port. Discovery
//! expands the entered address into candidate base URLs and tries each in turn.

use std::future::Future;

use tracing::{debug, info};

use super::error::{ClientError, ClientResult};

/// Ports tried after any explicitly entered port, in order.
pub const FALLBACK_PORTS: [u16; 3] = [5151, 5000, 80];

/// Protocols tried for each port, in order.
pub const PROTOCOLS: [&str; 2] = ["https", "http"];

/// An address as entered by the operator, split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnteredAddress {
    pub scheme: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    /// Path prefix without a trailing slash (empty for none).
    pub path: String,
}

impl EnteredAddress {
    pub fn parse(address: &str) -> ClientResult<Self> {
        let trimmed = address.trim().trim_end_matches('/');

        let (scheme, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
            None => (None, trimmed),
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], rest[idx..].to_string()),
            None => (rest, String::new()),
        };

        let (host, port) = split_host_port(authority)
            .map_err(|message| ClientError::invalid_url(address, message))?;

        if host.is_empty() {
            return Err(ClientError::invalid_url(address, "missing host"));
        }

        Ok(Self {
            scheme,
            host,
            port,
            path,
        })
    }

    /// Candidate ports: the explicit port first, then the fallbacks, without duplicates.
    pub fn candidate_ports(&self) -> Vec<u16> {
        let mut ports = Vec::with_capacity(FALLBACK_PORTS.len() + 1);
        for port in self.port.into_iter().chain(FALLBACK_PORTS) {
            if !ports.contains(&port) {
                ports.push(port);
            }
        }
        ports
    }

    /// Candidate protocols: an entered http/https scheme first.
    pub fn candidate_protocols(&self) -> Vec<&'static str> {
        let mut protocols: Vec<&'static str> = PROTOCOLS.to_vec();
        if let Some(pos) = self
            .scheme
            .as_deref()
            .and_then(|s| protocols.iter().position(|p| *p == s))
        {
            let preferred = protocols.remove(pos);
            protocols.insert(0, preferred);
        }
        protocols
    }

    /// Every (port, protocol) combination as a base URL, ports outermost.
    pub fn candidate_urls(&self) -> Vec<String> {
        let protocols = self.candidate_protocols();
        self.candidate_ports()
            .into_iter()
            .flat_map(|port| {
                protocols
                    .iter()
                    .map(move |protocol| format!("{protocol}://{}:{port}{}/", self.host, self.path))
            })
            .collect()
    }
}

fn split_host_port(authority: &str) -> Result<(String, Option<u16>), String> {
    // Bracketed IPv6 literal, e.g. [::1]:5000
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| "unterminated IPv6 literal".to_string())?;
        let port = match after.strip_prefix(':') {
            Some(port) => Some(parse_port(port)?),
            None => None,
        };
        return Ok((format!("[{host}]"), port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            Ok((host.to_string(), Some(parse_port(port)?)))
        }
        _ => Ok((authority.to_string(), None)),
    }
}

fn parse_port(port: &str) -> Result<u16, String> {
    port.parse::<u16>()
        .map_err(|_| format!("invalid port '{port}'"))
}

/// Try each candidate base URL with `attempt` until one succeeds.
///
/// Returns the winning base URL together with the attempt's result. Failures
/// fall through to the next candidate; if none succeeds the error lists every
/// URL tried and carries the last underlying error.
pub async fn discover<T, F, Fut>(address: &str, mut attempt: F) -> ClientResult<(String, T)>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    let entered = EnteredAddress::parse(address)?;
    let mut attempts = Vec::new();
    let mut last_error = None;

    for url in entered.candidate_urls() {
        debug!(url = %url, "Trying control plane candidate");
        attempts.push(url.clone());
        match attempt(url.clone()).await {
            Ok(value) => {
                info!(url = %url, attempts = attempts.len(), "Discovered control plane");
                return Ok((url, value));
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Candidate failed");
                last_error = Some(e);
            }
        }
    }

    Err(ClientError::Registration {
        attempts,
        last: Box::new(
            last_error.unwrap_or_else(|| ClientError::Unavailable("no candidates".to_string())),
        ),
    })
}
