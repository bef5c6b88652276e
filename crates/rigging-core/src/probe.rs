//! Pluggable readiness checks.
//!
//! A probe is evaluated once per call; [`Runnable::wait_ready`] repeats it
//! under a backoff. Probes never run on their own.
//!
//! [`Runnable::wait_ready`]: crate::runnable::Runnable::wait_ready

use std::fmt;
use std::net::{TcpStream, ToSocketAddrs};
use std::ops::RangeInclusive;

use rigging_common::constants::PROBE_TIMEOUT;
use rigging_common::error::{Result, RiggingError};

use crate::command::{Command, ExecOptions};
use crate::runnable::Runnable;

/// URL scheme used for HTTP probes and metric scrapes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain HTTP.
    #[default]
    Http,
    /// HTTPS with certificate verification disabled.
    Https,
}

impl Scheme {
    /// Returns the scheme as used in URLs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds a blocking HTTP client for test-local endpoints.
///
/// Certificate verification is off: workloads use self-signed certificates
/// and the endpoints are never a trust boundary.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn http_client(timeout: std::time::Duration) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|e| RiggingError::config(format!("failed to build HTTP client: {e}")))
}

/// GET a path and check status and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpProbe {
    /// Logical port name to probe.
    pub port: String,
    /// Request path, starting with `/`.
    pub path: String,
    /// URL scheme.
    pub scheme: Scheme,
    /// Accepted status codes, inclusive.
    pub status: RangeInclusive<u16>,
    /// Substrings that must all appear in the body.
    pub body_contains: Vec<String>,
}

impl HttpProbe {
    /// Probes `path` on `port`, accepting any 2xx status.
    #[must_use]
    pub fn new(port: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            path: path.into(),
            scheme: Scheme::Http,
            status: 200..=299,
            body_contains: Vec::new(),
        }
    }

    /// Sets the URL scheme.
    #[must_use]
    pub const fn scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Sets the accepted status range.
    #[must_use]
    pub const fn status(mut self, status: RangeInclusive<u16>) -> Self {
        self.status = status;
        self
    }

    /// Requires `needle` to appear in the response body.
    #[must_use]
    pub fn body_contains(mut self, needle: impl Into<String>) -> Self {
        self.body_contains.push(needle.into());
        self
    }

    fn check(&self, runnable: &Runnable) -> Result<()> {
        let address = external_address(runnable, &self.port)?;
        let url = format!("{}://{address}{}", self.scheme, self.path);
        let client = http_client(PROBE_TIMEOUT)?;
        let response = client
            .get(&url)
            .send()
            .map_err(|e| RiggingError::probe(format!("GET {url}: {e}")))?;
        let status = response.status().as_u16();
        if !self.status.contains(&status) {
            return Err(RiggingError::probe(format!(
                "GET {url}: status {status} outside {}..={}",
                self.status.start(),
                self.status.end()
            )));
        }
        if self.body_contains.is_empty() {
            return Ok(());
        }
        let body = response
            .text()
            .map_err(|e| RiggingError::probe(format!("GET {url}: reading body: {e}")))?;
        if let Some(missing) = self.body_contains.iter().find(|n| !body.contains(n.as_str())) {
            return Err(RiggingError::probe(format!(
                "GET {url}: body does not contain {missing:?}"
            )));
        }
        Ok(())
    }
}

/// Succeeds once a TCP connection can be established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpProbe {
    /// Logical port name to dial.
    pub port: String,
}

impl TcpProbe {
    /// Dials `port`.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self { port: port.into() }
    }

    fn check(&self, runnable: &Runnable) -> Result<()> {
        let address = external_address(runnable, &self.port)?;
        let targets = address
            .to_socket_addrs()
            .map_err(|e| RiggingError::probe(format!("resolving {address}: {e}")))?;
        let mut last = format!("no addresses for {address}");
        for target in targets {
            match TcpStream::connect_timeout(&target, PROBE_TIMEOUT) {
                Ok(_) => return Ok(()),
                Err(e) => last = format!("dial {target}: {e}"),
            }
        }
        Err(RiggingError::probe(last))
    }
}

/// Succeeds once a command inside the workload exits zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandProbe {
    /// Command to run inside the workload.
    pub command: Command,
}

impl CommandProbe {
    /// Runs `command` inside the workload.
    #[must_use]
    pub const fn new(command: Command) -> Self {
        Self { command }
    }

    fn check(&self, runnable: &Runnable) -> Result<()> {
        runnable
            .exec(&self.command, ExecOptions::default())
            .map(|_| ())
            .map_err(|e| RiggingError::probe(format!("`{}`: {e}", self.command)))
    }
}

/// A readiness check selected per workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessProbe {
    /// HTTP(S) status and body check.
    Http(HttpProbe),
    /// TCP dial.
    Tcp(TcpProbe),
    /// In-workload command exit code.
    Command(CommandProbe),
}

impl ReadinessProbe {
    /// HTTP probe on `path` of `port`, accepting 2xx.
    #[must_use]
    pub fn http(port: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Http(HttpProbe::new(port, path))
    }

    /// TCP dial probe on `port`.
    #[must_use]
    pub fn tcp(port: impl Into<String>) -> Self {
        Self::Tcp(TcpProbe::new(port))
    }

    /// Command probe.
    #[must_use]
    pub const fn command(command: Command) -> Self {
        Self::Command(CommandProbe::new(command))
    }

    /// Logical port the probe targets, if any.
    #[must_use]
    pub fn port(&self) -> Option<&str> {
        match self {
            Self::Http(p) => Some(&p.port),
            Self::Tcp(p) => Some(&p.port),
            Self::Command(_) => None,
        }
    }

    /// Evaluates the probe once against `runnable`.
    ///
    /// # Errors
    ///
    /// Returns a [`RiggingError::Probe`] describing why the workload is not
    /// ready yet.
    pub fn check(&self, runnable: &Runnable) -> Result<()> {
        match self {
            Self::Http(p) => p.check(runnable),
            Self::Tcp(p) => p.check(runnable),
            Self::Command(p) => p.check(runnable),
        }
    }
}

impl From<HttpProbe> for ReadinessProbe {
    fn from(probe: HttpProbe) -> Self {
        Self::Http(probe)
    }
}

fn external_address(runnable: &Runnable, port: &str) -> Result<String> {
    let endpoint = runnable.endpoint(port);
    if endpoint.is_empty() {
        return Err(RiggingError::UndeclaredPort {
            runnable: runnable.name().to_string(),
            port: port.to_string(),
        });
    }
    if !runnable.is_running() {
        return Err(RiggingError::NotRunning {
            name: runnable.name().to_string(),
        });
    }
    Ok(endpoint)
}
