//! Reachability check for a single candidate.
//!
//! [`HttpsProber`] runs one candidate through three steps:
//!
//! 1. resolve the hostname and keep only the first address,
//! 2. drop it if that address lies in an excluded range,
//! 3. send an HTTPS `HEAD` request that presents the hostname for TLS and
//!    `Host` but dials the address from step 1 directly.
//!
//! Any response, whatever the status code, counts as reachable. Every
//! failure is logged and reported as unreachable; nothing propagates to the
//! caller.
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::{error::ResolveError, TokioAsyncResolver};
use log::{debug, warn};
use reqwest::{redirect, StatusCode, Url};
use thiserror::Error;
use tokio::time::{self, Instant};

use crate::address::resolve_first;
use crate::exclusion::ExclusionFilter;

/// Port the request is sent to unless overridden.
pub const HTTPS_PORT: u16 = 443;

/// The seam between the worker pool and whatever decides reachability.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Returns `true` when `host` should be reported as reachable.
    async fn probe(&self, host: &str) -> bool;
}

/// Why a probe ended without a response.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("lookup failed: {0}")]
    Lookup(#[from] ResolveError),

    #[error("lookup returned no addresses")]
    NoAddress,

    #[error("{0} is in an excluded range")]
    Excluded(IpAddr),

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("invalid host: {0}")]
    InvalidHost(String),

    #[error("round trip to {ip} failed: {source}")]
    RoundTrip {
        ip: IpAddr,
        #[source]
        source: reqwest::Error,
    },
}

/// Resolves, range-checks and sends a pinned HTTPS `HEAD` request.
pub struct HttpsProber {
    resolver: TokioAsyncResolver,
    filter: Arc<ExclusionFilter>,
    timeout: Option<Duration>,
    port: u16,
}

impl HttpsProber {
    /// `timeout` bounds the whole probe, lookup and round trip together.
    /// `None` leaves both unbounded apart from the resolver's own per-query
    /// timeouts.
    pub fn new(
        resolver: TokioAsyncResolver,
        filter: Arc<ExclusionFilter>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            resolver,
            filter,
            timeout: timeout.filter(|d| !d.is_zero()),
            port: HTTPS_PORT,
        }
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Runs the probe and returns the response status, or why there was none.
    pub async fn attempt(&self, host: &str) -> Result<StatusCode, ProbeError> {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);

        let ip = self
            .bounded(deadline, "lookup", resolve_first(&self.resolver, host))
            .await??
            .ok_or(ProbeError::NoAddress)?;

        if self.filter.contains_ip(ip) {
            return Err(ProbeError::Excluded(ip));
        }

        self.bounded(deadline, "round trip", self.ping(host, ip)).await?
    }

    /// Sends `HEAD https://host/` over a connection dialed to `ip`.
    async fn ping(&self, host: &str, ip: IpAddr) -> Result<StatusCode, ProbeError> {
        let mut url = Url::parse(&format!("https://{host}/"))
            .map_err(|e| ProbeError::InvalidHost(format!("{host:?}: {e}")))?;
        url.set_port(Some(self.port))
            .map_err(|()| ProbeError::InvalidHost(format!("{host:?}: cannot carry a port")))?;

        // Pin using the normalised host so the override matches what the
        // client looks up; a mismatch would fall back to regular DNS. The
        // override is fixed at build time, hence one client per probe.
        let pinned = url.host_str().unwrap_or(host).to_owned();
        let client = reqwest::Client::builder()
            .resolve(&pinned, SocketAddr::new(ip, self.port))
            .redirect(redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|source| ProbeError::RoundTrip { ip, source })?;

        let response = client
            .head(url)
            .send()
            .await
            .map_err(|source| ProbeError::RoundTrip { ip, source })?;

        let status = response.status();
        drop(response);
        Ok(status)
    }

    async fn bounded<F: std::future::Future>(
        &self,
        deadline: Option<Instant>,
        stage: &'static str,
        fut: F,
    ) -> Result<F::Output, ProbeError> {
        match (deadline, self.timeout) {
            (Some(at), Some(after)) => time::timeout_at(at, fut)
                .await
                .map_err(|_| ProbeError::Timeout { stage, after }),
            _ => Ok(fut.await),
        }
    }
}

#[async_trait]
impl Probe for HttpsProber {
    async fn probe(&self, host: &str) -> bool {
        match self.attempt(host).await {
            Ok(status) => {
                debug!("{host} answered {status}");
                true
            }
            Err(ProbeError::Excluded(ip)) => {
                debug!("Skipping {host}: {ip} is in an excluded range");
                false
            }
            Err(e @ (ProbeError::Lookup(_) | ProbeError::NoAddress)) => {
                warn!("Error lookup {host}: {e}");
                false
            }
            Err(e) => {
                warn!("Error probing {host}: {e}");
                false
            }
        }
    }
}
