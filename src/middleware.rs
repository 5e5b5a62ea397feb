//! Rotator middleware: the per-request integration point.
//!
//! The crawler engine drives a [`RotatorMiddleware`] through the
//! [`CrawlLifecycle`] hooks. The selected proxy travels from selection time to
//! outcome time inside the request's [`http::Extensions`] as a
//! [`SelectedProxy`]. The middleware also implements
//! [`reqwest_middleware::Middleware`], so a reqwest client can route its
//! requests through the rotated proxies directly. It ends the middleware chain:
//! it sends the request itself rather than handing it to the next middleware.

use crate::config::RotatorConfig;
use crate::error::Result;
use crate::pool::ProxyPool;
use crate::proxy::{Proxy, ProxyStats};
use crate::rotation::{RotationStrategy, Sequential, Smart};

use anyhow::anyhow;
use async_trait::async_trait;
use http::{Extensions, StatusCode};
use log::{debug, info, warn};
use parking_lot::RwLock;
use reqwest_middleware::{Error, Middleware, Next};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// The proxy picked for a request, kept in the request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedProxy(pub Proxy);

/// Lifecycle hooks the crawler engine calls for every request.
pub trait CrawlLifecycle {
    /// A request is about to be sent: pick a proxy and tag the request.
    fn on_request_issued(&self, meta: &mut Extensions);

    /// A response arrived for a tagged request.
    fn on_response_received(&self, meta: &Extensions, status: StatusCode);

    /// Sending a tagged request failed before any response arrived.
    fn on_exception_raised(&self, meta: &Extensions, error: &dyn std::error::Error);

    /// The crawl is over: report per-proxy usage.
    fn on_crawl_closed(&self) -> Vec<ProxySummary>;
}

/// Usage summary of one proxy at the end of a crawl.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxySummary {
    /// The proxy this summary describes.
    pub proxy: Proxy,
    /// Times the proxy was selected.
    pub requests: u64,
    /// Outcomes classified successful.
    pub successes: u64,
    /// Failures since the last ban.
    pub failures: u64,
    /// Bans imposed over the crawl.
    pub bans: u64,
    /// Percentage of selections that succeeded.
    pub success_rate: f64,
    /// Whether the proxy was banned when the summary was taken.
    pub is_banned: bool,
}

impl ProxySummary {
    fn new(proxy: Proxy, stats: &ProxyStats, now: SystemTime) -> Self {
        Self {
            proxy,
            requests: stats.requests,
            successes: stats.successes,
            failures: stats.failures,
            bans: stats.bans,
            success_rate: stats.success_rate(),
            is_banned: stats.is_banned(now),
        }
    }
}

impl fmt::Display for ProxySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Proxy: {}", self.proxy)?;
        writeln!(f, "  Total requests: {}", self.requests)?;
        writeln!(f, "  Successes: {}", self.successes)?;
        writeln!(f, "  Failures: {}", self.failures)?;
        writeln!(f, "  Bans: {}", self.bans)?;
        writeln!(f, "  Success rate: {:.1}%", self.success_rate)?;
        write!(f, "  Banned: {}", if self.is_banned { "YES" } else { "NO" })
    }
}

/// Middleware that rotates requests over a pool of proxies.
pub struct RotatorMiddleware<S> {
    pool: Arc<ProxyPool>,
    strategy: Arc<S>,
    request_timeout: Duration,
    /// One client per proxy, built on first use.
    clients: Arc<RwLock<HashMap<Proxy, reqwest::Client>>>,
}

/// Round-robin rotation without bans.
pub type SequentialRotatorMiddleware = RotatorMiddleware<Sequential>;
/// Rotation with failure bans and cooldown.
pub type SmartRotatorMiddleware = RotatorMiddleware<Smart>;

impl RotatorMiddleware<Sequential> {
    /// Create a round-robin rotator.
    pub fn sequential(config: &RotatorConfig) -> Result<Self> {
        Self::with_strategy(config, Sequential::new())
    }
}

impl RotatorMiddleware<Smart> {
    /// Create a rotator that bans failing proxies.
    pub fn smart(config: &RotatorConfig) -> Result<Self> {
        let strategy = Smart::from_config(config)?;
        Self::with_strategy(config, strategy)
    }
}

impl<S: RotationStrategy> RotatorMiddleware<S> {
    /// Create a rotator over the configured providers using `strategy`.
    ///
    /// Fails with `Misconfigured` when the providers cannot form a pool.
    pub fn with_strategy(config: &RotatorConfig, strategy: S) -> Result<Self> {
        let pool = ProxyPool::new(&config.providers)?;
        info!(
            "[{}] Proxy rotator initialized with {} proxies",
            strategy.name(),
            pool.len()
        );
        Ok(Self {
            pool: Arc::new(pool),
            strategy: Arc::new(strategy),
            request_timeout: config.request_timeout,
            clients: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// The proxy pool.
    pub fn pool(&self) -> &ProxyPool {
        &self.pool
    }

    /// The rotation strategy.
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Per-proxy summary evaluated at `now`, in pool order.
    pub fn summary_at(&self, now: SystemTime) -> Vec<ProxySummary> {
        self.pool
            .snapshot()
            .into_iter()
            .map(|(proxy, stats)| ProxySummary::new(proxy, &stats, now))
            .collect()
    }

    fn report_failure(&self, proxy: &Proxy) {
        self.strategy
            .report_failure(&self.pool, proxy.as_str(), SystemTime::now());
    }

    fn client_for(&self, proxy: &Proxy) -> std::result::Result<reqwest::Client, reqwest::Error> {
        let cached = self.clients.read().get(proxy).cloned();
        if let Some(client) = cached {
            return Ok(client);
        }

        let client = reqwest::Client::builder()
            .proxy(proxy.to_reqwest_proxy()?)
            .timeout(self.request_timeout)
            .build()?;
        Ok(self
            .clients
            .write()
            .entry(proxy.clone())
            .or_insert(client)
            .clone())
    }
}

impl<S: RotationStrategy> CrawlLifecycle for RotatorMiddleware<S> {
    fn on_request_issued(&self, meta: &mut Extensions) {
        let proxy = self.strategy.select(&self.pool, SystemTime::now());
        self.pool.record_request(proxy.as_str());
        debug!("[{}] Using proxy: {}", self.strategy.name(), proxy);
        meta.insert(SelectedProxy(proxy));
    }

    fn on_response_received(&self, meta: &Extensions, status: StatusCode) {
        let Some(SelectedProxy(proxy)) = meta.get::<SelectedProxy>() else {
            return;
        };
        if status.as_u16() < 400 {
            self.pool.record_success(proxy.as_str());
        } else {
            self.report_failure(proxy);
            warn!(
                "[{}] Proxy {} failed (HTTP {})",
                self.strategy.name(),
                proxy,
                status.as_u16()
            );
        }
    }

    fn on_exception_raised(&self, meta: &Extensions, error: &dyn std::error::Error) {
        let Some(SelectedProxy(proxy)) = meta.get::<SelectedProxy>() else {
            return;
        };
        self.report_failure(proxy);
        warn!(
            "[{}] Proxy {} raised exception: {}",
            self.strategy.name(),
            proxy,
            error
        );
    }

    fn on_crawl_closed(&self) -> Vec<ProxySummary> {
        let summary = self.summary_at(SystemTime::now());
        let rule = "=".repeat(60);
        info!("{}", rule);
        info!("PROXY USAGE SUMMARY");
        info!("{}", rule);
        for entry in &summary {
            info!("{}\n{}", entry, "-".repeat(50));
        }
        info!("{}", rule);
        summary
    }
}

impl<S> Clone for RotatorMiddleware<S> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            strategy: Arc::clone(&self.strategy),
            request_timeout: self.request_timeout,
            clients: Arc::clone(&self.clients),
        }
    }
}

/// Sends the request itself through a client bound to the selected proxy.
///
/// `next` is never called, so middlewares registered after the rotator do not
/// run. Register the rotator last in the chain.
#[async_trait]
impl<S: RotationStrategy + 'static> Middleware for RotatorMiddleware<S> {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut Extensions,
        _next: Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        self.on_request_issued(extensions);
        let Some(SelectedProxy(proxy)) = extensions.get::<SelectedProxy>().cloned() else {
            return Err(Error::Middleware(anyhow!("no proxy selected for request")));
        };

        let client = match self.client_for(&proxy) {
            Ok(client) => client,
            Err(e) => {
                self.on_exception_raised(extensions, &e);
                return Err(Error::Reqwest(e));
            }
        };

        // Retries are left to the caller; this only reports the outcome.
        match client.execute(req).await {
            Ok(response) => {
                self.on_response_received(extensions, response.status());
                Ok(response)
            }
            Err(err) => {
                self.on_exception_raised(extensions, &err);
                Err(Error::Reqwest(err))
            }
        }
    }
}
