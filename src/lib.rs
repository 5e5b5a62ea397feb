//! # crawl-proxy-rotator
//!
//! Proxy rotation with health tracking for crawlers.
//!
//! This library builds a fixed pool of proxies from provider credentials, rotates
//! requests over it with either a plain round-robin strategy or a smart strategy
//! that bans failing proxies for a cooldown, and keeps per-proxy usage counters
//! that are summarized when the crawl closes. The rotator plugs into a crawler
//! through the `CrawlLifecycle` hooks, or into a reqwest client as a middleware.

pub mod config;
pub mod error;
pub mod middleware;
pub mod pool;
pub mod proxy;
pub mod rotation;
mod utils;

pub use config::{ProxyProvider, RotationMode, RotatorConfig, RotatorConfigBuilder};
pub use error::{Error, Result};
pub use middleware::{
    CrawlLifecycle, ProxySummary, RotatorMiddleware, SelectedProxy, SequentialRotatorMiddleware,
    SmartRotatorMiddleware,
};
pub use pool::ProxyPool;
pub use proxy::{Proxy, ProxyStats};
pub use rotation::{RotationStrategy, Sequential, Smart};
