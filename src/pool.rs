//! Core proxy pool implementation.

use crate::config::ProxyProvider;
use crate::error::{Error, Result};
use crate::proxy::{Proxy, ProxyStats};
use crate::utils;

use log::info;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) type StatsMap = HashMap<Proxy, ProxyStats>;

/// A fixed, ordered set of proxies and their usage counters.
///
/// The proxy list never changes after construction. All counters and ban
/// state live behind a single mutex, so every update is atomic.
pub struct ProxyPool {
    /// All proxies, in provider order.
    proxies: Vec<Proxy>,
    /// Counters keyed by proxy URL.
    stats: Mutex<StatsMap>,
}

impl ProxyPool {
    /// Build a pool from the configured providers.
    ///
    /// Fails with `Misconfigured` when no provider is given, when a provider
    /// cannot be turned into a proxy URL, or when two providers resolve to the
    /// same proxy. Duplicates are refused, not merged: a proxy's URL is its
    /// identity, so two providers with the same URL would share one stats
    /// record and skew round-robin order.
    pub fn new(providers: &[ProxyProvider]) -> Result<Self> {
        let proxies = Self::build(providers)?;
        let stats = proxies
            .iter()
            .map(|proxy| (proxy.clone(), ProxyStats::default()))
            .collect::<StatsMap>();
        if stats.len() != proxies.len() {
            return Err(Error::Misconfigured(
                "proxy providers contain duplicate proxies".to_string(),
            ));
        }

        info!("Proxy pool initialized with {} proxies", proxies.len());

        Ok(Self {
            proxies,
            stats: Mutex::new(stats),
        })
    }

    /// Turn providers into proxies, keeping their order.
    pub fn build(providers: &[ProxyProvider]) -> Result<Vec<Proxy>> {
        if providers.is_empty() {
            return Err(Error::Misconfigured(
                "no proxy providers configured".to_string(),
            ));
        }
        providers
            .iter()
            .map(|provider| utils::proxy_url_for(provider).map(Proxy::new))
            .collect()
    }

    /// All proxies, in rotation order.
    pub fn proxies(&self) -> &[Proxy] {
        &self.proxies
    }

    /// Number of proxies in the pool.
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// Always false: empty pools are rejected at construction.
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Count a selection of `proxy`. Unknown proxies are ignored.
    pub fn record_request(&self, proxy: &str) {
        if let Some(stats) = self.stats.lock().get_mut(proxy) {
            stats.requests += 1;
        }
    }

    /// Count a successful outcome. Unknown proxies are ignored.
    pub fn record_success(&self, proxy: &str) {
        if let Some(stats) = self.stats.lock().get_mut(proxy) {
            stats.successes += 1;
        }
    }

    /// Count a failed outcome. Unknown proxies are ignored.
    pub fn record_failure(&self, proxy: &str) {
        if let Some(stats) = self.stats.lock().get_mut(proxy) {
            stats.failures += 1;
        }
    }

    /// Proxies not banned at `now`, in pool order.
    pub fn available(&self, now: SystemTime) -> Vec<Proxy> {
        let stats = self.stats.lock();
        self.available_in(&stats, now).into_iter().cloned().collect()
    }

    /// Whether `proxy` is banned at `now`. Unknown proxies are never banned.
    pub fn is_banned(&self, proxy: &str, now: SystemTime) -> bool {
        self.stats
            .lock()
            .get(proxy)
            .is_some_and(|stats| stats.is_banned(now))
    }

    /// Copy of the counters of one proxy.
    pub fn stats(&self, proxy: &str) -> Option<ProxyStats> {
        self.stats.lock().get(proxy).copied()
    }

    /// Copy of all counters, in pool order.
    pub fn snapshot(&self) -> Vec<(Proxy, ProxyStats)> {
        let stats = self.stats.lock();
        self.proxies
            .iter()
            .map(|proxy| (proxy.clone(), stats.get(proxy).copied().unwrap_or_default()))
            .collect()
    }

    /// Lift every ban.
    pub fn reset_bans(&self) {
        Self::reset_bans_in(&mut self.stats.lock());
    }

    pub(crate) fn lock_stats(&self) -> MutexGuard<'_, StatsMap> {
        self.stats.lock()
    }

    pub(crate) fn available_in<'a>(&'a self, stats: &StatsMap, now: SystemTime) -> Vec<&'a Proxy> {
        self.proxies
            .iter()
            .filter(|proxy| stats.get(*proxy).is_some_and(|s| !s.is_banned(now)))
            .collect()
    }

    pub(crate) fn reset_bans_in(stats: &mut StatsMap) {
        for entry in stats.values_mut() {
            entry.banned_until = UNIX_EPOCH;
        }
    }
}
