//! Proxy rotation strategies.
//!
//! A strategy decides which proxy of a [`ProxyPool`] serves the next request
//! and how a failed outcome feeds back into the pool. Two strategies exist:
//!
//! - [`Sequential`]: plain round-robin. Outcomes are counted but never affect
//!   selection.
//! - [`Smart`]: bans a proxy for a cooldown once it reaches the failure
//!   threshold, and picks among the remaining proxies either round-robin or at
//!   random. A ban expires on its own when the cooldown has passed.

use crate::config::{RotationMode, RotatorConfig, MAX_COOLDOWN};
use crate::error::{Error, Result};
use crate::pool::ProxyPool;
use crate::proxy::Proxy;

use log::{info, warn};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

/// Selection policy over a proxy pool.
pub trait RotationStrategy: Send + Sync {
    /// Short label used in log lines.
    fn name(&self) -> &'static str;

    /// Pick the proxy for the next request.
    fn select(&self, pool: &ProxyPool, now: SystemTime) -> Proxy;

    /// Account for a failed outcome on `proxy`.
    fn report_failure(&self, pool: &ProxyPool, proxy: &str, _now: SystemTime) {
        pool.record_failure(proxy);
    }
}

/// Round-robin rotation without banning.
#[derive(Debug, Default)]
pub struct Sequential {
    current_index: AtomicUsize,
}

impl Sequential {
    /// Create a round-robin strategy starting at the first proxy.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RotationStrategy for Sequential {
    fn name(&self) -> &'static str {
        "Sequential"
    }

    fn select(&self, pool: &ProxyPool, _now: SystemTime) -> Proxy {
        let len = pool.len();
        // Read and advance in one step so concurrent callers get distinct slots.
        let index = self
            .current_index
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| Some((i + 1) % len))
            .unwrap_or_else(|i| i);
        pool.proxies()[index % len].clone()
    }
}

/// Rotation with failure-threshold bans and a cooldown.
#[derive(Debug)]
pub struct Smart {
    ban_threshold: u32,
    cooldown: Duration,
    rotation_mode: RotationMode,
    /// Used for round-robin selection.
    current_index: Mutex<usize>,
}

impl Smart {
    /// Create a smart strategy.
    ///
    /// A threshold of 0 is treated as 1, and a cooldown longer than
    /// [`MAX_COOLDOWN`] is shortened to it.
    pub fn new(ban_threshold: u32, cooldown: Duration, rotation_mode: RotationMode) -> Self {
        Self {
            ban_threshold: ban_threshold.max(1),
            cooldown: cooldown.min(MAX_COOLDOWN),
            rotation_mode,
            current_index: Mutex::new(0),
        }
    }

    /// Create a smart strategy from the rotator configuration.
    pub fn from_config(config: &RotatorConfig) -> Result<Self> {
        if config.ban_threshold == 0 {
            return Err(Error::Misconfigured(
                "ban threshold must be at least 1".to_string(),
            ));
        }
        Ok(Self::new(
            config.ban_threshold,
            config.cooldown,
            config.rotation_mode,
        ))
    }

    /// Failures since the last ban that trigger a new ban.
    pub fn ban_threshold(&self) -> u32 {
        self.ban_threshold
    }

    /// How long a ban lasts.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Selection among non-banned proxies.
    pub fn rotation_mode(&self) -> RotationMode {
        self.rotation_mode
    }

    /// Count a failure on `proxy` and ban it once the threshold is reached.
    ///
    /// Returns true when this failure imposed a ban. The failure counter
    /// restarts from zero after every ban.
    pub fn register_failure(&self, pool: &ProxyPool, proxy: &str, now: SystemTime) -> bool {
        let mut stats = pool.lock_stats();
        let Some(entry) = stats.get_mut(proxy) else {
            return false;
        };

        entry.failures += 1;
        if entry.failures < u64::from(self.ban_threshold) {
            return false;
        }

        entry.banned_until = self.ban_end(now);
        entry.failures = 0;
        entry.bans += 1;
        drop(stats);

        info!(
            "[Smart] Proxy temporarily banned for {:?}: {}",
            self.cooldown, proxy
        );
        true
    }

    fn ban_end(&self, now: SystemTime) -> SystemTime {
        now.checked_add(self.cooldown)
            .or_else(|| now.checked_add(MAX_COOLDOWN))
            .unwrap_or(now)
    }

    fn choose_random(available: &[&Proxy]) -> Proxy {
        let mut rng = rand::rng();
        let idx = rng.random_range(0..available.len());
        available[idx].clone()
    }
}

impl RotationStrategy for Smart {
    fn name(&self) -> &'static str {
        "Smart"
    }

    fn select(&self, pool: &ProxyPool, now: SystemTime) -> Proxy {
        // Lock order: cursor, then stats.
        let mut cursor = match self.rotation_mode {
            RotationMode::RoundRobin => Some(self.current_index.lock()),
            RotationMode::Random => None,
        };
        let mut stats = pool.lock_stats();

        let mut available = pool.available_in(&stats, now);
        if available.is_empty() {
            warn!("[Smart] All proxies are banned! Resetting bans.");
            ProxyPool::reset_bans_in(&mut stats);
            available = pool.proxies().iter().collect();
        }

        if let Some(cursor) = cursor.as_mut() {
            let proxies = pool.proxies();
            let len = proxies.len();
            for _ in 0..len {
                let proxy = &proxies[**cursor % len];
                **cursor = (**cursor + 1) % len;
                if available.contains(&proxy) {
                    return proxy.clone();
                }
            }
        }

        Self::choose_random(&available)
    }

    fn report_failure(&self, pool: &ProxyPool, proxy: &str, now: SystemTime) {
        self.register_failure(pool, proxy, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyProvider;
    use std::collections::HashSet;

    fn pool(n: u16) -> ProxyPool {
        let providers: Vec<_> = (1..=n)
            .map(|i| ProxyProvider::new(format!("p{}", i), "127.0.0.1", 1000 + i))
            .collect();
        ProxyPool::new(&providers).unwrap()
    }

    #[test]
    fn sequential_cycles_in_pool_order() {
        let pool = pool(3);
        let strategy = Sequential::new();
        let now = SystemTime::now();

        let picks: Vec<_> = (0..4).map(|_| strategy.select(&pool, now)).collect();
        assert_eq!(&picks[..3], pool.proxies());
        assert_eq!(picks[3], pool.proxies()[0]);
    }

    #[test]
    fn sequential_ignores_failures() {
        let pool = pool(2);
        let strategy = Sequential::new();
        let now = SystemTime::now();
        let first = strategy.select(&pool, now);
        for _ in 0..10 {
            strategy.report_failure(&pool, first.as_str(), now);
        }
        assert_eq!(pool.stats(first.as_str()).unwrap().failures, 10);
        assert!(!pool.is_banned(first.as_str(), now));
        strategy.select(&pool, now);
        assert_eq!(strategy.select(&pool, now), first);
    }

    #[test]
    fn sequential_concurrent_selections_are_balanced() {
        let pool = pool(4);
        let strategy = Sequential::new();
        let now = SystemTime::now();

        let picks: Vec<Proxy> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| (0..100).map(|_| strategy.select(&pool, now)).collect::<Vec<_>>()))
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        assert_eq!(picks.len(), 800);
        for proxy in pool.proxies() {
            assert_eq!(picks.iter().filter(|p| *p == proxy).count(), 200);
        }
    }

    #[test]
    fn ban_triggers_exactly_at_threshold() {
        let pool = pool(2);
        let strategy = Smart::new(3, Duration::from_secs(60), RotationMode::Random);
        let now = SystemTime::now();
        let proxy = pool.proxies()[0].as_str().to_string();

        assert!(!strategy.register_failure(&pool, &proxy, now));
        assert!(!strategy.register_failure(&pool, &proxy, now));
        assert!(!pool.is_banned(&proxy, now));
        assert_eq!(pool.stats(&proxy).unwrap().failures, 2);

        assert!(strategy.register_failure(&pool, &proxy, now));
        let stats = pool.stats(&proxy).unwrap();
        assert!(stats.banned_until > now);
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.bans, 1);
    }

    #[test]
    fn cooldown_expires_after_duration() {
        let pool = pool(2);
        let cooldown = Duration::from_secs(30);
        let strategy = Smart::new(1, cooldown, RotationMode::Random);
        let t0 = SystemTime::now();
        let proxy = pool.proxies()[1].clone();

        strategy.register_failure(&pool, proxy.as_str(), t0);
        assert!(!pool.available(t0).contains(&proxy));
        assert!(!pool.available(t0 + cooldown - Duration::from_millis(1)).contains(&proxy));
        assert!(pool.available(t0 + cooldown).contains(&proxy));
    }

    #[test]
    fn all_banned_falls_back_to_full_pool() {
        let pool = pool(2);
        let strategy = Smart::new(1, Duration::from_secs(60), RotationMode::RoundRobin);
        let now = SystemTime::now();
        for proxy in pool.proxies() {
            strategy.register_failure(&pool, proxy.as_str(), now);
        }
        assert!(pool.available(now).is_empty());

        let picked = strategy.select(&pool, now);
        assert!(pool.proxies().contains(&picked));
        assert_eq!(pool.available(now).len(), 2);
    }

    #[test]
    fn all_banned_fallback_in_random_mode() {
        let pool = pool(2);
        let strategy = Smart::new(1, Duration::from_secs(60), RotationMode::Random);
        let now = SystemTime::now();
        for proxy in pool.proxies() {
            strategy.register_failure(&pool, proxy.as_str(), now);
        }
        let picked = strategy.select(&pool, now);
        assert!(pool.proxies().contains(&picked));
    }

    #[test]
    fn round_robin_skips_banned() {
        let pool = pool(2);
        let strategy = Smart::new(1, Duration::from_secs(60), RotationMode::RoundRobin);
        let now = SystemTime::now();
        let a = pool.proxies()[0].clone();
        let b = pool.proxies()[1].clone();

        strategy.register_failure(&pool, a.as_str(), now);
        assert_eq!(strategy.select(&pool, now), b);
        assert_eq!(strategy.select(&pool, now), b);
    }

    #[test]
    fn round_robin_follows_pool_order() {
        let pool = pool(3);
        let strategy = Smart::new(3, Duration::from_secs(60), RotationMode::RoundRobin);
        let now = SystemTime::now();
        let picks: Vec<_> = (0..6).map(|_| strategy.select(&pool, now)).collect();
        assert_eq!(&picks[..3], pool.proxies());
        assert_eq!(&picks[3..], pool.proxies());
    }

    #[test]
    fn random_mode_only_returns_available_proxies() {
        let pool = pool(3);
        let strategy = Smart::new(1, Duration::from_secs(60), RotationMode::Random);
        let now = SystemTime::now();
        let banned = pool.proxies()[2].clone();
        strategy.register_failure(&pool, banned.as_str(), now);

        let used: HashSet<_> = (0..50).map(|_| strategy.select(&pool, now)).collect();
        assert!(!used.contains(&banned));
        assert!(used.iter().all(|p| pool.proxies().contains(p)));
    }

    #[test]
    fn concurrent_failures_ban_once_per_threshold() {
        let pool = pool(1);
        let strategy = Smart::new(5, Duration::from_secs(60), RotationMode::Random);
        let now = SystemTime::now();
        let proxy = pool.proxies()[0].as_str().to_string();

        let bans: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..10)
                .map(|_| {
                    s.spawn(|| {
                        (0..10)
                            .filter(|_| strategy.register_failure(&pool, &proxy, now))
                            .count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(bans, 20);
        let stats = pool.stats(&proxy).unwrap();
        assert_eq!(stats.bans, 20);
        assert_eq!(stats.failures, 0);
    }

    #[test]
    fn smart_round_robin_concurrent_selections_are_balanced() {
        let pool = pool(4);
        let strategy = Smart::new(u32::MAX, Duration::from_secs(60), RotationMode::RoundRobin);
        let now = SystemTime::now();

        let picks: Vec<Proxy> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| (0..100).map(|_| strategy.select(&pool, now)).collect::<Vec<_>>()))
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        assert_eq!(picks.len(), 800);
        for proxy in pool.proxies() {
            assert_eq!(picks.iter().filter(|p| *p == proxy).count(), 800 / 4);
        }
    }

    #[test]
    fn unbounded_cooldown_bans_without_overflow() {
        let pool = pool(2);
        let strategy = Smart::new(1, Duration::from_secs(u64::MAX), RotationMode::RoundRobin);
        assert_eq!(strategy.cooldown(), MAX_COOLDOWN);
        let now = SystemTime::now();
        let proxy = pool.proxies()[0].clone();

        assert!(strategy.register_failure(&pool, proxy.as_str(), now));
        let stats = pool.stats(proxy.as_str()).unwrap();
        assert!(stats.banned_until > now + Duration::from_secs(365 * 24 * 60 * 60));
        assert_eq!(strategy.select(&pool, now), pool.proxies()[1]);
    }

    #[test]
    fn unknown_proxy_failures_are_ignored() {
        let pool = pool(2);
        let strategy = Smart::new(1, Duration::from_secs(60), RotationMode::Random);
        let now = SystemTime::now();
        let before = pool.snapshot();

        assert!(!strategy.register_failure(&pool, "http://10.9.9.9:1", now));
        strategy.report_failure(&pool, "http://10.9.9.9:1", now);

        assert_eq!(pool.snapshot(), before);
        assert_eq!(pool.available(now).len(), 2);
    }

    #[test]
    fn zero_threshold_is_misconfigured() {
        let config = RotatorConfig::builder()
            .provider(ProxyProvider::new("p", "127.0.0.1", 1))
            .ban_threshold(0)
            .build();
        assert!(matches!(Smart::from_config(&config), Err(Error::Misconfigured(_))));
    }
}
