//! Rate Limiting Module
//!
//! Per identity and route accounting with two strategies:
//!
//! - **Sliding**: the timestamps of admitted requests inside the trailing window.
//! - **Fixed**: a counter per `floor(now / window)` bucket.
//!
//! Limits scale with the caller's role multiplier. A route may define a block
//! duration; a violation on such a route starts a cooldown that denies every
//! request from that identity until it ends, regardless of window recovery.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::security::clock::SharedClock;
use crate::security::config::SecuritySettings;
use crate::security::events::{NotificationSink, SecurityEvent};
use crate::security::ip_filter::{IpAllowList, IpFilterError};
use crate::security::store::KeyedStore;

/// Key of the rule applied to routes with no configured limit
pub const DEFAULT_RULE: &str = "default";

/// Window accounting strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WindowStrategy {
    #[default]
    Sliding,
    Fixed,
}

/// Rate limit configuration for one route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteLimit {
    /// Window length in milliseconds
    pub window_ms: i64,
    /// Requests per window before the role multiplier
    pub max: u32,
    /// Cooldown started by a violation
    pub block_duration_ms: Option<i64>,
    pub strategy: WindowStrategy,
}

impl Default for RouteLimit {
    fn default() -> Self {
        Self::new(60_000, 100, None, WindowStrategy::Sliding)
    }
}

impl RouteLimit {
    pub fn new(
        window_ms: i64,
        max: u32,
        block_duration_ms: Option<i64>,
        strategy: WindowStrategy,
    ) -> Self {
        Self {
            window_ms,
            max,
            block_duration_ms,
            strategy,
        }
    }
}

/// Rate limit result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Effective limit for this caller
    pub limit: u32,
    pub remaining: u32,
    /// Epoch milliseconds at which quota frees up
    pub reset_at_ms: i64,
    /// Zero when allowed
    pub retry_after_secs: u64,
    /// A cooldown block is active
    pub blocked: bool,
}

impl RateLimitDecision {
    fn allowed(limit: u32, used: u32, reset_at_ms: i64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit.saturating_sub(used),
            reset_at_ms,
            retry_after_secs: 0,
            blocked: false,
        }
    }

    fn denied(limit: u32, reset_at_ms: i64, now_ms: i64, blocked: bool) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at_ms,
            retry_after_secs: retry_after_secs(reset_at_ms, now_ms),
            blocked,
        }
    }

    /// Reset time as epoch seconds, rounded up
    pub fn reset_at_secs(&self) -> i64 {
        (self.reset_at_ms + 999).div_euclid(1000)
    }
}

/// Read-only view of a caller's quota on a route
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitUsage {
    pub rule: String,
    pub limit: u32,
    pub used: u32,
    pub remaining: u32,
    pub blocked_until: Option<i64>,
}

fn scale_max(max: u32, multiplier: f64) -> u32 {
    (f64::from(max) * multiplier).floor().clamp(0.0, f64::from(u32::MAX)) as u32
}

fn retry_after_secs(reset_at_ms: i64, now_ms: i64) -> u64 {
    let remaining = (reset_at_ms - now_ms).max(0) as u64;
    remaining.div_ceil(1000).max(1)
}

/// Whether `prefix` covers `route` on a path-segment boundary
fn prefix_matches(prefix: &str, route: &str) -> bool {
    route.starts_with(prefix)
        && (route.len() == prefix.len()
            || prefix.ends_with('/')
            || route.as_bytes().get(prefix.len()) == Some(&b'/'))
}

#[derive(Debug, Clone, Copy)]
struct FixedWindow {
    count: u32,
}

/// In-memory rate limiter
pub struct RateLimiter {
    rules: HashMap<String, RouteLimit>,
    default_rule: RouteLimit,
    multipliers: HashMap<String, f64>,
    whitelist: IpAllowList,
    enabled: bool,
    longest_window_ms: i64,
    sliding: KeyedStore<String, VecDeque<i64>>,
    fixed: KeyedStore<String, FixedWindow>,
    /// identity -> blocked until, epoch ms
    blocks: KeyedStore<String, i64>,
    clock: SharedClock,
    sink: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("rules", &self.rules.len())
            .field("enabled", &self.enabled)
            .field("sliding", &self.sliding)
            .field("fixed", &self.fixed)
            .field("blocks", &self.blocks)
            .finish()
    }
}

impl RateLimiter {
    /// Create new rate limiter
    pub fn new(
        mut rules: HashMap<String, RouteLimit>,
        multipliers: HashMap<String, f64>,
        whitelist: IpAllowList,
        enabled: bool,
        clock: SharedClock,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let default_rule = rules.remove(DEFAULT_RULE).unwrap_or_default();
        let longest_window_ms = rules
            .values()
            .map(|r| r.window_ms)
            .chain(std::iter::once(default_rule.window_ms))
            .max()
            .unwrap_or(default_rule.window_ms);

        Self {
            rules,
            default_rule,
            multipliers,
            whitelist,
            enabled,
            longest_window_ms,
            sliding: KeyedStore::new(clock.clone()),
            fixed: KeyedStore::new(clock.clone()),
            blocks: KeyedStore::new(clock.clone()),
            clock,
            sink,
        }
    }

    /// Create from security settings
    pub fn from_settings(
        settings: &SecuritySettings,
        clock: SharedClock,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, IpFilterError> {
        Ok(Self::new(
            settings.rate_limits.clone(),
            settings.role_multipliers.clone(),
            IpAllowList::new(&settings.rate_limit_whitelist)?,
            settings.rate_limit_enabled,
            clock,
            sink,
        ))
    }

    /// Resolve the rule for `route`: exact path, then longest prefix, then default
    pub fn rule_for<'a>(&'a self, route: &str) -> (&'a str, &'a RouteLimit) {
        if let Some((key, rule)) = self.rules.get_key_value(route) {
            return (key.as_str(), rule);
        }
        self.rules
            .iter()
            .filter(|(prefix, _)| prefix_matches(prefix, route))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(key, rule)| (key.as_str(), rule))
            .unwrap_or((DEFAULT_RULE, &self.default_rule))
    }

    /// Configured multiplier for `role`; unknown or absent roles use 1
    pub fn multiplier_for(&self, role: Option<&str>) -> f64 {
        role.and_then(|r| self.multipliers.get(r))
            .copied()
            .unwrap_or(1.0)
    }

    /// `floor(max × multiplier)` for the role's multiplier
    pub fn effective_max(&self, max: u32, role: Option<&str>) -> u32 {
        scale_max(max, self.multiplier_for(role))
    }

    /// Check and record one request, scaling the limit by the role multiplier
    pub fn check(
        &self,
        identity: &str,
        route: &str,
        role: Option<&str>,
        client_ip: &str,
    ) -> RateLimitDecision {
        self.check_scaled(identity, route, self.multiplier_for(role), client_ip)
    }

    /// Check and record one request with an explicit quota multiplier
    pub fn check_scaled(
        &self,
        identity: &str,
        route: &str,
        multiplier: f64,
        client_ip: &str,
    ) -> RateLimitDecision {
        let now = self.clock.now_ms();
        let (rule_key, rule) = self.rule_for(route);
        let limit = scale_max(rule.max, multiplier);

        if !self.enabled || self.whitelist.allows(client_ip) {
            return RateLimitDecision::allowed(limit, 0, now + rule.window_ms);
        }

        if let Some(until) = self.blocks.get(&identity.to_string()) {
            return RateLimitDecision::denied(limit, until, now, true);
        }

        let decision = match rule.strategy {
            WindowStrategy::Sliding => self.check_sliding(identity, rule_key, rule, limit, now),
            WindowStrategy::Fixed => self.check_fixed(identity, rule_key, rule, limit, now),
        };

        if decision.allowed {
            return decision;
        }

        match rule.block_duration_ms {
            Some(duration) if duration > 0 => self.start_block(identity, route, limit, duration, now),
            _ => {
                debug!(identity = %identity, rule = %rule_key, "Rate limit exceeded");
                decision
            }
        }
    }

    fn check_sliding(
        &self,
        identity: &str,
        rule_key: &str,
        rule: &RouteLimit,
        limit: u32,
        now: i64,
    ) -> RateLimitDecision {
        let cutoff = now - rule.window_ms;
        self.sliding.upsert(
            format!("{identity}|{rule_key}"),
            None,
            VecDeque::new,
            |stamps| {
                while stamps.front().is_some_and(|t| *t <= cutoff) {
                    stamps.pop_front();
                }
                if stamps.len() < limit as usize {
                    stamps.push_back(now);
                    let oldest = stamps.front().copied().unwrap_or(now);
                    RateLimitDecision::allowed(limit, stamps.len() as u32, oldest + rule.window_ms)
                } else {
                    let oldest = stamps.front().copied().unwrap_or(now);
                    RateLimitDecision::denied(limit, oldest + rule.window_ms, now, false)
                }
            },
        )
    }

    fn check_fixed(
        &self,
        identity: &str,
        rule_key: &str,
        rule: &RouteLimit,
        limit: u32,
        now: i64,
    ) -> RateLimitDecision {
        let window = rule.window_ms.max(1);
        let bucket = now.div_euclid(window);
        let reset_at = (bucket + 1) * window;
        let count = self.fixed.upsert(
            format!("{identity}|{rule_key}|{bucket}"),
            Some(window * 2),
            || FixedWindow { count: 0 },
            |w| {
                w.count = w.count.saturating_add(1);
                w.count
            },
        );

        if count <= limit {
            RateLimitDecision::allowed(limit, count, reset_at)
        } else {
            RateLimitDecision::denied(limit, reset_at, now, false)
        }
    }

    fn start_block(
        &self,
        identity: &str,
        route: &str,
        limit: u32,
        duration: i64,
        now: i64,
    ) -> RateLimitDecision {
        let until = now + duration;
        self.blocks
            .insert(identity.to_string(), until, Some(duration));
        warn!(identity = %identity, route = %route, blocked_until = until, "Rate limit cooldown started");
        self.sink.notify(SecurityEvent::RateLimitBlocked {
            identity: identity.to_string(),
            route: route.to_string(),
            until_ms: until,
        });
        RateLimitDecision::denied(limit, until, now, true)
    }

    /// Current usage without recording a request
    pub fn usage(&self, identity: &str, route: &str, role: Option<&str>) -> RateLimitUsage {
        let now = self.clock.now_ms();
        let (rule_key, rule) = self.rule_for(route);
        let limit = self.effective_max(rule.max, role);

        let used = match rule.strategy {
            WindowStrategy::Sliding => self
                .sliding
                .get(&format!("{identity}|{rule_key}"))
                .map(|stamps| {
                    stamps
                        .iter()
                        .filter(|t| **t > now - rule.window_ms)
                        .count() as u32
                })
                .unwrap_or(0),
            WindowStrategy::Fixed => {
                let bucket = now.div_euclid(rule.window_ms.max(1));
                self.fixed
                    .get(&format!("{identity}|{rule_key}|{bucket}"))
                    .map(|w| w.count)
                    .unwrap_or(0)
            }
        };

        RateLimitUsage {
            rule: rule_key.to_string(),
            limit,
            used,
            remaining: limit.saturating_sub(used),
            blocked_until: self.blocks.get(&identity.to_string()),
        }
    }

    /// Lift an active cooldown
    pub fn unblock(&self, identity: &str) -> bool {
        self.blocks.remove(&identity.to_string()).is_some()
    }

    /// Clear all window and block state
    pub fn reset(&self) {
        self.sliding.clear();
        self.fixed.clear();
        self.blocks.clear();
    }

    /// Purge state older than twice the longest configured window
    pub fn sweep(&self, limit: usize) -> usize {
        let horizon = self.longest_window_ms.saturating_mul(2);
        let sliding = self.sliding.purge_where(limit, |_, stamps, now| {
            stamps.back().is_none_or(|last| *last <= now - horizon)
        });
        let fixed = self.fixed.sweep_expired(limit);
        let blocks = self.blocks.sweep_expired(limit);
        sliding + fixed + blocks
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
