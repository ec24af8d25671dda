//! Rate Limiter
//!
//! Exact sliding-window-log rate limiting per device and action category.
//! Every check prunes the category's log first, then counts (or sums
//! bytes over) what remains, so the decision is exact rather than the
//! approximation a fixed-bucket counter would give.
//!
//! Checking and recording are deliberately two calls: callers gate a
//! side effect on `can_perform_action`, perform it, then call
//! `record_action`. Work running between the two can overshoot the cap
//! by whatever is in flight; under the single-threaded, user-serialized
//! call pattern this component is built for, that gap is accepted rather
//! than papered over with atomicity the persistence layer cannot offer.

use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::device::DeviceId;
use crate::ledger::{UsageEntry, UsageLedger};
use crate::policy::{policy_for, ActionCategory};
use crate::store::{KvStore, StoreError};

/// Store key under which the serialized ledger lives.
pub const LEDGER_KEY: &str = "rate_limit_data";

/// Point-in-time view of one category's quota
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    /// Category name as queried
    pub category: String,

    /// Cap in units (events, or bytes); `None` when no limit applies
    pub limit: Option<u64>,

    /// Units used inside the current window
    pub used: u64,

    /// Units still available; `None` when no limit applies
    pub remaining: Option<u64>,

    /// Milliseconds until the oldest in-window entry expires
    pub reset_in_ms: i64,
}

/// Per-device usage accounting over a persistent ledger
pub struct RateLimiter<S: KvStore, C: Clock> {
    store: S,
    clock: C,
    device: DeviceId,
    ledger: UsageLedger,
}

impl<S: KvStore, C: Clock> RateLimiter<S, C> {
    /// Construct a limiter over the given store and clock.
    ///
    /// Loads the device identity (generating one on first use) and the
    /// ledger. A missing or malformed ledger loads as empty; corruption
    /// is logged, never surfaced.
    pub fn new(mut store: S, clock: C) -> Self {
        let device = DeviceId::load_or_create(&mut store);
        let ledger = load_ledger(&store);
        Self {
            store,
            clock,
            device,
            ledger,
        }
    }

    /// Identity this limiter accounts against
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Decide whether one more action currently fits the category's window.
    ///
    /// `size` is the candidate payload in bytes and only matters for
    /// byte-denominated categories; pass 0 otherwise. Categories outside
    /// the policy table are always permitted. Prunes expired entries but
    /// never persists.
    pub fn can_perform_action(&mut self, category: &str, size: u64) -> bool {
        let now = self.clock.now_ms();
        self.prune(category, now);

        let Some(cat) = ActionCategory::from_name(category) else {
            debug!(category, "no policy for category, permitting");
            return true;
        };

        let policy = cat.policy();
        let allowed = if cat.counts_bytes() {
            let used = self.ledger.byte_sum(self.device.as_str(), category);
            used.saturating_add(size) <= policy.max_units
        } else {
            self.ledger.count(self.device.as_str(), category) < policy.max_units
        };
        debug!(category, size, allowed, "quota check");
        allowed
    }

    /// Record one performed action and persist the ledger.
    ///
    /// Appends an entry stamped with the current time; `size` is stored
    /// only for byte-denominated categories. Callers must have passed a
    /// corresponding `can_perform_action` check first. The only error
    /// path is a failed persist.
    pub fn record_action(&mut self, category: &str, size: u64) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        let counts_bytes = ActionCategory::from_name(category)
            .map(|c| c.counts_bytes())
            .unwrap_or(false);
        let entry = if counts_bytes {
            UsageEntry::sized(now, size)
        } else {
            UsageEntry::at(now)
        };

        self.ledger.append(self.device.as_str(), category, entry);
        self.persist()
    }

    /// Units still available inside the window; `None` means no limit
    /// applies to this category.
    pub fn remaining_allowance(&mut self, category: &str) -> Option<u64> {
        let now = self.clock.now_ms();
        self.prune(category, now);

        let cat = ActionCategory::from_name(category)?;
        let used = self.usage(cat);
        Some(cat.policy().max_units.saturating_sub(used))
    }

    /// In-window usage: entry count, or byte sum for byte-denominated
    /// categories. Unknown categories report their raw entry count.
    pub fn current_usage(&mut self, category: &str) -> u64 {
        let now = self.clock.now_ms();
        self.prune(category, now);

        match ActionCategory::from_name(category) {
            Some(cat) => self.usage(cat),
            None => self.ledger.count(self.device.as_str(), category),
        }
    }

    /// Milliseconds until the oldest in-window entry expires, floored at
    /// zero; 0 when the category has no entries or no limit.
    ///
    /// Only one slot (or that entry's bytes) frees up at that instant,
    /// not the whole allowance; this is a sliding log, not a bucket that
    /// resets wholesale.
    pub fn time_until_reset(&mut self, category: &str) -> i64 {
        let now = self.clock.now_ms();
        self.prune(category, now);
        self.reset_in(category, now)
    }

    /// Snapshot of a category's quota for display.
    ///
    /// Reads the clock once, so every field describes the same instant.
    pub fn status(&mut self, category: &str) -> QuotaStatus {
        let now = self.clock.now_ms();
        self.prune(category, now);

        let cat = ActionCategory::from_name(category);
        let used = match cat {
            Some(cat) => self.usage(cat),
            None => self.ledger.count(self.device.as_str(), category),
        };
        let limit = cat.map(|c| c.policy().max_units);
        QuotaStatus {
            category: category.to_string(),
            limit,
            used,
            remaining: limit.map(|l| l.saturating_sub(used)),
            reset_in_ms: self.reset_in(category, now),
        }
    }

    /// Human-readable over-quota message, built from the remaining
    /// allowance and time-until-reset queries. `custom` replaces the
    /// lead sentence when given.
    pub fn limit_message(&mut self, category: &str, custom: Option<&str>) -> String {
        let status = self.status(category);
        let Some(limit) = status.limit else {
            return format!("No limit applies to {category}.");
        };

        let lead = match custom {
            Some(text) => text.to_string(),
            None => format!("Limit reached for {category}: {} of {limit} used.", status.used),
        };
        format!(
            "{lead} Next slot frees up in {}.",
            format_reset(status.reset_in_ms)
        )
    }

    fn usage(&self, cat: ActionCategory) -> u64 {
        if cat.counts_bytes() {
            self.ledger.byte_sum(self.device.as_str(), cat.as_str())
        } else {
            self.ledger.count(self.device.as_str(), cat.as_str())
        }
    }

    fn reset_in(&self, category: &str, now_ms: i64) -> i64 {
        let Some(policy) = policy_for(category) else {
            return 0;
        };
        match self.ledger.oldest_timestamp(self.device.as_str(), category) {
            None => 0,
            // Saturating: the timestamp came off disk and is not trusted
            // to leave headroom for the window.
            Some(ts) => ts
                .saturating_add(policy.window_ms)
                .saturating_sub(now_ms)
                .max(0),
        }
    }

    fn prune(&mut self, category: &str, now_ms: i64) {
        // Unknown categories carry no window, so nothing ever expires.
        if let Some(policy) = policy_for(category) {
            self.ledger
                .prune(self.device.as_str(), category, policy.window_ms, now_ms);
        }
    }

    fn persist(&mut self) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&self.ledger)?;
        self.store.set(LEDGER_KEY, &raw)
    }
}

fn load_ledger(store: &impl KvStore) -> UsageLedger {
    match store.get(LEDGER_KEY) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(ledger) => ledger,
            Err(err) => {
                warn!(%err, "persisted ledger malformed, starting empty");
                UsageLedger::new()
            }
        },
        Ok(None) => UsageLedger::new(),
        Err(err) => {
            warn!(%err, "persisted ledger unreadable, starting empty");
            UsageLedger::new()
        }
    }
}

/// Format a reset delay as hours and minutes, the way the quota banner
/// shows it.
fn format_reset(ms: i64) -> String {
    if ms < 60_000 {
        return "less than a minute".to_string();
    }
    let minutes = ms / 60_000;
    let hours = minutes / 60;
    let minutes = minutes % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::policy::{DAY_MS, HOUR_MS};
    use crate::store::MemoryStore;

    fn limiter_at(start_ms: i64) -> (RateLimiter<MemoryStore, ManualClock>, ManualClock) {
        let clock = ManualClock::new(start_ms);
        let limiter = RateLimiter::new(MemoryStore::new(), clock.clone());
        (limiter, clock)
    }

    #[test]
    fn test_usage_counts_each_recorded_action() {
        let (mut limiter, _clock) = limiter_at(0);

        for k in 1..=5 {
            limiter.record_action("messages", 0).unwrap();
            assert_eq!(limiter.current_usage("messages"), k);
        }
    }

    #[test]
    fn test_reads_are_idempotent_at_fixed_now() {
        let (mut limiter, _clock) = limiter_at(0);
        limiter.record_action("messages", 0).unwrap();

        assert_eq!(
            limiter.current_usage("messages"),
            limiter.current_usage("messages")
        );
        assert_eq!(
            limiter.remaining_allowance("messages"),
            limiter.remaining_allowance("messages")
        );
        assert_eq!(
            limiter.time_until_reset("messages"),
            limiter.time_until_reset("messages")
        );
    }

    #[test]
    fn test_window_expiry_boundary() {
        let (mut limiter, clock) = limiter_at(0);
        limiter.record_action("messages", 0).unwrap();

        clock.set(HOUR_MS - 1);
        assert_eq!(limiter.current_usage("messages"), 1);

        clock.set(HOUR_MS);
        assert_eq!(limiter.current_usage("messages"), 0);
    }

    #[test]
    fn test_count_cap_boundary() {
        let (mut limiter, _clock) = limiter_at(0);

        for _ in 0..49 {
            limiter.record_action("messages", 0).unwrap();
        }
        assert!(limiter.can_perform_action("messages", 0));

        limiter.record_action("messages", 0).unwrap();
        assert!(!limiter.can_perform_action("messages", 0));
        assert_eq!(limiter.remaining_allowance("messages"), Some(0));
    }

    #[test]
    fn test_storage_byte_accounting() {
        let (mut limiter, _clock) = limiter_at(0);

        limiter.record_action("totalStorage", 5_000_000).unwrap();
        limiter.record_action("totalStorage", 5_000_000).unwrap();

        // 5M + 5M + 10.5M exceeds the 20 MB cap.
        assert!(!limiter.can_perform_action("totalStorage", 10_500_000));
        // 5M + 5M + 10M lands exactly on the cap, which is still allowed.
        assert!(limiter.can_perform_action("totalStorage", 10_000_000));
        assert!(!limiter.can_perform_action("totalStorage", 10_000_001));

        assert_eq!(limiter.current_usage("totalStorage"), 10_000_000);
        assert_eq!(
            limiter.remaining_allowance("totalStorage"),
            Some(20_000_000 - 10_000_000)
        );
    }

    #[test]
    fn test_unknown_category_fails_open() {
        let (mut limiter, _clock) = limiter_at(0);

        assert!(limiter.can_perform_action("unknownThing", 0));
        assert_eq!(limiter.remaining_allowance("unknownThing"), None);
        assert_eq!(limiter.time_until_reset("unknownThing"), 0);

        // Recording still works and is never limited.
        limiter.record_action("unknownThing", 0).unwrap();
        assert!(limiter.can_perform_action("unknownThing", 0));
        assert_eq!(limiter.current_usage("unknownThing"), 1);
    }

    #[test]
    fn test_corrupt_ledger_loads_empty() {
        let mut store = MemoryStore::new();
        store.set(LEDGER_KEY, "{ definitely not json").unwrap();

        let mut limiter = RateLimiter::new(store, ManualClock::new(0));
        assert_eq!(limiter.current_usage("messages"), 0);
        assert!(limiter.can_perform_action("messages", 0));
    }

    #[test]
    fn test_attachments_day_scenario() {
        let (mut limiter, clock) = limiter_at(0);

        for _ in 0..10 {
            assert!(limiter.can_perform_action("attachments", 0));
            limiter.record_action("attachments", 0).unwrap();
        }

        clock.set(HOUR_MS);
        assert!(!limiter.can_perform_action("attachments", 0));

        clock.set(DAY_MS + 1);
        assert!(limiter.can_perform_action("attachments", 0));
        assert_eq!(limiter.current_usage("attachments"), 0);
    }

    #[test]
    fn test_time_until_reset_tracks_oldest_entry() {
        let (mut limiter, clock) = limiter_at(1_000);
        limiter.record_action("messages", 0).unwrap();

        clock.advance(500);
        limiter.record_action("messages", 0).unwrap();

        // Oldest entry was at t=1000; window is one hour.
        assert_eq!(limiter.time_until_reset("messages"), HOUR_MS - 500);

        clock.set(1_000 + HOUR_MS);
        // Oldest expired; the second entry now drives the reset time.
        assert_eq!(limiter.time_until_reset("messages"), 500);
    }

    #[test]
    fn test_time_until_reset_empty_is_zero() {
        let (mut limiter, _clock) = limiter_at(0);
        assert_eq!(limiter.time_until_reset("messages"), 0);
    }

    #[test]
    fn test_categories_are_independent() {
        let (mut limiter, _clock) = limiter_at(0);

        limiter.record_action("emails", 0).unwrap();
        limiter.record_action("emails", 0).unwrap();
        assert!(!limiter.can_perform_action("emails", 0));

        assert!(limiter.can_perform_action("messages", 0));
        assert_eq!(limiter.current_usage("messages"), 0);
    }

    #[test]
    fn test_check_prunes_expired_before_deciding() {
        let (mut limiter, clock) = limiter_at(0);
        limiter.record_action("messages", 0).unwrap();

        clock.set(2 * HOUR_MS);
        assert!(limiter.can_perform_action("messages", 0));
        assert_eq!(limiter.current_usage("messages"), 0);
    }

    #[test]
    fn test_extreme_ledger_values_do_not_panic() {
        use crate::device::DEVICE_ID_KEY;

        // Valid JSON, adversarial numbers: a far-future timestamp and a
        // byte size with no headroom left in u64.
        let mut store = MemoryStore::new();
        store.set(DEVICE_ID_KEY, "dev").unwrap();
        let raw = format!(
            concat!(
                "{{\"dev\":{{",
                "\"messages\":[{{\"timestamp_ms\":{}}}],",
                "\"totalStorage\":[{{\"timestamp_ms\":0,\"size_bytes\":{}}}]",
                "}}}}"
            ),
            i64::MAX,
            u64::MAX
        );
        store.set(LEDGER_KEY, &raw).unwrap();

        let mut limiter = RateLimiter::new(store, ManualClock::new(0));
        assert!(limiter.time_until_reset("messages") >= 0);
        assert!(!limiter.can_perform_action("totalStorage", u64::MAX));
        assert_eq!(limiter.remaining_allowance("totalStorage"), Some(0));
    }

    #[test]
    fn test_status_reads_clock_once() {
        use crate::clock::Clock;
        use std::sync::atomic::{AtomicI64, Ordering};
        use std::sync::Arc;

        // Clock that moves forward one millisecond on every read, the
        // worst case for queries stitched from separate instants.
        #[derive(Clone)]
        struct TickingClock {
            now: Arc<AtomicI64>,
        }
        impl Clock for TickingClock {
            fn now_ms(&self) -> i64 {
                self.now.fetch_add(1, Ordering::SeqCst)
            }
        }

        let now = Arc::new(AtomicI64::new(0));
        let clock = TickingClock { now: now.clone() };
        let mut limiter = RateLimiter::new(MemoryStore::new(), clock);
        limiter.record_action("messages", 0).unwrap();

        // One millisecond before the recorded entry expires.
        now.store(HOUR_MS - 1, Ordering::SeqCst);
        let status = limiter.status("messages");
        assert_eq!(status.used, 1);
        assert_eq!(status.remaining, Some(49));
        assert_eq!(status.reset_in_ms, 1);
    }

    #[test]
    fn test_status_snapshot() {
        let (mut limiter, _clock) = limiter_at(0);
        limiter.record_action("searches", 0).unwrap();

        let status = limiter.status("searches");
        assert_eq!(status.limit, Some(20));
        assert_eq!(status.used, 1);
        assert_eq!(status.remaining, Some(19));
        assert_eq!(status.reset_in_ms, DAY_MS);
    }

    #[test]
    fn test_limit_message_content() {
        let (mut limiter, _clock) = limiter_at(0);
        limiter.record_action("emails", 0).unwrap();
        limiter.record_action("emails", 0).unwrap();

        let message = limiter.limit_message("emails", None);
        assert!(message.contains("2 of 2"));
        assert!(message.contains("24h 0m"));

        let custom = limiter.limit_message("emails", Some("Email quota exhausted."));
        assert!(custom.starts_with("Email quota exhausted."));

        assert_eq!(
            limiter.limit_message("unknownThing", None),
            "No limit applies to unknownThing."
        );
    }

    #[test]
    fn test_format_reset() {
        assert_eq!(format_reset(0), "less than a minute");
        assert_eq!(format_reset(59_999), "less than a minute");
        assert_eq!(format_reset(60_000), "1m");
        assert_eq!(format_reset(HOUR_MS + 5 * 60_000), "1h 5m");
    }
}
