//! QuotaLedger Library
//!
//! Per-device usage accounting with exact sliding-window rate limits over
//! a persistent JSON ledger. Feature code asks `can_perform_action`
//! before a bounded side effect (sending a message, uploading a file),
//! performs it, then calls `record_action`; display code reads the
//! remaining allowance and reset time for banner text.
//!
//! The limiter is synchronous and single-threaded by design: it models a
//! client runtime where every call runs to completion on one thread and
//! persistence is a local key-value store. Both the store and the clock
//! are injected, so tests run against an in-memory store and a manually
//! driven clock.

pub mod clock;
pub mod device;
pub mod ledger;
pub mod limiter;
pub mod policy;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use device::{DeviceId, DEVICE_ID_KEY};
pub use ledger::{UsageEntry, UsageLedger};
pub use limiter::{QuotaStatus, RateLimiter, LEDGER_KEY};
pub use policy::{policy_for, ActionCategory, Policy};
pub use store::{FileStore, KvStore, MemoryStore, StoreError};
