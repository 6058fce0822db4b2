//! Lock types and error definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::clock::expiry_after;

/// Result type for lock operations
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Lock errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LockError {
    /// An unexpired lock is held by someone else
    #[error(
        "Lock conflict: resource '{resource_id}' is held by {current_holder} at {tier} tier until {expires_at}"
    )]
    Conflict {
        resource_id: String,
        current_holder: String,
        tier: LockTier,
        expires_at: DateTime<Utc>,
    },

    /// Caller does not hold the referenced lock
    #[error("Lock {lock_id} is not held by {holder_id}")]
    NotOwner { lock_id: Uuid, holder_id: String },

    /// The referenced lock has already expired
    #[error("Lock {lock_id} expired at {expired_at}")]
    Expired {
        lock_id: Uuid,
        expired_at: DateTime<Utc>,
    },

    /// Override requested without enough tier above the incumbent
    #[error(
        "Insufficient tier: {requested} cannot override {}",
        describe_incumbent(.incumbent)
    )]
    InsufficientTier {
        requested: LockTier,
        incumbent: Option<LockTier>,
    },

    /// Override requested without a justification
    #[error("Override requires a non-empty reason")]
    MissingReason,

    /// Requested TTL is outside the configured bounds
    #[error("TTL of {ttl_secs}s is outside the allowed range {min_secs}s..={max_secs}s")]
    InvalidTtl {
        ttl_secs: u64,
        min_secs: u64,
        max_secs: u64,
    },

    /// Malformed request (empty ids, etc.)
    #[error("Invalid lock request: {0}")]
    InvalidRequest(String),

    /// Repeated compare-and-swap failures without a stable winner
    #[error("Lease for '{resource_id}' kept changing after {attempts} attempts")]
    Contended { resource_id: String, attempts: u32 },

    /// Lease store could not be reached; outcome is unknown
    #[error("Lease store unavailable: {0}")]
    StoreUnavailable(String),

    /// A stored lease record could not be decoded
    #[error("Lease record corrupted: {0}")]
    Corrupted(String),

    /// The resource was permanently deleted
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),
}

impl LockError {
    /// Get error code for this lock error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Conflict { .. } => "E300",
            Self::NotOwner { .. } => "E301",
            Self::Expired { .. } => "E302",
            Self::InsufficientTier { .. } => "E303",
            Self::MissingReason => "E304",
            Self::InvalidTtl { .. } => "E305",
            Self::InvalidRequest(_) => "E306",
            Self::Contended { .. } => "E307",
            Self::StoreUnavailable(_) => "E308",
            Self::Corrupted(_) => "E309",
            Self::ResourceNotFound(_) => "E310",
        }
    }

    /// Build a conflict error describing the incumbent lock
    pub fn conflict(incumbent: &Lock) -> Self {
        Self::Conflict {
            resource_id: incumbent.resource_id.clone(),
            current_holder: incumbent.holder_id.clone(),
            tier: incumbent.tier,
            expires_at: incumbent.expires_at,
        }
    }
}

fn describe_incumbent(incumbent: &Option<LockTier>) -> String {
    match incumbent {
        Some(tier) => format!("a {} lock", tier),
        None => "an empty slot".to_string(),
    }
}

impl From<sqlx::Error> for LockError {
    fn from(e: sqlx::Error) -> Self {
        Self::StoreUnavailable(e.to_string())
    }
}

/// Priority class of a lock
///
/// Ordering is significant: `View < Edit < System < Emergency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockTier {
    /// Passive, informational access; never exclusive
    View,
    /// Default human editing lease
    Edit,
    /// Automated maintenance
    System,
    /// Operational incidents; always wins
    Emergency,
}

impl LockTier {
    /// All tiers in ascending priority
    pub const ALL: [LockTier; 4] = [Self::View, Self::Edit, Self::System, Self::Emergency];

    /// Numeric priority (higher wins)
    pub fn rank(&self) -> u8 {
        match self {
            Self::View => 0,
            Self::Edit => 1,
            Self::System => 2,
            Self::Emergency => 3,
        }
    }

    /// Whether locks of this tier are mutually exclusive
    pub fn is_exclusive(&self) -> bool {
        *self >= Self::Edit
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Edit => "edit",
            Self::System => "system",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for LockTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LockTier {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "view" => Ok(Self::View),
            "edit" => Ok(Self::Edit),
            "system" => Ok(Self::System),
            "emergency" => Ok(Self::Emergency),
            other => Err(LockError::InvalidRequest(format!("unknown tier '{}'", other))),
        }
    }
}

/// Which lease a lock occupies on its resource
///
/// All Edit/System/Emergency locks compete for the single exclusive slot.
/// View leases live in a per-holder slot and never contend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeaseSlot {
    Exclusive,
    View(String),
}

impl LeaseSlot {
    const VIEW_PREFIX: &'static str = "view:";

    /// Storage representation
    pub fn as_key(&self) -> String {
        match self {
            Self::Exclusive => "exclusive".to_string(),
            Self::View(holder) => format!("{}{}", Self::VIEW_PREFIX, holder),
        }
    }

    pub fn is_view(&self) -> bool {
        matches!(self, Self::View(_))
    }

    /// Parse the storage representation
    pub fn parse(s: &str) -> Option<Self> {
        if s == "exclusive" {
            Some(Self::Exclusive)
        } else {
            s.strip_prefix(Self::VIEW_PREFIX)
                .map(|holder| Self::View(holder.to_string()))
        }
    }
}

/// Key of one lease record in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseKey {
    pub resource_id: String,
    pub slot: LeaseSlot,
}

impl LeaseKey {
    /// Key of the exclusive lease on a resource
    pub fn exclusive(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            slot: LeaseSlot::Exclusive,
        }
    }

    /// Key a holder would occupy when locking at `tier`
    pub fn for_holder(resource_id: &str, holder_id: &str, tier: LockTier) -> Self {
        if tier.is_exclusive() {
            Self::exclusive(resource_id)
        } else {
            Self {
                resource_id: resource_id.to_string(),
                slot: LeaseSlot::View(holder_id.to_string()),
            }
        }
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_id, self.slot.as_key())
    }
}

/// A lease held by one holder over one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lock {
    /// Lock ID
    pub id: Uuid,

    /// Locked resource
    pub resource_id: String,

    /// Opaque, already-authenticated holder identity
    pub holder_id: String,

    /// Priority class
    pub tier: LockTier,

    /// When the lock was acquired
    pub acquired_at: DateTime<Utc>,

    /// When the lock logically expires
    pub expires_at: DateTime<Utc>,

    /// Free-text purpose (or override justification)
    pub purpose: String,

    /// Cleared on release, or by the sweeper once the lease ran out
    pub active: bool,

    /// Number of times this lock has been refreshed
    pub renewal_count: u32,

    /// Set when the holder released the lock
    #[serde(default)]
    pub released_at: Option<DateTime<Utc>>,
}

impl Lock {
    /// Create a new active lock starting at `now`
    pub fn new(
        resource_id: impl Into<String>,
        holder_id: impl Into<String>,
        tier: LockTier,
        now: DateTime<Utc>,
        ttl: Duration,
        purpose: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_id: resource_id.into(),
            holder_id: holder_id.into(),
            tier,
            acquired_at: now,
            expires_at: expiry_after(now, ttl),
            purpose: purpose.into(),
            active: true,
            renewal_count: 0,
            released_at: None,
        }
    }

    /// Check if the lock is expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Active and not expired
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired_at(now)
    }

    /// Time left before expiry (zero once expired)
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Extend the lease to `now + ttl`
    pub fn renew(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.expires_at = expiry_after(now, ttl);
        self.renewal_count += 1;
    }

    /// Give the lock up at `now`
    pub fn release(&mut self, now: DateTime<Utc>) {
        self.active = false;
        self.released_at = Some(now);
    }

    /// Turn a lease that ran out into an expiry tombstone
    pub fn retire(&mut self) {
        self.active = false;
    }

    /// Whether the holder released this lock, as opposed to letting it expire
    pub fn is_released(&self) -> bool {
        self.released_at.is_some()
    }

    /// Key of the lease record this lock occupies
    pub fn lease_key(&self) -> LeaseKey {
        LeaseKey::for_holder(&self.resource_id, &self.holder_id, self.tier)
    }
}

/// Read-only lock status of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockStatus {
    pub resource_id: String,
    /// Whether an unexpired exclusive lock exists
    pub held: bool,
    pub holder_id: Option<String>,
    pub tier: Option<LockTier>,
    pub expires_at: Option<DateTime<Utc>>,
    pub lock_id: Option<Uuid>,
    pub purpose: Option<String>,
    /// Holders of live View leases
    pub viewers: Vec<String>,
}

impl LockStatus {
    /// Status of a resource with no live exclusive lock
    pub fn free(resource_id: impl Into<String>, viewers: Vec<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            held: false,
            holder_id: None,
            tier: None,
            expires_at: None,
            lock_id: None,
            purpose: None,
            viewers,
        }
    }

    /// Status of a resource held by `lock`
    pub fn held_by(lock: &Lock, viewers: Vec<String>) -> Self {
        Self {
            resource_id: lock.resource_id.clone(),
            held: true,
            holder_id: Some(lock.holder_id.clone()),
            tier: Some(lock.tier),
            expires_at: Some(lock.expires_at),
            lock_id: Some(lock.id),
            purpose: Some(lock.purpose.clone()),
            viewers,
        }
    }
}

/// Result of a release call
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseOutcome {
    /// The lock was active and is now released
    Released(Lock),
    /// The lock was already released, expired or superseded
    AlreadyReleased,
}

impl ReleaseOutcome {
    /// Whether this call changed any state
    pub fn changed(&self) -> bool {
        matches!(self, Self::Released(_))
    }
}

/// Hard ceiling on any lease TTL, whatever the configured bounds say
pub const MAX_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Configuration for the lock manager
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// TTL used when a caller does not supply one
    pub default_ttl_by_tier: HashMap<LockTier, Duration>,

    /// Shortest accepted TTL
    pub min_ttl: Duration,

    /// Longest accepted TTL
    pub max_ttl: Duration,

    /// Interval between expiry sweeps
    pub sweep_interval: Duration,

    /// How long the sweeper keeps an expired lease as a tombstone
    pub tombstone_retention: Duration,

    /// How many tiers above the incumbent an override must be
    pub min_override_tier_gap: u8,

    /// Bound on every individual store round-trip
    pub store_timeout: Duration,

    /// Read-decide-write attempts before reporting contention
    pub max_cas_attempts: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        let default_ttl_by_tier = HashMap::from([
            (LockTier::View, Duration::from_secs(300)),
            (LockTier::Edit, Duration::from_secs(300)), // 5 minutes
            (LockTier::System, Duration::from_secs(1800)),
            (LockTier::Emergency, Duration::from_secs(3600)),
        ]);

        Self {
            default_ttl_by_tier,
            min_ttl: Duration::from_secs(30),
            max_ttl: Duration::from_secs(120 * 60),
            sweep_interval: Duration::from_secs(15),
            tombstone_retention: Duration::from_secs(3600),
            min_override_tier_gap: 1,
            store_timeout: Duration::from_secs(5),
            max_cas_attempts: 3,
        }
    }
}

impl LockConfig {
    /// Default TTL for a tier
    pub fn ttl_for(&self, tier: LockTier) -> Duration {
        self.default_ttl_by_tier
            .get(&tier)
            .copied()
            .unwrap_or(Duration::from_secs(300))
            .max(self.min_ttl)
            .min(self.max_ttl)
    }

    /// Resolve a caller TTL against defaults and bounds
    pub fn resolve_ttl(&self, tier: LockTier, ttl: Option<Duration>) -> LockResult<Duration> {
        let ttl = ttl.unwrap_or_else(|| self.ttl_for(tier));
        let max_ttl = self.max_ttl.min(MAX_TTL);
        if ttl < self.min_ttl || ttl > max_ttl {
            return Err(LockError::InvalidTtl {
                ttl_secs: ttl.as_secs(),
                min_secs: self.min_ttl.as_secs(),
                max_secs: max_ttl.as_secs(),
            });
        }
        Ok(ttl)
    }

    /// Set the default TTL for one tier
    pub fn with_tier_ttl(mut self, tier: LockTier, ttl: Duration) -> Self {
        self.default_ttl_by_tier.insert(tier, ttl);
        self
    }

    /// Set the TTL bounds
    pub fn with_ttl_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.min_ttl = min;
        self.max_ttl = max;
        self
    }

    /// Set the sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the override tier gap
    pub fn with_override_gap(mut self, gap: u8) -> Self {
        self.min_override_tier_gap = gap;
        self
    }

    /// Set the store timeout
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_tombstone_retention(mut self, retention: Duration) -> Self {
        self.tombstone_retention = retention;
        self
    }
}
