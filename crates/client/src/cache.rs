//! Local TTL cache
//!
//! Every cached value is a time-stamped snapshot of chain state. A read hits
//! only while the entry is younger than its class TTL; after that the caller
//! goes back to the chain. Confirmed writes invalidate the keys they touch.
//!
//! Every invalidation bumps a generation counter. A read that loaded its value
//! under an older generation may have fetched pre-write state, so
//! [`LocalCache::put_if_generation`] drops it instead of caching it.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use splitpool_common::{Address, ExpenseId, GroupId};
use tracing::debug;

// ============ Clock ============

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

// ============ Keys ============

/// Freshness class of a cached value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TtlClass {
    /// Group membership and group records
    Group,
    /// Net balances and expense state
    Balances,
    /// Pool state and pool listings
    Pool,
    /// Off-chain metadata blobs
    Metadata,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CacheKey {
    GroupCount,
    Group(GroupId),
    GroupMembers(GroupId),
    UserGroups(Address),
    GroupBalances(GroupId),
    NetBalance(GroupId, Address),
    ExpenseCount,
    Expense(ExpenseId),
    GroupExpenses(GroupId),
    AllPools,
    PoolsByGroup(Address),
    UserPools(Address),
    Pool {
        pool: Address,
        viewer: Option<Address>,
    },
    Metadata(String),
}

impl CacheKey {
    pub fn class(&self) -> TtlClass {
        match self {
            Self::GroupCount | Self::Group(_) | Self::GroupMembers(_) | Self::UserGroups(_) => {
                TtlClass::Group
            }
            Self::GroupBalances(_)
            | Self::NetBalance(..)
            | Self::ExpenseCount
            | Self::Expense(_)
            | Self::GroupExpenses(_) => TtlClass::Balances,
            Self::AllPools | Self::PoolsByGroup(_) | Self::UserPools(_) | Self::Pool { .. } => {
                TtlClass::Pool
            }
            Self::Metadata(_) => TtlClass::Metadata,
        }
    }

    fn group_id(&self) -> Option<GroupId> {
        match self {
            Self::Group(id)
            | Self::GroupMembers(id)
            | Self::GroupBalances(id)
            | Self::NetBalance(id, _)
            | Self::GroupExpenses(id) => Some(*id),
            _ => None,
        }
    }
}

/// A set of keys to drop after a confirmed write
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Invalidation {
    Key(CacheKey),
    /// Everything derived from one group, plus membership listings
    Group(GroupId),
    /// Everything derived from one pool, plus pool listings
    Pool(Address),
    /// One expense and the expense listings
    Expense(ExpenseId),
    /// Group count and every user's group list
    GroupIndex,
    /// Pool listings
    PoolIndex,
    /// Every key of a class
    Class(TtlClass),
}

// ============ TTLs ============

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheTtls {
    pub group: Duration,
    pub balances: Duration,
    pub pool: Duration,
    pub metadata: Duration,
}

impl CacheTtls {
    pub fn for_class(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Group => self.group,
            TtlClass::Balances => self.balances,
            TtlClass::Pool => self.pool,
            TtlClass::Metadata => self.metadata,
        }
    }
}

impl Default for CacheTtls {
    fn default() -> Self {
        use splitpool_common::constants::cache;
        Self {
            group: Duration::from_secs(cache::GROUP_TTL_SECS),
            balances: Duration::from_secs(cache::BALANCES_TTL_SECS),
            pool: Duration::from_secs(cache::POOL_TTL_SECS),
            metadata: Duration::from_secs(cache::METADATA_TTL_SECS),
        }
    }
}

// ============ Cache ============

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    written: Instant,
}

pub struct LocalCache {
    entries: RwLock<HashMap<CacheKey, Entry>>,
    /// Bumped under the write lock on every invalidation
    generation: AtomicU64,
    ttls: CacheTtls,
    clock: Arc<dyn Clock>,
}

impl LocalCache {
    pub fn new(ttls: CacheTtls) -> Self {
        Self::with_clock(ttls, Arc::new(SystemClock))
    }

    pub fn with_clock(ttls: CacheTtls, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            ttls,
            clock,
        }
    }

    pub fn ttls(&self) -> &CacheTtls {
        &self.ttls
    }

    /// Returns the value if it was written less than one TTL ago
    pub fn get<T>(&self, key: &CacheKey) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let now = self.clock.now();
        let ttl = self.ttls.for_class(key.class());
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if now.saturating_duration_since(entry.written) >= ttl {
            debug!(?key, "cache entry expired");
            return None;
        }
        let value = entry.value.downcast_ref::<T>().cloned();
        if value.is_some() {
            debug!(?key, "cache hit");
        }
        value
    }

    /// Stores a value stamped with the current time. Last write wins.
    pub fn put<T>(&self, key: CacheKey, value: T)
    where
        T: Send + Sync + 'static,
    {
        let entry = Entry {
            value: Arc::new(value),
            written: self.clock.now(),
        };
        self.entries.write().insert(key, entry);
    }

    /// Current invalidation generation. Take it before loading a value.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Stores a value loaded under `generation`
    ///
    /// Returns false and drops the value when an invalidation ran since.
    pub fn put_if_generation<T>(&self, key: CacheKey, value: T, generation: u64) -> bool
    where
        T: Send + Sync + 'static,
    {
        let mut entries = self.entries.write();
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(?key, "stale load dropped");
            return false;
        }
        let entry = Entry {
            value: Arc::new(value),
            written: self.clock.now(),
        };
        entries.insert(key, entry);
        true
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut entries = self.entries.write();
        self.bump();
        entries.remove(key).is_some()
    }

    /// Drops every key covered by `scope`
    pub fn apply(&self, scope: &Invalidation) -> usize {
        let mut entries = self.entries.write();
        self.bump();
        let before = entries.len();
        match scope {
            Invalidation::Key(key) => {
                entries.remove(key);
            }
            Invalidation::Group(id) => entries.retain(|key, _| {
                key.group_id() != Some(*id) && !matches!(key, CacheKey::UserGroups(_))
            }),
            Invalidation::Pool(pool) => entries.retain(|key, _| match key {
                CacheKey::Pool { pool: p, .. } => p != pool,
                CacheKey::AllPools | CacheKey::PoolsByGroup(_) | CacheKey::UserPools(_) => false,
                _ => true,
            }),
            Invalidation::Expense(id) => entries.retain(|key, _| match key {
                CacheKey::Expense(e) => e != id,
                CacheKey::GroupExpenses(_) | CacheKey::ExpenseCount => false,
                _ => true,
            }),
            Invalidation::GroupIndex => entries.retain(|key, _| {
                !matches!(key, CacheKey::GroupCount | CacheKey::UserGroups(_))
            }),
            Invalidation::PoolIndex => entries.retain(|key, _| {
                !matches!(
                    key,
                    CacheKey::AllPools | CacheKey::PoolsByGroup(_) | CacheKey::UserPools(_)
                )
            }),
            Invalidation::Class(class) => entries.retain(|key, _| key.class() != *class),
        }
        let removed = before - entries.len();
        debug!(?scope, removed, "cache invalidated");
        removed
    }

    pub fn invalidate_group(&self, id: GroupId) -> usize {
        self.apply(&Invalidation::Group(id))
    }

    pub fn invalidate_pool(&self, pool: Address) -> usize {
        self.apply(&Invalidation::Pool(pool))
    }

    pub fn invalidate_expense(&self, id: ExpenseId) -> usize {
        self.apply(&Invalidation::Expense(id))
    }

    /// Removes entries whose TTL has passed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, entry| {
            now.saturating_duration_since(entry.written) < self.ttls.for_class(key.class())
        });
        before - entries.len()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write();
        self.bump();
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new(CacheTtls::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with_clock() -> (LocalCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = LocalCache::with_clock(CacheTtls::default(), clock.clone());
        (cache, clock)
    }

    #[test]
    fn hit_within_ttl() {
        let (cache, clock) = cache_with_clock();
        cache.put(CacheKey::GroupMembers(1), vec![Address::repeat_byte(1)]);

        clock.advance(Duration::from_secs(299));
        let members: Option<Vec<Address>> = cache.get(&CacheKey::GroupMembers(1));
        assert_eq!(members, Some(vec![Address::repeat_byte(1)]));
    }

    #[test]
    fn miss_after_ttl() {
        let (cache, clock) = cache_with_clock();
        cache.put(CacheKey::GroupBalances(1), 5i128);

        clock.advance(Duration::from_secs(180));
        assert_eq!(cache.get::<i128>(&CacheKey::GroupBalances(1)), None);
    }

    #[test]
    fn ttl_depends_on_class() {
        let (cache, clock) = cache_with_clock();
        cache.put(CacheKey::Group(1), 1u64);
        cache.put(CacheKey::GroupBalances(1), 2u64);
        cache.put(CacheKey::Metadata("Qm".into()), 3u64);

        clock.advance(Duration::from_secs(200));
        assert_eq!(cache.get::<u64>(&CacheKey::Group(1)), Some(1));
        assert_eq!(cache.get::<u64>(&CacheKey::GroupBalances(1)), None);
        assert_eq!(cache.get::<u64>(&CacheKey::Metadata("Qm".into())), Some(3));

        clock.advance(Duration::from_secs(400));
        assert_eq!(cache.get::<u64>(&CacheKey::Metadata("Qm".into())), None);
    }

    #[test]
    fn invalidate_then_miss() {
        let (cache, _) = cache_with_clock();
        cache.put(CacheKey::GroupCount, 3u64);

        assert!(cache.invalidate(&CacheKey::GroupCount));
        assert_eq!(cache.get::<u64>(&CacheKey::GroupCount), None);
        assert!(!cache.invalidate(&CacheKey::GroupCount));
    }

    #[test]
    fn wrong_type_is_a_miss() {
        let (cache, _) = cache_with_clock();
        cache.put(CacheKey::GroupCount, 3u64);
        assert_eq!(cache.get::<String>(&CacheKey::GroupCount), None);
    }

    #[test]
    fn group_scope_leaves_other_groups() {
        let (cache, _) = cache_with_clock();
        let me = Address::repeat_byte(1);
        cache.put(CacheKey::GroupBalances(1), 0u8);
        cache.put(CacheKey::NetBalance(1, me), 0u8);
        cache.put(CacheKey::GroupBalances(2), 0u8);
        cache.put(CacheKey::UserGroups(me), 0u8);

        let removed = cache.invalidate_group(1);

        assert_eq!(removed, 3);
        assert!(cache.get::<u8>(&CacheKey::GroupBalances(2)).is_some());
    }

    #[test]
    fn load_spanning_an_invalidation_is_dropped() {
        let (cache, _) = cache_with_clock();
        let pool = Address::repeat_byte(7);
        let key = CacheKey::Pool { pool, viewer: None };

        let before = cache.generation();
        cache.invalidate_pool(pool);
        assert!(!cache.put_if_generation(key.clone(), 0u128, before));
        assert_eq!(cache.get::<u128>(&key), None);

        let now = cache.generation();
        assert!(cache.put_if_generation(key.clone(), 50u128, now));
        assert_eq!(cache.get::<u128>(&key), Some(50));
    }

    #[test]
    fn pool_scope_drops_every_viewer() {
        let (cache, _) = cache_with_clock();
        let pool = Address::repeat_byte(9);
        let other = Address::repeat_byte(8);
        cache.put(CacheKey::Pool { pool, viewer: None }, 0u8);
        cache.put(
            CacheKey::Pool {
                pool,
                viewer: Some(Address::repeat_byte(1)),
            },
            0u8,
        );
        cache.put(CacheKey::Pool { pool: other, viewer: None }, 0u8);
        cache.put(CacheKey::AllPools, 0u8);

        assert_eq!(cache.invalidate_pool(pool), 3);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn purge_and_clear() {
        let (cache, clock) = cache_with_clock();
        cache.put(CacheKey::AllPools, 0u8);
        cache.put(CacheKey::Group(1), 0u8);

        clock.advance(Duration::from_secs(181));
        assert_eq!(cache.purge_expired(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn hit_iff_younger_than_ttl(ttl_secs in 1u64..1_000, elapsed_secs in 0u64..2_000) {
                let clock = Arc::new(ManualClock::new());
                let ttls = CacheTtls {
                    pool: Duration::from_secs(ttl_secs),
                    ..CacheTtls::default()
                };
                let cache = LocalCache::with_clock(ttls, clock.clone());
                cache.put(CacheKey::AllPools, 7u32);

                clock.advance(Duration::from_secs(elapsed_secs));
                let hit = cache.get::<u32>(&CacheKey::AllPools).is_some();
                prop_assert_eq!(hit, elapsed_secs < ttl_secs);
            }
        }
    }
}
