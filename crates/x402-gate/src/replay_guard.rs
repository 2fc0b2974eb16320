use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// How long a reservation survives without being confirmed or released.
/// Covers a crashed process that never got to release.
pub const DEFAULT_RESERVATION_LEASE: Duration = Duration::from_secs(300);

/// How long a consumed identifier is remembered when the proof has no expiry.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

// Keeps `Instant + ttl` from overflowing on absurd inputs.
const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Lease long enough to cover one gate decision against a facilitator with
/// the given per-call timeout: verify, its single retry, and settle, plus
/// slack for the replay store itself.
pub fn lease_for_timeout(facilitator_timeout: Duration) -> Duration {
    facilitator_timeout
        .saturating_mul(3)
        .saturating_add(Duration::from_secs(30))
        .min(MAX_TTL)
}

/// At-most-once bookkeeping for proof identifiers.
///
/// Implementations must be thread-safe and `reserve` must be a single atomic
/// check-and-set. The in-memory and SQLite stores share this interface, so a
/// multi-instance deployment swaps the backend without touching the gate.
///
/// A reservation belongs to the `owner` token that created it. Once its lease
/// lapses another caller may take the identifier over, and from then on the
/// old owner can neither renew nor release it. A lapsed reservation that
/// nobody took over can still be renewed by its owner.
pub trait ReplayGuard: Send + Sync {
    /// Claim `identifier` for `owner`. Returns `true` if this call claimed it,
    /// `false` if a live record (reserved or consumed) already exists.
    fn reserve(&self, identifier: &str, owner: &str) -> bool;

    /// Restart the lease of a reservation `owner` still holds. Returns `false`
    /// if the reservation lapsed or now belongs to someone else.
    fn renew(&self, identifier: &str, owner: &str) -> bool;

    /// Drop `owner`'s reservation so the payer may retry. Consumed records
    /// and other owners' reservations are left alone.
    fn release(&self, identifier: &str, owner: &str);

    /// Mark `identifier` as consumed for `ttl`. The record is written even if
    /// `owner` lost the reservation; the return value says whether it still
    /// held it.
    fn confirm(&self, identifier: &str, owner: &str, ttl: Duration) -> bool;

    /// Whether a live record exists for `identifier`.
    fn is_consumed(&self, identifier: &str) -> bool;

    /// Evict records past their deadline. Returns the number evicted.
    fn purge_expired(&self) -> usize;
}

/// A held reservation. Released on drop unless [`confirm`](Self::confirm)ed,
/// so every early return and every cancelled request frees the identifier.
pub struct Reservation {
    guard: Arc<dyn ReplayGuard>,
    identifier: String,
    owner: String,
    armed: bool,
}

impl Reservation {
    /// Atomically reserve `identifier` under a fresh owner token; `None` if
    /// it is already taken.
    pub fn acquire(guard: Arc<dyn ReplayGuard>, identifier: &str) -> Option<Self> {
        let owner = uuid::Uuid::new_v4().to_string();
        if !guard.reserve(identifier, &owner) {
            return None;
        }
        Some(Self {
            guard,
            identifier: identifier.to_string(),
            owner,
            armed: true,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Extend the lease. `false` means the reservation is gone and the
    /// caller must not capture the payment.
    pub fn renew(&self) -> bool {
        self.guard.renew(&self.identifier, &self.owner)
    }

    pub fn confirm(mut self, ttl: Duration) -> bool {
        self.armed = false;
        self.guard.confirm(&self.identifier, &self.owner, ttl)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(identifier = %self.identifier, "releasing replay reservation");
            self.guard.release(&self.identifier, &self.owner);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Reserved,
    Consumed,
}

#[derive(Debug, Clone)]
struct ReplayRecord {
    state: RecordState,
    owner: String,
    deadline: Instant,
}

impl ReplayRecord {
    fn held_by(&self, owner: &str) -> bool {
        self.state == RecordState::Reserved && self.owner == owner
    }
}

/// Replay guard for a single gate process, backed by DashMap.
///
/// Lost on restart; use [`SqliteReplayGuard`] when that matters or when
/// several instances sit behind one load balancer.
pub struct InMemoryReplayGuard {
    records: DashMap<String, ReplayRecord>,
    lease: Duration,
}

impl InMemoryReplayGuard {
    pub fn new() -> Self {
        Self::with_lease(DEFAULT_RESERVATION_LEASE)
    }

    pub fn with_lease(lease: Duration) -> Self {
        Self {
            records: DashMap::new(),
            lease: lease.min(MAX_TTL),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for InMemoryReplayGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayGuard for InMemoryReplayGuard {
    fn reserve(&self, identifier: &str, owner: &str) -> bool {
        let now = Instant::now();
        let record = ReplayRecord {
            state: RecordState::Reserved,
            owner: owner.to_string(),
            deadline: now + self.lease,
        };
        // The entry holds the shard lock, so check and insert are one step.
        match self.records.entry(identifier.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().deadline <= now {
                    occupied.insert(record);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                true
            }
        }
    }

    fn renew(&self, identifier: &str, owner: &str) -> bool {
        let now = Instant::now();
        match self.records.get_mut(identifier) {
            Some(mut record) if record.held_by(owner) => {
                record.deadline = now + self.lease;
                true
            }
            _ => false,
        }
    }

    fn release(&self, identifier: &str, owner: &str) {
        self.records.remove_if(identifier, |_, record| {
            record.state == RecordState::Reserved && record.owner == owner
        });
    }

    fn confirm(&self, identifier: &str, owner: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let previous = self.records.insert(
            identifier.to_string(),
            ReplayRecord {
                state: RecordState::Consumed,
                owner: owner.to_string(),
                deadline: now + ttl.min(MAX_TTL),
            },
        );
        previous.is_some_and(|record| record.held_by(owner))
    }

    fn is_consumed(&self, identifier: &str) -> bool {
        let now = Instant::now();
        self.records
            .get(identifier)
            .is_some_and(|record| record.deadline > now)
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, record| record.deadline > now);
        // Concurrent inserts can make the map grow during retain.
        before.saturating_sub(self.records.len())
    }
}

/// Replay guard backed by SQLite. Survives restarts, and several gate
/// processes can share one database file: `reserve` is a single
/// `INSERT ... ON CONFLICT` statement, atomic at the database level.
///
/// Calls block (up to the 5 s busy timeout) and all of them go through one
/// connection mutex, so within a process the store handles one statement at
/// a time. The gate runs them on the blocking pool.
pub struct SqliteReplayGuard {
    conn: Mutex<rusqlite::Connection>,
    lease: Duration,
}

const STATE_RESERVED: &str = "reserved";
const STATE_CONSUMED: &str = "consumed";

impl SqliteReplayGuard {
    /// Open (or create) the replay database at `path`.
    ///
    /// On Unix the file is restricted to 0600.
    pub fn open(path: &str) -> Result<Self, rusqlite::Error> {
        Self::open_with_lease(path, DEFAULT_RESERVATION_LEASE)
    }

    pub fn open_with_lease(path: &str, lease: Duration) -> Result<Self, rusqlite::Error> {
        let conn = rusqlite::Connection::open(path)?;
        // Other gate processes may hold the write lock briefly.
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS replay_records (
                identifier TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                owner TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_replay_expires_at ON replay_records(expires_at);
            PRAGMA journal_mode=WAL;",
        )?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "failed to set replay database file permissions to 0600"
                );
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
            lease: lease.min(MAX_TTL),
        })
    }

    fn lock(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::error!("replay store mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// Current unix time. On clock error, returns 0 so that nothing looks
/// expired and no record is evicted early.
fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_else(|_| {
            tracing::error!("system clock before UNIX epoch, treating replay records as live");
            0
        })
}

fn secs(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}

impl ReplayGuard for SqliteReplayGuard {
    fn reserve(&self, identifier: &str, owner: &str) -> bool {
        let conn = self.lock();
        let now = unix_now();
        let result = conn.execute(
            "INSERT INTO replay_records (identifier, state, owner, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(identifier) DO UPDATE
                SET state = excluded.state, owner = excluded.owner, expires_at = excluded.expires_at
                WHERE replay_records.expires_at <= ?5",
            rusqlite::params![
                identifier,
                STATE_RESERVED,
                owner,
                now.saturating_add(secs(self.lease)),
                now
            ],
        );
        match result {
            Ok(changed) => changed == 1,
            Err(e) => {
                // Fail-secure: an unreadable store must not let a proof through twice.
                tracing::error!(error = %e, "replay reserve failed, treating identifier as used");
                false
            }
        }
    }

    fn renew(&self, identifier: &str, owner: &str) -> bool {
        let conn = self.lock();
        let now = unix_now();
        let result = conn.execute(
            "UPDATE replay_records SET expires_at = ?1
             WHERE identifier = ?2 AND owner = ?3 AND state = ?4",
            rusqlite::params![
                now.saturating_add(secs(self.lease)),
                identifier,
                owner,
                STATE_RESERVED
            ],
        );
        match result {
            Ok(changed) => changed == 1,
            Err(e) => {
                tracing::error!(error = %e, "replay renew failed, treating reservation as lost");
                false
            }
        }
    }

    fn release(&self, identifier: &str, owner: &str) {
        let conn = self.lock();
        if let Err(e) = conn.execute(
            "DELETE FROM replay_records WHERE identifier = ?1 AND state = ?2 AND owner = ?3",
            rusqlite::params![identifier, STATE_RESERVED, owner],
        ) {
            tracing::error!(error = %e, "failed to release reservation, it will lapse with its lease");
        }
    }

    fn confirm(&self, identifier: &str, owner: &str, ttl: Duration) -> bool {
        let conn = self.lock();
        let now = unix_now();
        let held = conn
            .query_row(
                "SELECT COUNT(*) FROM replay_records
                 WHERE identifier = ?1 AND owner = ?2 AND state = ?3",
                rusqlite::params![identifier, owner, STATE_RESERVED],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count > 0)
            .unwrap_or(false);
        let expires_at = now.saturating_add(secs(ttl.min(MAX_TTL)));
        if let Err(e) = conn.execute(
            "INSERT INTO replay_records (identifier, state, owner, expires_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(identifier) DO UPDATE
                SET state = excluded.state, owner = excluded.owner, expires_at = excluded.expires_at",
            rusqlite::params![identifier, STATE_CONSUMED, owner, expires_at],
        ) {
            tracing::error!(error = %e, "failed to confirm consumed identifier");
        }
        held
    }

    fn is_consumed(&self, identifier: &str) -> bool {
        let conn = self.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM replay_records WHERE identifier = ?1 AND expires_at > ?2",
            rusqlite::params![identifier, unix_now()],
            |row| row.get::<_, i64>(0),
        )
        .map(|count| count > 0)
        .unwrap_or(true)
    }

    fn purge_expired(&self) -> usize {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM replay_records WHERE expires_at <= ?1",
            rusqlite::params![unix_now()],
        )
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "replay purge failed");
            0
        })
    }
}
