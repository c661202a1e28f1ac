//! Pool overflow logging. Checkout and checkin hooks feed pool snapshots to
//! an observer that logs whenever the overflow count moves off its last
//! recorded value, with the direction it moved in.

use std::fmt;
use std::sync::{Mutex, OnceLock};

use sqlx::PgPool;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    Checkout,
    Checkin,
}

/// Pool state at the moment a hook fired.
#[derive(Debug, Clone, Copy)]
pub struct PoolSnapshot {
    pub event: PoolEvent,
    pub size: u32,
    pub idle: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incremented,
    Decremented,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incremented => f.write_str("incremented"),
            Self::Decremented => f.write_str("decremented"),
        }
    }
}

/// One observed change of the overflow count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverflowChange {
    pub overflow: i64,
    pub direction: Direction,
    pub checked_out: u32,
    pub checked_in: u32,
}

/// Tracks the pool's overflow count, where overflow is how many connections
/// exist beyond the configured pool size (negative while the pool is still
/// filling). Purely observational; the hooks always let the connection pass.
pub struct OverflowObserver {
    pool_size: u32,
    pool: OnceLock<PgPool>,
    baseline: Mutex<i64>,
}

impl OverflowObserver {
    pub fn new(pool_size: u32) -> Self {
        Self {
            pool_size,
            pool: OnceLock::new(),
            // an empty pool sits pool_size below overflow
            baseline: Mutex::new(-(i64::from(pool_size))),
        }
    }

    /// Hand the observer its pool handle. The pool is built before the
    /// observer can hold it, so the hooks no-op until this is called.
    pub fn attach(&self, pool: PgPool) {
        let _ = self.pool.set(pool);
    }

    pub fn observe(&self, event: PoolEvent) {
        let Some(pool) = self.pool.get() else {
            return;
        };
        let snapshot = PoolSnapshot {
            event,
            size: pool.size(),
            idle: pool.num_idle() as u32,
        };
        if let Some(change) = self.record(snapshot) {
            info!(
                "pool_overflow={} overflow={} size={} checked_out={} checked_in={} pool_size={}",
                change.direction,
                change.overflow,
                snapshot.size,
                change.checked_out,
                change.checked_in,
                self.pool_size
            );
        }
    }

    /// Fold one snapshot into the baseline and report the change, if any.
    /// Split out from [`observe`](Self::observe) so the comparison logic is
    /// testable without a live pool.
    pub fn record(&self, snapshot: PoolSnapshot) -> Option<OverflowChange> {
        let overflow = i64::from(snapshot.size) - i64::from(self.pool_size);
        // a poisoned lock means another hook panicked; drop the sample
        let mut baseline = self.baseline.lock().ok()?;
        if overflow == *baseline {
            return None;
        }
        let direction = if overflow > *baseline {
            Direction::Incremented
        } else {
            Direction::Decremented
        };
        *baseline = overflow;
        Some(OverflowChange {
            overflow,
            direction,
            checked_out: snapshot.size.saturating_sub(snapshot.idle),
            checked_in: snapshot.idle,
        })
    }
}
