//! Per-node connection pool (C6, §4.6): one connection slot per shard,
//! kept filled by a background refiller, with least-busy selection and a
//! close-cascade back to the owning node.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::shard::ShardInfo;
use crate::stream_id::MAX_STREAM_ID;
use crate::token::Token;

/// Fraction of `MAX_STREAM_ID` above which a connection is considered
/// overloaded and a caller should prefer a second-choice connection instead
/// (§4.6).
const SHED_THRESHOLD: f64 = 0.9;

struct Slot {
    conn: Mutex<Option<Arc<Connection>>>,
}

/// Maps a token to the shard index it is expected to own.
///
/// The upstream driver's pool-sizing tests only exercise this indirectly
/// (`pool_integration_test.go`); lacking the real shard-ownership formula in
/// the reference material, each shard is given an equal contiguous slice of
/// the unsigned token ordinal space, consistent with the ring ordering
/// described in §4.7.
fn token_to_shard(token: Token, nr_shards: u16) -> u16 {
    if nr_shards <= 1 {
        return 0;
    }
    let ordinal = (token as u64) ^ 0x8000_0000_0000_0000;
    let width = (u64::MAX / nr_shards as u64).wrapping_add(1);
    ((ordinal / width) % nr_shards as u64) as u16
}

struct Refill {
    notify: mpsc::Sender<()>,
}

pub struct ConnectionPool {
    address: SocketAddr,
    slots: Vec<Slot>,
    closed: AtomicBool,
    refill: Mutex<Option<Refill>>,
}

impl ConnectionPool {
    /// A pool with no slots and no refiller: used where only the address
    /// needs to be reachable (e.g. constructing a [`crate::node::Node`]
    /// before its shard count is known, or in tests).
    pub fn new_empty(address: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            address,
            slots: Vec::new(),
            closed: AtomicBool::new(false),
            refill: Mutex::new(None),
        })
    }

    /// Creates a pool with `nr_shards` empty slots and spawns its background
    /// refiller (§4.6).
    pub fn new(address: SocketAddr, nr_shards: u16, config: ConnectionConfig, refill_interval: Duration) -> Arc<Self> {
        let nr_shards = nr_shards.max(1);
        let slots = (0..nr_shards).map(|_| Slot { conn: Mutex::new(None) }).collect();
        let pool = Arc::new(Self {
            address,
            slots,
            closed: AtomicBool::new(false),
            refill: Mutex::new(None),
        });

        let (notify_tx, notify_rx) = mpsc::channel(nr_shards as usize + 1);
        *pool.refill.lock().unwrap() = Some(Refill { notify: notify_tx });
        tokio::spawn(refiller_loop(Arc::downgrade(&pool), config, refill_interval, notify_rx));

        pool
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn nr_shards(&self) -> usize {
        self.slots.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn all_conns(&self) -> Vec<Arc<Connection>> {
        self.slots.iter().filter_map(|slot| slot.conn.lock().unwrap().clone()).collect()
    }

    /// `conn(token)` (§4.6): the connection bound to `token`'s shard, falling
    /// back to [`Self::least_busy_conn`] if that slot is empty.
    pub fn conn(&self, token: Token) -> Option<Arc<Connection>> {
        if self.slots.is_empty() {
            return None;
        }
        let shard = token_to_shard(token, self.slots.len() as u16) as usize;
        if let Some(conn) = self.slots[shard].conn.lock().unwrap().clone() {
            return Some(conn);
        }
        self.least_busy_conn()
    }

    /// Linear-scans live slots for the connection with the smallest
    /// `waiting()`, ties broken by shard index, shedding to the
    /// second-choice connection when the winner is above the shed threshold
    /// (§4.6).
    pub fn least_busy_conn(&self) -> Option<Arc<Connection>> {
        let mut ranked: Vec<Arc<Connection>> = self.all_conns();
        ranked.sort_by_key(|c| c.waiting());

        let shed_at = (SHED_THRESHOLD * MAX_STREAM_ID as f64) as usize;
        let mut iter = ranked.into_iter();
        let first = iter.next()?;
        if first.waiting() > shed_at {
            if let Some(second) = iter.next() {
                return Some(second);
            }
        }
        Some(first)
    }

    /// Idempotent (§4.6): marks the pool closed, closes each live
    /// connection, and signals the refiller to exit.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for slot in &self.slots {
            let conn = slot.conn.lock().unwrap().take();
            if let Some(conn) = conn {
                conn.close().await;
            }
        }
        self.refill.lock().unwrap().take();
    }

    fn nudge_refiller(&self) {
        if let Some(refill) = self.refill.lock().unwrap().as_ref() {
            let _ = refill.notify.try_send(());
        }
    }
}

/// Background task maintaining one live connection per shard (§4.6).
/// Wakes on `refill_interval` and whenever a slot goes null (signaled by the
/// connection's own close callback), retrying failed dials with a backoff
/// bounded by `refill_interval`.
async fn refiller_loop(
    pool: Weak<ConnectionPool>,
    config: ConnectionConfig,
    refill_interval: Duration,
    mut notify_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(refill_interval) => {}
            signal = notify_rx.recv() => {
                if signal.is_none() {
                    return;
                }
            }
        }

        let pool = match pool.upgrade() {
            Some(pool) => pool,
            None => return,
        };
        if pool.is_closed() {
            return;
        }

        let nr_shards = pool.slots.len() as u16;
        for (index, slot) in pool.slots.iter().enumerate() {
            if slot.conn.lock().unwrap().is_some() {
                continue;
            }
            let shard = ShardInfo {
                shard: index as u16,
                nr_shards,
            };
            match fill_slot(&pool, index, shard, &config).await {
                Ok(()) => tracing::debug!(address = %pool.address, shard = index, "pool: filled shard slot"),
                Err(error) => {
                    tracing::warn!(address = %pool.address, shard = index, %error, "pool: failed to open shard connection, will retry");
                }
            }
        }
    }
}

async fn fill_slot(pool: &Arc<ConnectionPool>, slot_index: usize, shard: ShardInfo, config: &ConnectionConfig) -> Result<()> {
    let send_controller_target = MAX_STREAM_ID as usize / 2;
    let conn = Connection::connect_shard(pool.address, shard, config, send_controller_target).await?;

    if let Some(actual) = conn.shard {
        if actual != shard.shard {
            return Err(Error::protocol(format!(
                "shard mismatch: dialed for shard {} but server placed the connection on shard {actual}",
                shard.shard
            )));
        }
    }

    let weak_pool = Arc::downgrade(pool);
    conn.on_close(move || {
        if let Some(pool) = weak_pool.upgrade() {
            if let Some(slot) = pool.slots.get(slot_index) {
                *slot.conn.lock().unwrap() = None;
            }
            pool.nudge_refiller();
        }
    });

    *pool.slots[slot_index].conn.lock().unwrap() = Some(conn);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_to_shard_is_deterministic_and_in_range() {
        for token in [i64::MIN, -1, 0, 1, i64::MAX] {
            let shard = token_to_shard(token, 8);
            assert!(shard < 8);
        }
    }

    #[test]
    fn token_to_shard_is_zero_for_single_shard_node() {
        assert_eq!(token_to_shard(12345, 1), 0);
        assert_eq!(token_to_shard(i64::MIN, 1), 0);
    }

    #[test]
    fn new_empty_has_no_slots_and_no_connections() {
        let pool = ConnectionPool::new_empty("127.0.0.1:9042".parse().unwrap());
        assert_eq!(pool.nr_shards(), 0);
        assert!(pool.conn(0).is_none());
        assert!(pool.least_busy_conn().is_none());
        assert!(!pool.is_closed());
    }

    #[tokio::test]
    async fn close_on_empty_pool_is_idempotent() {
        let pool = ConnectionPool::new_empty("127.0.0.1:9042".parse().unwrap());
        pool.close().await;
        pool.close().await;
        assert!(pool.is_closed());
    }
}
