//! A destination-keyed pool of idle connections, evicted by watching each one
//! for the first sign it is no longer safely reusable: a keep-alive timeout,
//! an unsolicited byte, a peer FIN, or a lower-layer I/O error.
//!
//! The pool does not know how to dial a fresh connection — a miss (including
//! the rare "eviction raced ahead of check-out" case) is reported to the
//! caller as [`CheckOut::Miss`], and redialing is left to whoever owns the
//! dialer (`agent-http`'s client, in this workspace).

use std::collections::VecDeque;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures_channel::oneshot;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

/// Why an idle connection stopped being safely reusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
	KeepAliveTimeout,
	PeerFin,
	UnsolicitedBytes,
	Error,
}

enum WatchOutcome<C> {
	CheckedOut(C),
	Evicted(EvictReason, C),
}

/// A pooled connection's idle-watch contract. Implementors wrap whatever
/// transport the pool is caching (the `ClientConnection` in `agent-http`).
pub trait Idle: Send + 'static {
	/// Waits for the first reason this connection should stop being idle.
	/// Must be cancel-safe: the pool calls this once and polls it inside a
	/// `select!` against a check-out cancellation signal.
	fn await_evict(&mut self, keepalive: Duration) -> impl Future<Output = EvictReason> + Send;

	fn close(self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct HolderId(u64);

struct HolderHandle {
	id: HolderId,
	cancel: oneshot::Sender<()>,
}

struct Inner<K, C> {
	queues: HashMap<K, VecDeque<HolderHandle>>,
	pending_checkouts: HashMap<HolderId, oneshot::Sender<CheckOut<C>>>,
	next_id: u64,
}

/// The result of a [`Pool::check_out`] call.
pub enum CheckOut<C> {
	/// A cached connection, already known to be free of spurious server data.
	Hit(C),
	/// No idle connection is available for this key (or the one we picked
	/// was evicted in the race between popping it and cancelling its watch).
	Miss,
}

/// A destination-keyed pool of idle connections.
///
/// `K` is typically the destination address (`TcpAddress` in `agent-http`);
/// `C` is the pooled connection type, which must implement [`Idle`].
pub struct Pool<K, C> {
	inner: Arc<Mutex<Inner<K, C>>>,
	keepalive: Duration,
}

impl<K, C> Clone for Pool<K, C> {
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
			keepalive: self.keepalive,
		}
	}
}

impl<K, C> Pool<K, C>
where
	K: Eq + Hash + Clone + Send + 'static,
	C: Idle,
{
	pub fn new(keepalive: Duration) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner {
				queues: HashMap::new(),
				pending_checkouts: HashMap::new(),
				next_id: 0,
			})),
			keepalive,
		}
	}

	/// Returns the number of idle connections currently cached for `key`.
	pub fn idle_len(&self, key: &K) -> usize {
		self.inner
			.lock()
			.queues
			.get(key)
			.map(|q| q.len())
			.unwrap_or(0)
	}

	/// Hands `conn` to the pool. The pool arms the idle watch and appends the
	/// holder to `key`'s queue before returning — by the time this call
	/// completes, a concurrent `check_out` can already observe the holder.
	pub fn check_in(&self, key: K, mut conn: C)
	where
		K: std::fmt::Debug,
	{
		let (cancel_tx, cancel_rx) = oneshot::channel();
		let id;
		{
			let mut inner = self.inner.lock();
			inner.next_id += 1;
			id = HolderId(inner.next_id);
			inner
				.queues
				.entry(key.clone())
				.or_default()
				.push_back(HolderHandle {
					id,
					cancel: cancel_tx,
				});
		}

		let keepalive = self.keepalive;
		let pool = self.clone();
		tokio::spawn(async move {
			let outcome = tokio::select! {
				biased;
				_ = cancel_rx => WatchOutcome::CheckedOut(conn),
				reason = conn.await_evict(keepalive) => WatchOutcome::Evicted(reason, conn),
			};
			pool.on_holder_resolved(&key, id, outcome);
		});
	}

	/// Pops the most recently checked-in holder for `key`, if any, and races
	/// its cancellation against a genuine eviction event. Returns
	/// [`CheckOut::Miss`] both when the queue was empty and when the holder we
	/// picked was evicted before the cancellation could win.
	pub async fn check_out(&self, key: &K) -> CheckOut<C> {
		let (handle, result_rx) = {
			let mut inner = self.inner.lock();
			let Some(queue) = inner.queues.get_mut(key) else {
				return CheckOut::Miss;
			};
			let Some(handle) = queue.pop_back() else {
				return CheckOut::Miss;
			};
			if queue.is_empty() {
				inner.queues.remove(key);
			}
			let (result_tx, result_rx) = oneshot::channel();
			inner.pending_checkouts.insert(handle.id, result_tx);
			(handle, result_rx)
		};

		// The checkout is not complete until the watch task's select! actually
		// observes this cancellation — a real eviction reason may have already
		// won the race, in which case `on_holder_resolved` redirects us to Miss.
		let _ = handle.cancel.send(());

		match result_rx.await {
			Ok(result) => result,
			// The watch task died without resolving (e.g. panicked) — treat as a miss.
			Err(_) => CheckOut::Miss,
		}
	}

	fn on_holder_resolved(&self, key: &K, id: HolderId, outcome: WatchOutcome<C>)
	where
		K: std::fmt::Debug,
	{
		let pending = {
			let mut inner = self.inner.lock();
			// The holder may still be sitting in its queue (eviction path) or may
			// already have been popped by check_out; remove defensively either way.
			if let Some(queue) = inner.queues.get_mut(key) {
				queue.retain(|h| h.id != id);
				if queue.is_empty() {
					inner.queues.remove(key);
				}
			}
			inner.pending_checkouts.remove(&id)
		};

		match (outcome, pending) {
			(WatchOutcome::CheckedOut(conn), Some(tx)) => {
				trace!(?key, "checkout handshake completed");
				let _ = tx.send(CheckOut::Hit(conn));
			},
			(WatchOutcome::CheckedOut(conn), None) => {
				// Cancelled without a live checkout waiting on it: shouldn't happen
				// since only check_out sends the cancel signal, but don't leak the
				// connection if it does.
				debug!(?key, "checkout handle fired with no pending checkout");
				conn.close();
			},
			(WatchOutcome::Evicted(reason, conn), pending) => {
				debug!(?key, ?reason, "evicting idle connection");
				conn.close();
				if let Some(tx) = pending {
					// Eviction raced ahead of the checkout's cancellation; report a
					// miss so the caller dials a fresh connection to `key`.
					let _ = tx.send(CheckOut::Miss);
				}
			},
		}
	}
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
