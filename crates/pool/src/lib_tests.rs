use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use tokio::sync::Notify;

use super::*;

struct MockConn {
	trigger: Arc<Notify>,
	reason: Arc<StdMutex<Option<EvictReason>>>,
	closed: Arc<AtomicBool>,
}

impl MockConn {
	fn new() -> (Self, Arc<AtomicBool>, Arc<Notify>, Arc<StdMutex<Option<EvictReason>>>) {
		let trigger = Arc::new(Notify::new());
		let reason = Arc::new(StdMutex::new(None));
		let closed = Arc::new(AtomicBool::new(false));
		(
			MockConn {
				trigger: trigger.clone(),
				reason: reason.clone(),
				closed: closed.clone(),
			},
			closed,
			trigger,
			reason,
		)
	}
}

impl Idle for MockConn {
	async fn await_evict(&mut self, keepalive: Duration) -> EvictReason {
		loop {
			if let Some(r) = *self.reason.lock().unwrap() {
				return r;
			}
			tokio::select! {
				_ = tokio::time::sleep(keepalive) => return EvictReason::KeepAliveTimeout,
				_ = self.trigger.notified() => continue,
			}
		}
	}

	fn close(self) {
		self.closed.store(true, Ordering::SeqCst);
	}
}

fn fire(reason_cell: &StdMutex<Option<EvictReason>>, trigger: &Notify, reason: EvictReason) {
	*reason_cell.lock().unwrap() = Some(reason);
	trigger.notify_one();
}

/// Boundary scenario 1: a checked-in connection is handed back out on the
/// next check_out with no eviction in between.
#[tokio::test]
async fn reuse_hit() {
	let pool: Pool<&'static str, MockConn> = Pool::new(Duration::from_secs(30));
	let (conn, closed, _trigger, _reason) = MockConn::new();
	pool.check_in("h:80", conn);

	// Give the watch task a chance to register before we check out.
	tokio::task::yield_now().await;
	assert_eq!(pool.idle_len(&"h:80"), 1);

	let out = pool.check_out(&"h:80").await;
	assert_matches!(out, CheckOut::Hit(_));
	assert!(!closed.load(Ordering::SeqCst));
	assert_eq!(pool.idle_len(&"h:80"), 0);
}

#[tokio::test]
async fn miss_on_empty_pool() {
	let pool: Pool<&'static str, MockConn> = Pool::new(Duration::from_secs(30));
	assert_matches!(pool.check_out(&"h:80").await, CheckOut::Miss);
}

/// Boundary scenario 2: the server sends FIN before the next check_out —
/// the watch task evicts the holder and closes it instead of handing it out.
#[tokio::test]
async fn eviction_on_peer_fin() {
	let pool: Pool<&'static str, MockConn> = Pool::new(Duration::from_secs(30));
	let (conn, closed, trigger, reason) = MockConn::new();
	pool.check_in("h:80", conn);

	fire(&reason, &trigger, EvictReason::PeerFin);
	// Let the spawned watch task observe the trigger and resolve.
	for _ in 0..50 {
		if closed.load(Ordering::SeqCst) {
			break;
		}
		tokio::task::yield_now().await;
	}
	assert!(closed.load(Ordering::SeqCst));
	assert_eq!(pool.idle_len(&"h:80"), 0);

	assert_matches!(pool.check_out(&"h:80").await, CheckOut::Miss);
}

#[tokio::test]
async fn eviction_on_keepalive_timeout() {
	let pool: Pool<&'static str, MockConn> = Pool::new(Duration::from_millis(10));
	let (conn, closed, _trigger, _reason) = MockConn::new();
	pool.check_in("h:80", conn);

	tokio::time::sleep(Duration::from_millis(100)).await;
	assert!(closed.load(Ordering::SeqCst));
	assert_matches!(pool.check_out(&"h:80").await, CheckOut::Miss);
}

/// A connection is never observable in both the pool and a caller's hands at
/// once: after check_out resolves Hit, idle_len for the key drops to zero.
#[tokio::test]
async fn never_double_owned() {
	let pool: Pool<&'static str, MockConn> = Pool::new(Duration::from_secs(30));
	let (c1, _, _, _) = MockConn::new();
	let (c2, _, _, _) = MockConn::new();
	pool.check_in("h:80", c1);
	pool.check_in("h:80", c2);
	tokio::task::yield_now().await;
	assert_eq!(pool.idle_len(&"h:80"), 2);

	assert_matches!(pool.check_out(&"h:80").await, CheckOut::Hit(_));
	assert_eq!(pool.idle_len(&"h:80"), 1);
	assert_matches!(pool.check_out(&"h:80").await, CheckOut::Hit(_));
	assert_eq!(pool.idle_len(&"h:80"), 0);
	assert_matches!(pool.check_out(&"h:80").await, CheckOut::Miss);
}
