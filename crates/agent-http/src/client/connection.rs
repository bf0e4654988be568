//! `ClientConnection`: owns the outbound and inbound halves of a single
//! connection and implements the two-vote close protocol (§4.6).

use std::collections::VecDeque;
use std::sync::Arc;

use agent_core::BroadcastOnce;
use http::Method;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::Result;
use crate::transport::Transport;

/// What woke a delayed `Expect: 100-continue` body wait (§4.4.1, §8 scenario
/// 7): a literal 100 means the server wants the body; a final (≥200)
/// response arriving first means the server has already answered and the
/// body must not be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect100Outcome {
	SendBody,
	Rejected,
}

/// Per-request correlation data (§3's `ReqInfo`). Appended by the outbound
/// when a request is queued, consumed by the inbound when framing the
/// matching response; a 1xx response leaves it in place for the next frame.
pub struct ReqInfo {
	pub method: Method,
	pub id: u64,
	pub is_last_request: bool,
	/// Resolved as soon as either a 100 or a final response arrives for this
	/// request, unblocking (or cancelling) a delayed `Expect: 100-continue`
	/// body. Other 1xx responses (e.g. 103 Early Hints) do not resolve this.
	pub await_100: BroadcastOnce<Expect100Outcome>,
}

pub(crate) type ReqInfoQueue = Arc<SyncMutex<VecDeque<Arc<ReqInfo>>>>;
pub(crate) type SharedTransport = Arc<AsyncMutex<Option<Transport>>>;

/// `EngineError` wraps a non-`Clone` `std::io::Error`, but both the close
/// protocol's outcome and `prev_body_eof` are observed by more than one
/// waiter (`BroadcastOnce` requires `T: Clone`). Collapse to the display
/// string; callers reconstruct an `EngineError::Io` from it.
pub(crate) type EofResult = std::result::Result<(), String>;

pub(crate) fn eof_result_to_error(msg: String) -> crate::error::EngineError {
	crate::error::EngineError::Io(std::io::Error::other(msg))
}

const VOTE_GRACEFUL: i32 = 3;
const VOTE_ABORTIVE: i32 = 4;

struct CloseState {
	first_vote: Option<i32>,
}

/// Implements §4.6's close protocol: each side votes exactly once: T=3 for
/// graceful, F=4 for abortive. The real close only happens on the second
/// vote, and is graceful only if both votes were graceful (T+T); any vote
/// sum other than {6, 7, 8} is a bug in the caller.
pub(crate) struct CloseProtocol {
	state: SyncMutex<CloseState>,
	outcome: BroadcastOnce<EofResult>,
	transport: SharedTransport,
	grace_window: std::time::Duration,
}

impl CloseProtocol {
	pub fn new(transport: SharedTransport, grace_window: std::time::Duration) -> Self {
		Self {
			state: SyncMutex::new(CloseState { first_vote: None }),
			outcome: BroadcastOnce::new(),
			transport,
			grace_window,
		}
	}

	/// Casts one side's vote. Returns once the connection is fully closed
	/// (after either the first vote, which just records and waits, or the
	/// second, which performs the real close).
	pub async fn vote(&self, graceful: bool) -> Result<()> {
		let this_vote = if graceful { VOTE_GRACEFUL } else { VOTE_ABORTIVE };
		let sum = {
			let mut state = self.state.lock();
			match state.first_vote {
				None => {
					state.first_vote = Some(this_vote);
					None
				},
				Some(first) => Some(first + this_vote),
			}
		};

		let Some(sum) = sum else {
			// First vote: wait for the second side (or our own repeated call,
			// which would be a caller bug but still just waits).
			return self.outcome.wait().await.map_err(eof_result_to_error);
		};

		let graceful_close = match sum {
			6 => true,      // T + T
			7 | 8 => false, // T + F, F + F
			other => panic!("close vote protocol invariant violated: sum {other}"),
		};

		let taken = self.transport.lock().await.take();
		let result = match taken {
			Some(t) => {
				let grace = graceful_close.then_some(self.grace_window);
				t.close(grace).await
			},
			None => Ok(()),
		};
		self.outcome.resolve(result.as_ref().map(|_| ()).map_err(|e| e.to_string()));
		result
	}
}

/// Owns both halves of a connection over one [`Transport`] and the state
/// shared between them (§9: "the connection being the sole owner of both
/// sides; each side holds only a back-index to shared state").
pub struct ClientConnection {
	pub(crate) transport: SharedTransport,
	pub(crate) reqinfo_queue: ReqInfoQueue,
	pub(crate) prev_body_eof: SyncMutex<BroadcastOnce<EofResult>>,
	pub(crate) outbound_sticky: crate::error::Sticky,
	pub(crate) inbound_sticky: crate::error::Sticky,
	pub(crate) next_id: std::sync::atomic::AtomicU64,
	pub(crate) receiving: tokio::sync::Semaphore,
	pub(crate) close: Arc<CloseProtocol>,
}

impl ClientConnection {
	pub fn new(transport: Transport, grace_window: std::time::Duration) -> Arc<Self> {
		let transport = Arc::new(AsyncMutex::new(Some(transport)));
		let initial_eof = BroadcastOnce::new();
		initial_eof.resolve(Ok(())); // nothing to drain before the first response
		Arc::new(Self {
			close: Arc::new(CloseProtocol::new(transport.clone(), grace_window)),
			transport,
			reqinfo_queue: Arc::new(SyncMutex::new(VecDeque::new())),
			prev_body_eof: SyncMutex::new(initial_eof),
			outbound_sticky: crate::error::Sticky::new(),
			inbound_sticky: crate::error::Sticky::new(),
			next_id: std::sync::atomic::AtomicU64::new(0),
			receiving: tokio::sync::Semaphore::new(1),
		})
	}

	/// True once either side has permanently failed (§7: a corrupted side's
	/// connection is no longer reusable).
	pub fn is_corrupted(&self) -> bool {
		self.outbound_sticky.is_corrupted() || self.inbound_sticky.is_corrupted()
	}

	/// Casts this side's vote in the two-vote close protocol (§4.6).
	pub async fn transport_close(&self, graceful: bool) -> Result<()> {
		self.close.vote(graceful).await
	}

	pub(crate) fn alloc_id(&self) -> u64 {
		self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
	}

	/// Swaps in a fresh `prev_body_eof` for the response about to be framed,
	/// returning the previous one so the inbound can wait for the prior
	/// response's body to fully drain before reading the next head (§4.4.2).
	pub(crate) fn swap_prev_body_eof(&self, fresh: BroadcastOnce<EofResult>) -> BroadcastOnce<EofResult> {
		std::mem::replace(&mut self.prev_body_eof.lock(), fresh)
	}
}
