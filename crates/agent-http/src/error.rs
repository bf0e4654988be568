use std::fmt;

/// The reason a suspended operation (`send`, `receive`, pool check-out, ...)
/// never completed because the caller gave up on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
	KeepAliveIdle,
	RequestBodyRead,
	ResponseHeadRead,
	ResponseWrite,
	MinThroughput,
	NewConnection,
}

impl fmt::Display for TimeoutKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			TimeoutKind::KeepAliveIdle => "keep-alive idle timeout",
			TimeoutKind::RequestBodyRead => "request body read timeout",
			TimeoutKind::ResponseHeadRead => "response head read timeout",
			TimeoutKind::ResponseWrite => "response write timeout",
			TimeoutKind::MinThroughput => "minimum throughput violation",
			TimeoutKind::NewConnection => "new connection timeout",
		};
		f.write_str(s)
	}
}

/// Every failure mode in §7 of the design, as a concrete type instead of a
/// bag of strings. `Io` and `Timeout` are kept as distinct variants but are
/// treated identically by [`EngineError::closes_connection`] — per the design,
/// a timeout is just an IoError with a more specific cause.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
	#[error("protocol error: {0}")]
	Protocol(String),

	#[error("truncated: {0}")]
	Truncated(String),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("{0}")]
	Timeout(TimeoutKind),

	#[error("tunnel error: {0}")]
	Tunnel(String),

	#[error("authentication error: {0}")]
	Auth(String),

	#[error("operation cancelled")]
	Cancelled,

	#[error("illegal state: {0}")]
	IllegalState(&'static str),

	#[error("body overflow: entity declared {expected} bytes, producer attempted to exceed it by {extra}")]
	BodyOverflow { expected: u64, extra: u64 },

	#[error("body underflow: entity declared {expected} bytes, producer yielded only {got}")]
	BodyUnderflow { expected: u64, got: u64 },

	/// A side ([`Sticky`]) that already failed once is being used again. Carries
	/// the original failure so callers see what actually went wrong.
	#[error("already failed: {0}")]
	Corrupted(String),
}

impl EngineError {
	/// True for every error kind whose recovery (per §7) is "surfaces to the
	/// caller and marks the connection as no-longer-reusable" rather than one
	/// of the two narrowly scoped local-recovery paths (tunnel auth retry,
	/// pool check-out fallback).
	pub fn closes_connection(&self) -> bool {
		!matches!(self, EngineError::IllegalState(_))
	}

	pub fn protocol(msg: impl Into<String>) -> Self {
		EngineError::Protocol(msg.into())
	}

	pub fn truncated(msg: impl Into<String>) -> Self {
		EngineError::Truncated(msg.into())
	}

	pub fn tunnel(msg: impl Into<String>) -> Self {
		EngineError::Tunnel(msg.into())
	}

	pub fn auth(msg: impl Into<String>) -> Self {
		EngineError::Auth(msg.into())
	}
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// A "sticky" error cell: once set, every later read returns the same error.
/// Used by the outbound and inbound sides of a connection, which per §7 must
/// fail every subsequent operation with the error that first corrupted them.
#[derive(Default)]
pub struct Sticky {
	err: once_cell::sync::OnceCell<String>,
}

impl Sticky {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records `err` as the permanent failure for this side, unless one was
	/// already recorded (first failure wins).
	pub fn set(&self, err: &EngineError) {
		let _ = self.err.set(err.to_string());
	}

	pub fn check(&self) -> Result<()> {
		match self.err.get() {
			None => Ok(()),
			Some(msg) => Err(EngineError::Corrupted(msg.clone())),
		}
	}

	pub fn is_corrupted(&self) -> bool {
		self.err.get().is_some()
	}
}
