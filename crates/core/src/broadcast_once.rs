use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

struct Inner<T> {
	value: Mutex<Option<T>>,
	notify: Notify,
}

/// A single-shot value that any number of independent observers can await,
/// all seeing the same result once it resolves. Unlike a `oneshot::Receiver`,
/// cloning a handle never consumes the value — this is the shape
/// `prev_body_eof` needs (§9's design note): both the inbound and the
/// caller draining a response body observe the same completion.
pub struct BroadcastOnce<T> {
	inner: Arc<Inner<T>>,
}

impl<T> Clone for BroadcastOnce<T> {
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
		}
	}
}

impl<T: Clone> Default for BroadcastOnce<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T: Clone> BroadcastOnce<T> {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(Inner {
				value: Mutex::new(None),
				notify: Notify::new(),
			}),
		}
	}

	/// Resolves the value for every current and future observer. Only the
	/// first call has an effect.
	pub fn resolve(&self, value: T) {
		let mut slot = self.inner.value.lock();
		if slot.is_none() {
			*slot = Some(value);
			drop(slot);
			self.inner.notify.notify_waiters();
		}
	}

	pub fn try_get(&self) -> Option<T> {
		self.inner.value.lock().clone()
	}

	/// Waits for [`Self::resolve`] to have been called (by this handle or any
	/// clone), returning the resolved value.
	pub async fn wait(&self) -> T {
		loop {
			if let Some(v) = self.try_get() {
				return v;
			}
			let notified = self.inner.notify.notified();
			// Re-check after registering for notification to avoid a missed
			// wakeup if `resolve` ran between the first `try_get` and here.
			if let Some(v) = self.try_get() {
				return v;
			}
			notified.await;
		}
	}

	pub fn is_resolved(&self) -> bool {
		self.inner.value.lock().is_some()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn multiple_observers_see_the_same_value() {
		let once: BroadcastOnce<u32> = BroadcastOnce::new();
		let a = once.clone();
		let b = once.clone();
		once.resolve(42);
		assert_eq!(a.wait().await, 42);
		assert_eq!(b.wait().await, 42);
	}

	#[tokio::test]
	async fn second_resolve_is_ignored() {
		let once: BroadcastOnce<u32> = BroadcastOnce::new();
		once.resolve(1);
		once.resolve(2);
		assert_eq!(once.wait().await, 1);
	}

	#[tokio::test]
	async fn waiter_blocks_until_resolved() {
		let once: BroadcastOnce<u32> = BroadcastOnce::new();
		let waiter = once.clone();
		let handle = tokio::spawn(async move { waiter.wait().await });
		tokio::task::yield_now().await;
		once.resolve(7);
		assert_eq!(handle.await.unwrap(), 7);
	}
}
