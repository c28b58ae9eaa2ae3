//! A small counting wait group for tracking running peer tasks.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Tracks a set of running workers and lets any number of threads block
/// until all of them have finished.
///
/// Unlike a channel-based approach this can be waited on repeatedly and
/// from multiple threads, and waiting when no worker was ever registered
/// returns immediately.
pub(crate) struct WaitGroup {
	inner: Arc<Inner>,
}

struct Inner {
	count: Mutex<usize>,
	cond: Condvar,
}

impl WaitGroup {
	pub fn new() -> WaitGroup {
		WaitGroup {
			inner: Arc::new(Inner {
				count: Mutex::new(0),
				cond: Condvar::new(),
			}),
		}
	}

	/// Register a new worker. The group is done once every returned guard
	/// has been dropped.
	pub fn worker(&self) -> Worker {
		*self.inner.count.lock() += 1;
		Worker { inner: self.inner.clone() }
	}

	/// Block until all registered workers have finished.
	pub fn wait(&self) {
		let mut count = self.inner.count.lock();
		while *count > 0 {
			self.inner.cond.wait(&mut count);
		}
	}
}

/// Guard representing one running worker in a [WaitGroup].
pub(crate) struct Worker {
	inner: Arc<Inner>,
}

impl Drop for Worker {
	fn drop(&mut self) {
		let mut count = self.inner.count.lock();
		*count -= 1;
		if *count == 0 {
			self.inner.cond.notify_all();
		}
	}
}
