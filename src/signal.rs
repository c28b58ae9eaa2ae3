//! One-shot broadcast signals used to shut down the peer tasks.
//!
//! A [Trigger] fires at most once; every clone of the matching [Signal]
//! becomes ready at that moment and stays ready forever. Built on a
//! crossbeam channel that is never sent on: dropping the sender makes
//! every receive operation fail immediately, which is exactly the
//! broadcast-on-close behavior we want and composes with `select!`.

use crossbeam_channel as chan;
use parking_lot::Mutex;

/// Create a connected trigger/signal pair.
pub(crate) fn signal() -> (Trigger, Signal) {
	let (tx, rx) = chan::bounded::<()>(0);
	(Trigger { tx: Mutex::new(Some(tx)) }, Signal { rx })
}

/// A trigger and its signal bundled together, for quit flags owned by a
/// single struct.
pub(crate) struct Pair {
	trigger: Trigger,
	signal: Signal,
}

/// Create a bundled trigger/signal pair.
pub(crate) fn pair() -> Pair {
	let (trigger, signal) = signal();
	Pair { trigger, signal }
}

impl Pair {
	pub fn fire(&self) {
		self.trigger.fire();
	}

	pub fn wait(&self) {
		self.signal.wait();
	}

	pub fn receiver(&self) -> &chan::Receiver<()> {
		self.signal.receiver()
	}
}

/// The firing half of a signal pair.
pub(crate) struct Trigger {
	tx: Mutex<Option<chan::Sender<()>>>,
}

impl Trigger {
	/// Fire the signal. Subsequent calls are no-ops.
	pub fn fire(&self) {
		self.tx.lock().take();
	}
}

/// The waiting half of a signal pair.
#[derive(Clone)]
pub(crate) struct Signal {
	rx: chan::Receiver<()>,
}

impl Signal {
	/// Block until the signal fires. Returns immediately if it already
	/// has.
	pub fn wait(&self) {
		let _ = self.rx.recv();
	}

	/// Whether the signal has fired.
	pub fn is_fired(&self) -> bool {
		matches!(self.rx.try_recv(), Err(chan::TryRecvError::Disconnected))
	}

	/// The underlying receiver, for use in `select!` blocks. The receive
	/// operation becomes ready (with an error) once the signal fires.
	pub fn receiver(&self) -> &chan::Receiver<()> {
		&self.rx
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fire_is_idempotent_and_broadcasts() {
		let (trigger, sig) = signal();
		let sig2 = sig.clone();
		assert!(!sig.is_fired());

		trigger.fire();
		trigger.fire();

		assert!(sig.is_fired());
		assert!(sig2.is_fired());
		// Does not block.
		sig.wait();
		sig2.wait();
	}

	#[test]
	fn select_ready_after_fire() {
		let (trigger, sig) = signal();
		trigger.fire();
		crossbeam_channel::select! {
			recv(sig.receiver()) -> _ => {}
			default => panic!("signal should be ready"),
		}
	}
}
