//! Process-wide registries shared by all peers: the set of recently sent
//! version nonces (used to detect connections to self) and the counter
//! that hands out peer ids.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::mru::MruSet;

/// The number of recently sent version nonces to remember.
const MAX_SENT_NONCES: usize = 50;

/// Nonces sent in our own `version` messages. A remote advertising one of
/// these is ourselves.
static SENT_NONCES: Lazy<Mutex<MruSet<u64>>> =
	Lazy::new(|| Mutex::new(MruSet::new(MAX_SENT_NONCES)));

/// When set, self-connections are not rejected. Only useful for tests,
/// which legitimately connect a process to itself.
static ALLOW_SELF_CONNECTIONS: AtomicBool = AtomicBool::new(false);

/// The total number of peers that completed version negotiation since
/// startup. Used to assign peer ids.
static PEER_COUNT: AtomicU32 = AtomicU32::new(0);

/// Remember a nonce we used in an outgoing `version` message.
pub(crate) fn register_nonce(nonce: u64) {
	SENT_NONCES.lock().insert(nonce);
}

/// Whether the nonce was recently used in one of our own `version`
/// messages.
pub(crate) fn is_own_nonce(nonce: u64) -> bool {
	SENT_NONCES.lock().contains(&nonce)
}

/// Allow or disallow connections to self. Disallowed by default.
pub fn allow_self_connections(allow: bool) {
	ALLOW_SELF_CONNECTIONS.store(allow, Ordering::Relaxed);
}

pub(crate) fn self_connections_allowed() -> bool {
	ALLOW_SELF_CONNECTIONS.load(Ordering::Relaxed)
}

/// Hand out the next peer id. Ids start at 1 and increase monotonically.
pub(crate) fn next_peer_id() -> u32 {
	PEER_COUNT.fetch_add(1, Ordering::SeqCst) + 1
}

/// Reset all process-wide state. Intended for test harnesses that need
/// deterministic peer ids or an empty nonce registry.
pub fn reset() {
	SENT_NONCES.lock().clear();
	PEER_COUNT.store(0, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn nonce_registry_round_trip() {
		reset();
		assert!(!is_own_nonce(42));
		register_nonce(42);
		assert!(is_own_nonce(42));

		// The registry is bounded; old nonces eventually fall out.
		for n in 0..MAX_SENT_NONCES as u64 {
			register_nonce(1000 + n);
		}
		assert!(!is_own_nonce(42));
		reset();
		assert!(!is_own_nonce(1000));
	}
}
