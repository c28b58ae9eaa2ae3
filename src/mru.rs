//! Bounded most-recently-used sets.

use std::hash::Hash;

use lru::LruCache;

/// A bounded set with most-recently-used eviction.
///
/// Inserting at capacity evicts the least recently inserted entry.
/// Lookups do not refresh an entry's position; only (re-)insertion does.
pub(crate) struct MruSet<T: Hash + Eq> {
	cache: LruCache<T, ()>,
}

impl<T: Hash + Eq> MruSet<T> {
	pub fn new(capacity: usize) -> MruSet<T> {
		MruSet { cache: LruCache::new(capacity) }
	}

	pub fn contains(&self, item: &T) -> bool {
		self.cache.contains(item)
	}

	/// Insert the item, marking it most recently used. At capacity the
	/// least recently used entry is dropped.
	pub fn insert(&mut self, item: T) {
		self.cache.put(item, ());
	}

	pub fn len(&self) -> usize {
		self.cache.len()
	}

	pub fn clear(&mut self) {
		self.cache.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn evicts_least_recently_used() {
		let mut set = MruSet::new(3);
		set.insert(1);
		set.insert(2);
		set.insert(3);
		assert_eq!(set.len(), 3);

		set.insert(4);
		assert_eq!(set.len(), 3);
		assert!(!set.contains(&1));
		assert!(set.contains(&2));
		assert!(set.contains(&4));
	}

	#[test]
	fn reinsertion_refreshes_position() {
		let mut set = MruSet::new(2);
		set.insert(1);
		set.insert(2);
		// Refresh 1 so that 2 is now the oldest.
		set.insert(1);
		set.insert(3);
		assert!(set.contains(&1));
		assert!(!set.contains(&2));
		assert!(set.contains(&3));
	}

	#[test]
	fn lookups_do_not_refresh() {
		let mut set = MruSet::new(2);
		set.insert(1);
		set.insert(2);
		assert!(set.contains(&1));
		// 1 was only looked up, not reinserted, so it is still the oldest.
		set.insert(3);
		assert!(!set.contains(&1));
		assert!(set.contains(&2));
	}

	#[test]
	fn clear_empties_the_set() {
		let mut set = MruSet::new(2);
		set.insert(1);
		set.clear();
		assert_eq!(set.len(), 0);
		assert!(!set.contains(&1));
	}
}
