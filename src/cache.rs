//! Advisory cache of per-user ledger listings.
//!
//! The ledger table stays the only source of truth: entries expire after a
//! fixed TTL and are dropped on every status write touching the user.
//!
//! Every invalidation also bumps the user's generation. A listing read from
//! the database is only stored if the generation it was read under is still
//! current, so a write racing the read can never leave stale rows behind.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::types::{RequestEntry, Uid};

/// Invalidation count of one user, taken before reading the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

#[derive(Debug, Default)]
struct Slot {
	generation: u64,
	rows: Option<(Instant, Vec<RequestEntry>)>,
}

#[derive(Debug)]
pub struct RequestCache {
	ttl: Duration,
	slots: RwLock<HashMap<Uid, Slot>>,
}

impl RequestCache {
	pub fn new(ttl: Duration) -> Self {
		Self {
			ttl,
			slots: RwLock::new(HashMap::new()),
		}
	}

	pub async fn get(&self, user: Uid) -> Option<Vec<RequestEntry>> {
		let slots = self.slots.read().await;
		match slots.get(&user).and_then(|slot| slot.rows.as_ref()) {
			Some((stored, rows)) if stored.elapsed() < self.ttl => Some(rows.clone()),
			_ => None,
		}
	}

	pub async fn generation(&self, user: Uid) -> Generation {
		let slots = self.slots.read().await;
		Generation(slots.get(&user).map_or(0, |slot| slot.generation))
	}

	/// Stores `rows` unless `user` was invalidated since `seen` was taken.
	pub async fn put(&self, user: Uid, seen: Generation, rows: Vec<RequestEntry>) {
		if self.ttl.is_zero() {
			return;
		}
		let mut slots = self.slots.write().await;
		let slot = slots.entry(user).or_default();
		if slot.generation != seen.0 {
			tracing::debug!(uid = user, "dropping listing read before an invalidation");
			return;
		}
		slot.rows = Some((Instant::now(), rows));
	}

	pub async fn invalidate(&self, user: Uid) {
		let mut slots = self.slots.write().await;
		let slot = slots.entry(user).or_default();
		slot.generation = slot.generation.wrapping_add(1);
		slot.rows = None;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{BookRequest, RequestStatus};
	use chrono::Utc;

	fn entry(user: Uid, status: RequestStatus) -> RequestEntry {
		RequestEntry {
			request: BookRequest {
				id: 1,
				user_id: user,
				book_id: 1,
				status,
				request_date: Utc::now(),
				issue_date: None,
				due_date: None,
				returned_at: None,
				revoked_at: None,
			},
			title: Some("Dune".into()),
		}
	}

	#[tokio::test]
	async fn put_get_invalidate() {
		let cache = RequestCache::new(Duration::from_secs(60));
		assert!(cache.get(7).await.is_none());
		let seen = cache.generation(7).await;
		cache.put(7, seen, vec![entry(7, RequestStatus::Pending)]).await;
		assert_eq!(cache.get(7).await.map(|rows| rows.len()), Some(1));
		cache.invalidate(7).await;
		assert!(cache.get(7).await.is_none());
	}

	#[tokio::test]
	async fn listing_read_before_invalidation_is_not_stored() {
		let cache = RequestCache::new(Duration::from_secs(60));
		let seen = cache.generation(7).await;
		// a status write commits and invalidates while the listing is in flight
		cache.invalidate(7).await;
		cache.put(7, seen, vec![entry(7, RequestStatus::Pending)]).await;
		assert!(cache.get(7).await.is_none());

		let fresh = cache.generation(7).await;
		assert_ne!(fresh, seen);
		cache.put(7, fresh, vec![entry(7, RequestStatus::Approved)]).await;
		let rows = cache.get(7).await.unwrap();
		assert_eq!(rows[0].request.status, RequestStatus::Approved);

		// other users are unaffected
		let other = cache.generation(8).await;
		cache.put(8, other, vec![entry(8, RequestStatus::Pending)]).await;
		assert!(cache.get(8).await.is_some());
	}

	#[tokio::test]
	async fn zero_ttl_never_serves() {
		let cache = RequestCache::new(Duration::ZERO);
		let seen = cache.generation(1).await;
		cache.put(1, seen, vec![entry(1, RequestStatus::Pending)]).await;
		assert!(cache.get(1).await.is_none());
	}
}
