use std::sync::Arc;

use sqlx::SqlitePool;

use crate::cache::RequestCache;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, IssuePolicy};

/// Everything an operation needs, built once at startup and passed around.
#[derive(Debug)]
pub struct Library {
	pub db: SqlitePool,
	pub clock: Arc<dyn Clock>,
	pub cache: RequestCache,
	pub policy: IssuePolicy,
}

pub type SharedState = Arc<Library>;

impl Library {
	pub fn new(
		db: SqlitePool,
		clock: Arc<dyn Clock>,
		cache: RequestCache,
		policy: IssuePolicy,
	) -> Self {
		Self {
			db,
			clock,
			cache,
			policy,
		}
	}

	pub fn from_config(db: SqlitePool, config: &Config) -> Self {
		Self::new(
			db,
			Arc::new(SystemClock),
			RequestCache::new(config.cache_ttl),
			config.policy,
		)
	}

	pub fn shared(self) -> SharedState {
		Arc::new(self)
	}
}
