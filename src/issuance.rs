//! Issuance lifecycle of a book request.
//!
//! Every transition is a single conditional `UPDATE` guarded by the status it
//! leaves, so two racing callers can never both move the same row. When the
//! guard does not match, the row is re-read to report why.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::accounts;
use crate::auth::{authorize, Action, Resource};
use crate::error::{LibraryError, Result};
use crate::ledger;
use crate::library::Library;
use crate::types::{Account, Bid, BookRequest, RequestEntry, RequestStatus, Rid, Uid};

/// Outcome of one overdue sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RevocationReport {
	pub scanned: usize,
	pub revoked: usize,
	/// rows that another operation moved between the scan and the update
	pub skipped: usize,
	pub failed: usize,
}

impl Library {
	pub async fn request(&self, actor: &Account, bid: Bid) -> Result<BookRequest> {
		authorize(actor, Action::RequestBook, Resource::Catalog)?;
		self.book(bid).await?;

		let row = ledger::append(&self.db, actor.id, bid, self.clock.now()).await?;
		self.cache.invalidate(actor.id).await;

		tracing::info!(rid = row.id, uid = actor.id, bid, "book requested");
		Ok(row)
	}

	/// Issues a pending request for `due_in_days` (policy default when `None`).
	pub async fn approve(
		&self,
		actor: &Account,
		rid: Rid,
		due_in_days: Option<i64>,
	) -> Result<BookRequest> {
		authorize(actor, Action::ApproveRequest, Resource::Ledger)?;

		let days = due_in_days.unwrap_or(self.policy.default_due_days);
		if !(1..=self.policy.max_due_days).contains(&days) {
			return Err(LibraryError::invalid(format!(
				"due period must be between 1 and {} days, got {days}",
				self.policy.max_due_days
			)));
		}

		let now = self.clock.now();
		let due = Duration::try_days(days)
			.and_then(|period| now.checked_add_signed(period))
			.ok_or_else(|| {
				LibraryError::invalid(format!("due period of {days} days is out of range"))
			})?;
		let limit = self.policy.max_approved;

		let updated = sqlx::query(
			"UPDATE book_requests SET status = 'approved', issue_date = ?, due_date = ?
			WHERE id = ? AND status = 'pending'
			AND (SELECT COUNT(*) FROM book_requests held
				WHERE held.user_id = book_requests.user_id AND held.status = 'approved') < ?",
		)
		.bind(now)
		.bind(due)
		.bind(rid)
		.bind(limit)
		.execute(&self.db)
		.await?
		.rows_affected();

		if updated == 0 {
			let current = ledger::require(&self.db, rid).await?;
			if current.status != RequestStatus::Pending {
				return Err(LibraryError::InvalidState {
					id: rid,
					status: current.status,
					action: "approve",
				});
			}
			return Err(LibraryError::LimitExceeded {
				user: current.user_id,
				limit,
			});
		}

		let row = ledger::require(&self.db, rid).await?;
		self.cache.invalidate(row.user_id).await;
		tracing::info!(rid, uid = row.user_id, due = %due, "request approved");
		Ok(row)
	}

	/// Gives an approved book back. Only the holder, or the librarian on their
	/// behalf, may do this.
	pub async fn return_book(&self, actor: &Account, rid: Rid) -> Result<BookRequest> {
		let current = ledger::require(&self.db, rid).await?;
		authorize(actor, Action::ReturnBook, Resource::Request { owner: current.user_id })?;

		let updated = sqlx::query(
			"UPDATE book_requests SET status = 'returned', returned_at = ?
			WHERE id = ? AND status = 'approved'",
		)
		.bind(self.clock.now())
		.bind(rid)
		.execute(&self.db)
		.await?
		.rows_affected();

		let row = ledger::require(&self.db, rid).await?;
		if updated == 0 {
			return Err(LibraryError::InvalidState {
				id: rid,
				status: row.status,
				action: "return",
			});
		}

		self.cache.invalidate(row.user_id).await;
		tracing::info!(rid, uid = row.user_id, by = actor.id, "book returned");
		Ok(row)
	}

	/// Librarian-initiated revocation of an approved request.
	pub async fn revoke(&self, actor: &Account, rid: Rid) -> Result<BookRequest> {
		authorize(actor, Action::RevokeRequest, Resource::Ledger)?;

		let updated = sqlx::query(
			"UPDATE book_requests SET status = 'revoked', revoked_at = ?
			WHERE id = ? AND status = 'approved'",
		)
		.bind(self.clock.now())
		.bind(rid)
		.execute(&self.db)
		.await?
		.rows_affected();

		let row = ledger::require(&self.db, rid).await?;
		if updated == 0 {
			return Err(LibraryError::InvalidState {
				id: rid,
				status: row.status,
				action: "revoke",
			});
		}

		self.cache.invalidate(row.user_id).await;
		tracing::info!(rid, uid = row.user_id, "request revoked by librarian");
		Ok(row)
	}

	/// Moves every approved request past its due date to `revoked`.
	///
	/// A failing row is logged and counted, the sweep goes on; the next run
	/// picks up whatever is still overdue.
	pub async fn revoke_overdue(&self) -> Result<RevocationReport> {
		let now = self.clock.now();
		let candidates = ledger::overdue(&self.db, now).await?;
		let mut report = RevocationReport {
			scanned: candidates.len(),
			..Default::default()
		};

		for row in candidates {
			match self.revoke_if_overdue(row.id, now).await {
				Ok(true) => {
					report.revoked += 1;
					self.cache.invalidate(row.user_id).await;
					tracing::info!(rid = row.id, uid = row.user_id, "overdue request revoked");
				}
				Ok(false) => report.skipped += 1,
				Err(err) => {
					report.failed += 1;
					tracing::warn!(rid = row.id, error = %err, "could not revoke overdue request");
				}
			}
		}

		Ok(report)
	}

	async fn revoke_if_overdue(&self, rid: Rid, now: DateTime<Utc>) -> Result<bool> {
		let updated = sqlx::query(
			"UPDATE book_requests SET status = 'revoked', revoked_at = ?
			WHERE id = ? AND status = 'approved' AND due_date < ?",
		)
		.bind(now)
		.bind(rid)
		.bind(now)
		.execute(&self.db)
		.await?
		.rows_affected();
		Ok(updated == 1)
	}

	/// A user's ledger rows, served from the advisory cache when fresh.
	pub async fn user_books(&self, actor: &Account, uid: Uid) -> Result<Vec<RequestEntry>> {
		authorize(actor, Action::ViewUserBooks, Resource::User(uid))?;

		if let Some(rows) = self.cache.get(uid).await {
			return Ok(rows);
		}
		// taken before the read so a write landing meanwhile voids the put
		let seen = self.cache.generation(uid).await;
		accounts::require(&self.db, uid).await?;
		let rows = ledger::list_by_user(&self.db, uid).await?;
		self.cache.put(uid, seen, rows.clone()).await;
		Ok(rows)
	}

	pub async fn requests(
		&self,
		actor: &Account,
		status: Option<RequestStatus>,
	) -> Result<Vec<RequestEntry>> {
		authorize(actor, Action::ViewLedger, Resource::Ledger)?;
		match status {
			Some(status) => ledger::list_by_status(&self.db, status).await,
			None => ledger::list_all(&self.db).await,
		}
	}

	pub async fn requests_for_book(&self, actor: &Account, bid: Bid) -> Result<Vec<BookRequest>> {
		authorize(actor, Action::ViewLedger, Resource::Ledger)?;
		ledger::list_by_book(&self.db, bid).await
	}
}
