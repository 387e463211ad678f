//! The `book_requests` table: one row per user/book lifecycle.
//!
//! Rows are appended by [`append`] and afterwards only change through the
//! guarded status updates in `issuance`. Nothing here deletes.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::{is_unique_violation, LibraryError, Result};
use crate::types::{Bid, BookRequest, RequestEntry, RequestStatus, Rid, Uid};

pub(crate) const REQUEST_COLUMNS: &str =
	"id, user_id, book_id, status, request_date, issue_date, due_date, returned_at, revoked_at";

const ENTRY_SELECT: &str = "SELECT r.id, r.user_id, r.book_id, r.status, r.request_date,
	r.issue_date, r.due_date, r.returned_at, r.revoked_at, b.title
	FROM book_requests r LEFT JOIN books b ON b.id = r.book_id";

/// Records a new pending request.
///
/// Fails with `DuplicatePending` when the user already has a pending or
/// approved row for the same book. The partial unique index backs the check
/// up when two appends race.
pub async fn append(
	db: &SqlitePool,
	user: Uid,
	book: Bid,
	now: DateTime<Utc>,
) -> Result<BookRequest> {
	let (open,): (i64,) = sqlx::query_as(
		"SELECT COUNT(*) FROM book_requests
		WHERE user_id = ? AND book_id = ? AND status IN ('pending', 'approved')",
	)
	.bind(user)
	.bind(book)
	.fetch_one(db)
	.await?;
	if open > 0 {
		return Err(LibraryError::DuplicatePending { user, book });
	}

	sqlx::query_as::<_, BookRequest>(&format!(
		"INSERT INTO book_requests (user_id, book_id, status, request_date)
		VALUES (?, ?, 'pending', ?) RETURNING {REQUEST_COLUMNS}"
	))
	.bind(user)
	.bind(book)
	.bind(now)
	.fetch_one(db)
	.await
	.map_err(|err| {
		if is_unique_violation(&err) {
			LibraryError::DuplicatePending { user, book }
		} else {
			err.into()
		}
	})
}

pub async fn get(db: &SqlitePool, rid: Rid) -> Result<Option<BookRequest>> {
	let request = sqlx::query_as::<_, BookRequest>(&format!(
		"SELECT {REQUEST_COLUMNS} FROM book_requests WHERE id = ?"
	))
	.bind(rid)
	.fetch_optional(db)
	.await?;
	Ok(request)
}

pub async fn require(db: &SqlitePool, rid: Rid) -> Result<BookRequest> {
	get(db, rid)
		.await?
		.ok_or_else(|| LibraryError::not_found("request", rid))
}

pub async fn list_by_user(db: &SqlitePool, user: Uid) -> Result<Vec<RequestEntry>> {
	let rows = sqlx::query_as::<_, RequestEntry>(&format!(
		"{ENTRY_SELECT} WHERE r.user_id = ? ORDER BY r.id"
	))
	.bind(user)
	.fetch_all(db)
	.await?;
	Ok(rows)
}

pub async fn list_by_status(db: &SqlitePool, status: RequestStatus) -> Result<Vec<RequestEntry>> {
	let rows = sqlx::query_as::<_, RequestEntry>(&format!(
		"{ENTRY_SELECT} WHERE r.status = ? ORDER BY r.id"
	))
	.bind(status)
	.fetch_all(db)
	.await?;
	Ok(rows)
}

pub async fn list_all(db: &SqlitePool) -> Result<Vec<RequestEntry>> {
	let rows = sqlx::query_as::<_, RequestEntry>(&format!("{ENTRY_SELECT} ORDER BY r.id"))
		.fetch_all(db)
		.await?;
	Ok(rows)
}

pub async fn list_by_book(db: &SqlitePool, book: Bid) -> Result<Vec<BookRequest>> {
	let rows = sqlx::query_as::<_, BookRequest>(&format!(
		"SELECT {REQUEST_COLUMNS} FROM book_requests WHERE book_id = ? ORDER BY id"
	))
	.bind(book)
	.fetch_all(db)
	.await?;
	Ok(rows)
}

/// Rows of `user` requested within `[from, to)`.
pub async fn list_by_user_between(
	db: &SqlitePool,
	user: Uid,
	from: DateTime<Utc>,
	to: DateTime<Utc>,
) -> Result<Vec<RequestEntry>> {
	let rows = sqlx::query_as::<_, RequestEntry>(&format!(
		"{ENTRY_SELECT} WHERE r.user_id = ? AND r.request_date >= ? AND r.request_date < ?
		ORDER BY r.id"
	))
	.bind(user)
	.bind(from)
	.bind(to)
	.fetch_all(db)
	.await?;
	Ok(rows)
}

pub async fn count_approved(db: &SqlitePool, user: Uid) -> Result<i64> {
	let (count,): (i64,) = sqlx::query_as(
		"SELECT COUNT(*) FROM book_requests WHERE user_id = ? AND status = 'approved'",
	)
	.bind(user)
	.fetch_one(db)
	.await?;
	Ok(count)
}

/// Approved rows whose due date is already behind `now`.
pub async fn overdue(db: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<BookRequest>> {
	let rows = sqlx::query_as::<_, BookRequest>(&format!(
		"SELECT {REQUEST_COLUMNS} FROM book_requests
		WHERE status = 'approved' AND due_date < ? ORDER BY id"
	))
	.bind(now)
	.fetch_all(db)
	.await?;
	Ok(rows)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::accounts;
	use crate::error::ErrorKind;
	use crate::sql;
	use chrono::{Duration, TimeZone};

	fn t0() -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap()
	}

	async fn setup() -> (SqlitePool, Uid, Uid) {
		let db = sql::connect_memory().await.unwrap();
		let a = accounts::create_student(&db, "A", "a@x", t0()).await.unwrap();
		let b = accounts::create_student(&db, "B", "b@x", t0()).await.unwrap();
		(db, a.id, b.id)
	}

	#[tokio::test]
	async fn append_starts_pending() {
		let (db, a, _) = setup().await;
		let row = append(&db, a, 10, t0()).await.unwrap();
		assert_eq!(row.status, RequestStatus::Pending);
		assert_eq!(row.request_date, t0());
		assert!(row.issue_date.is_none());
		assert!(row.due_date.is_none());
		assert_eq!(require(&db, row.id).await.unwrap().user_id, a);
	}

	#[tokio::test]
	async fn second_open_request_is_duplicate() {
		let (db, a, b) = setup().await;
		append(&db, a, 10, t0()).await.unwrap();
		let err = append(&db, a, 10, t0()).await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::DuplicatePending);

		// other users and other books are unaffected
		append(&db, b, 10, t0()).await.unwrap();
		append(&db, a, 11, t0()).await.unwrap();
	}

	#[tokio::test]
	async fn terminal_rows_allow_a_new_request() {
		let (db, a, _) = setup().await;
		let row = append(&db, a, 10, t0()).await.unwrap();
		sqlx::query(
			"UPDATE book_requests
			SET status = 'returned', issue_date = ?, due_date = ?, returned_at = ?
			WHERE id = ?",
		)
		.bind(t0())
		.bind(t0())
		.bind(t0())
		.bind(row.id)
		.execute(&db)
		.await
		.unwrap();
		append(&db, a, 10, t0()).await.unwrap();
		assert_eq!(list_by_book(&db, 10).await.unwrap().len(), 2);
	}

	#[tokio::test]
	async fn listings() {
		let (db, a, b) = setup().await;
		append(&db, a, 10, t0()).await.unwrap();
		append(&db, a, 11, t0() + Duration::days(40)).await.unwrap();
		append(&db, b, 10, t0()).await.unwrap();

		assert_eq!(list_by_user(&db, a).await.unwrap().len(), 2);
		assert_eq!(list_by_status(&db, RequestStatus::Pending).await.unwrap().len(), 3);
		assert!(list_by_status(&db, RequestStatus::Approved).await.unwrap().is_empty());
		assert_eq!(list_by_book(&db, 10).await.unwrap().len(), 2);
		assert_eq!(list_all(&db).await.unwrap().len(), 3);
		assert_eq!(count_approved(&db, a).await.unwrap(), 0);

		let february = list_by_user_between(&db, a, t0(), t0() + Duration::days(29)).await.unwrap();
		assert_eq!(february.len(), 1);
		// no such book in the catalog
		assert!(february[0].title.is_none());
	}
}
