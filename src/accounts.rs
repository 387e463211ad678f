//! Account records.
//!
//! Registration and authentication live outside this crate; what is kept here
//! is identity, role and last activity, which the issuance service and the
//! reminder job read.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::{is_unique_violation, LibraryError, Result};
use crate::types::{Account, Role, Uid};

const ACCOUNT_COLUMNS: &str = "id, name, email, role, created_at, last_activity";

pub async fn create_student(
	db: &SqlitePool,
	name: &str,
	email: &str,
	now: DateTime<Utc>,
) -> Result<Account> {
	insert(db, name, email, Role::Student, now).await
}

async fn insert(
	db: &SqlitePool,
	name: &str,
	email: &str,
	role: Role,
	now: DateTime<Utc>,
) -> Result<Account> {
	let name = name.trim();
	let email = email.trim();
	if name.is_empty() || email.is_empty() {
		return Err(LibraryError::invalid("name and email are required"));
	}

	sqlx::query_as::<_, Account>(&format!(
		"INSERT INTO accounts (name, email, role, created_at) VALUES (?, ?, ?, ?)
		RETURNING {ACCOUNT_COLUMNS}"
	))
	.bind(name)
	.bind(email)
	.bind(role)
	.bind(now)
	.fetch_one(db)
	.await
	.map_err(|err| {
		if is_unique_violation(&err) {
			LibraryError::conflict(format!("account {email} already exists"))
		} else {
			err.into()
		}
	})
}

pub async fn get(db: &SqlitePool, uid: Uid) -> Result<Option<Account>> {
	let account = sqlx::query_as::<_, Account>(&format!(
		"SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"
	))
	.bind(uid)
	.fetch_optional(db)
	.await?;
	Ok(account)
}

pub async fn require(db: &SqlitePool, uid: Uid) -> Result<Account> {
	get(db, uid).await?.ok_or_else(|| LibraryError::not_found("user", uid))
}

pub async fn list_students(db: &SqlitePool) -> Result<Vec<Account>> {
	let students = sqlx::query_as::<_, Account>(&format!(
		"SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE role = 'student' ORDER BY id"
	))
	.fetch_all(db)
	.await?;
	Ok(students)
}

/// Students whose last activity (or signup, if never active) is before `cutoff`.
pub async fn idle_students(db: &SqlitePool, cutoff: DateTime<Utc>) -> Result<Vec<Account>> {
	let students = sqlx::query_as::<_, Account>(&format!(
		"SELECT {ACCOUNT_COLUMNS} FROM accounts
		WHERE role = 'student' AND COALESCE(last_activity, created_at) < ?
		ORDER BY id"
	))
	.bind(cutoff)
	.fetch_all(db)
	.await?;
	Ok(students)
}

pub async fn touch(db: &SqlitePool, uid: Uid, now: DateTime<Utc>) -> Result<()> {
	sqlx::query("UPDATE accounts SET last_activity = ? WHERE id = ?")
		.bind(now)
		.bind(uid)
		.execute(db)
		.await?;
	Ok(())
}

/// Makes sure the single librarian account exists.
///
/// An existing librarian is kept as-is even if its email differs from the
/// configured one; more than one librarian row is a broken deployment.
pub async fn seed_librarian(
	db: &SqlitePool,
	name: &str,
	email: &str,
	now: DateTime<Utc>,
) -> Result<Account> {
	let librarians = sqlx::query_as::<_, Account>(&format!(
		"SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE role = 'librarian'"
	))
	.fetch_all(db)
	.await?;

	match librarians.as_slice() {
		[] => {
			let account = insert(db, name, email, Role::Librarian, now).await?;
			tracing::info!(uid = account.id, email = %account.email, "seeded librarian");
			Ok(account)
		}
		[existing] => {
			if existing.email != email {
				tracing::warn!(
					configured = email,
					existing = %existing.email,
					"librarian already seeded with a different email"
				);
			}
			Ok(existing.clone())
		}
		many => Err(LibraryError::config(format!(
			"expected one librarian, found {}",
			many.len()
		))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::ErrorKind;
	use crate::sql;
	use chrono::{Duration, TimeZone};

	fn t0() -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
	}

	#[tokio::test]
	async fn seeding_is_idempotent() {
		let db = sql::connect_memory().await.unwrap();
		let first = seed_librarian(&db, "Ada", "ada@lib", t0()).await.unwrap();
		let again = seed_librarian(&db, "Other", "other@lib", t0()).await.unwrap();
		assert_eq!(first.id, again.id);
		assert!(again.is_librarian());
		assert_eq!(again.email, "ada@lib");
	}

	#[tokio::test]
	async fn second_librarian_row_is_rejected_by_schema() {
		let db = sql::connect_memory().await.unwrap();
		seed_librarian(&db, "Ada", "ada@lib", t0()).await.unwrap();
		let err = insert(&db, "Eve", "eve@lib", Role::Librarian, t0()).await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Conflict);
	}

	#[tokio::test]
	async fn duplicate_email_conflicts() {
		let db = sql::connect_memory().await.unwrap();
		create_student(&db, "Bo", "bo@uni", t0()).await.unwrap();
		let err = create_student(&db, "Bo2", "bo@uni", t0()).await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Conflict);
		assert_eq!(
			create_student(&db, " ", "x@uni", t0()).await.unwrap_err().kind(),
			ErrorKind::Invalid
		);
	}

	#[tokio::test]
	async fn idle_students_use_last_activity_or_signup() {
		let db = sql::connect_memory().await.unwrap();
		seed_librarian(&db, "Ada", "ada@lib", t0()).await.unwrap();
		let never = create_student(&db, "Never", "never@uni", t0()).await.unwrap();
		let active = create_student(&db, "Active", "active@uni", t0()).await.unwrap();
		touch(&db, active.id, t0() + Duration::days(2)).await.unwrap();

		let idle = idle_students(&db, t0() + Duration::days(1)).await.unwrap();
		let ids: Vec<Uid> = idle.iter().map(|a| a.id).collect();
		assert_eq!(ids, vec![never.id]);

		let all = list_students(&db).await.unwrap();
		assert_eq!(all.len(), 2);
		assert!(require(&db, 999).await.is_err());
	}
}
