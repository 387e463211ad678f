use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::config::Config;
use crate::error::Result;

/// Applied statement by statement at startup; every statement is idempotent.
pub const TABLE_SCHEMA: &[&str] = &[
	r#"
CREATE TABLE IF NOT EXISTS accounts (
	id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
	name TEXT NOT NULL,
	email TEXT NOT NULL UNIQUE,
	role TEXT NOT NULL CHECK(role IN ('librarian', 'student')),
	created_at TEXT NOT NULL,
	last_activity TEXT DEFAULT NULL
)"#,
	// exactly one librarian: seeded, never self-registered
	r#"
CREATE UNIQUE INDEX IF NOT EXISTS accounts_one_librarian
	ON accounts(role) WHERE role = 'librarian'"#,
	r#"
CREATE TABLE IF NOT EXISTS sections (
	id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
	name TEXT NOT NULL UNIQUE,
	description TEXT NOT NULL DEFAULT '',
	created_at TEXT NOT NULL
)"#,
	r#"
CREATE TABLE IF NOT EXISTS books (
	id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
	section_id INTEGER NOT NULL,
	title TEXT NOT NULL,
	author TEXT NOT NULL,
	content TEXT NOT NULL DEFAULT '',
	created_at TEXT NOT NULL,
	FOREIGN KEY(section_id) REFERENCES sections(id)
)"#,
	// book_id carries no foreign key: ledger rows outlive deleted books
	r#"
CREATE TABLE IF NOT EXISTS book_requests (
	id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
	user_id INTEGER NOT NULL,
	book_id INTEGER NOT NULL,
	status TEXT NOT NULL DEFAULT 'pending'
		CHECK(status IN ('pending', 'approved', 'returned', 'revoked')),
	request_date TEXT NOT NULL,
	issue_date TEXT DEFAULT NULL,
	due_date TEXT DEFAULT NULL,
	returned_at TEXT DEFAULT NULL,
	revoked_at TEXT DEFAULT NULL,
	CHECK((status = 'pending') == (issue_date IS NULL)),
	CHECK((status = 'pending') == (due_date IS NULL)),
	CHECK((status = 'returned') == (returned_at IS NOT NULL)),
	CHECK((status = 'revoked') == (revoked_at IS NOT NULL)),
	FOREIGN KEY(user_id) REFERENCES accounts(id)
)"#,
	r#"
CREATE UNIQUE INDEX IF NOT EXISTS book_requests_one_open
	ON book_requests(user_id, book_id) WHERE status IN ('pending', 'approved')"#,
	r#"
CREATE INDEX IF NOT EXISTS book_requests_by_status
	ON book_requests(status, due_date)"#,
	r#"
CREATE TABLE IF NOT EXISTS report_log (
	user_id INTEGER NOT NULL,
	period TEXT NOT NULL,
	sent_at TEXT NOT NULL,
	UNIQUE(user_id, period),
	FOREIGN KEY(user_id) REFERENCES accounts(id)
)"#,
];

pub async fn connect(config: &Config) -> Result<SqlitePool> {
	// writers queue on the busy timeout instead of failing fast
	let options = SqliteConnectOptions::from_str(&config.database_url)?
		.create_if_missing(true)
		.foreign_keys(true)
		.journal_mode(SqliteJournalMode::Wal)
		.busy_timeout(Duration::from_secs(5));

	let pool = SqlitePoolOptions::new()
		.max_connections(config.max_connections)
		.acquire_timeout(config.acquire_timeout)
		.connect_with(options)
		.await?;

	migrate(&pool).await?;
	Ok(pool)
}

/// Single-connection in-memory database with the schema applied.
///
/// The connection is never recycled, since closing it would drop the data.
pub async fn connect_memory() -> Result<SqlitePool> {
	let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.min_connections(1)
		.idle_timeout(None)
		.max_lifetime(None)
		.connect_with(options)
		.await?;

	migrate(&pool).await?;
	Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
	for statement in TABLE_SCHEMA {
		sqlx::query(statement).execute(pool).await?;
	}
	Ok(())
}
