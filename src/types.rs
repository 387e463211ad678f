use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub type Uid = i64;
pub type Sid = i64;
pub type Bid = i64;
pub type Rid = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
	Librarian,
	Student,
}

impl Role {
	pub fn as_str(self) -> &'static str {
		match self {
			Role::Librarian => "librarian",
			Role::Student => "student",
		}
	}
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Account {
	pub id: Uid,
	pub name: String,
	pub email: String,
	pub role: Role,
	pub created_at: DateTime<Utc>,
	pub last_activity: Option<DateTime<Utc>>,
}

impl Account {
	pub fn is_librarian(&self) -> bool {
		self.role == Role::Librarian
	}
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Section {
	pub id: Sid,
	pub name: String,
	pub description: String,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Book {
	pub id: Bid,
	pub section_id: Sid,
	pub title: String,
	pub author: String,
	/// where the e-book itself lives (path or url)
	pub content: String,
	pub created_at: DateTime<Utc>,
}

/// Lifecycle of a [`BookRequest`].
///
/// `Pending -> Approved -> {Returned | Revoked}`; nothing moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum RequestStatus {
	Pending,
	Approved,
	Returned,
	Revoked,
}

impl RequestStatus {
	pub const ALL: [RequestStatus; 4] = [
		RequestStatus::Pending,
		RequestStatus::Approved,
		RequestStatus::Returned,
		RequestStatus::Revoked,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			RequestStatus::Pending => "pending",
			RequestStatus::Approved => "approved",
			RequestStatus::Returned => "returned",
			RequestStatus::Revoked => "revoked",
		}
	}

	pub fn is_terminal(self) -> bool {
		matches!(self, RequestStatus::Returned | RequestStatus::Revoked)
	}

	pub fn can_become(self, next: RequestStatus) -> bool {
		matches!(
			(self, next),
			(RequestStatus::Pending, RequestStatus::Approved)
				| (RequestStatus::Approved, RequestStatus::Returned)
				| (RequestStatus::Approved, RequestStatus::Revoked)
		)
	}
}

impl fmt::Display for RequestStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One ledger row: a single user's lifecycle with a single book.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BookRequest {
	pub id: Rid,
	pub user_id: Uid,
	pub book_id: Bid,
	pub status: RequestStatus,
	pub request_date: DateTime<Utc>,
	pub issue_date: Option<DateTime<Utc>>,
	pub due_date: Option<DateTime<Utc>>,
	pub returned_at: Option<DateTime<Utc>>,
	pub revoked_at: Option<DateTime<Utc>>,
}

/// Ledger row joined with the title of its book.
/// `title` is `None` once the book has been removed from the catalog.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RequestEntry {
	#[sqlx(flatten)]
	#[serde(flatten)]
	pub request: BookRequest,
	pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSection {
	pub name: String,
	#[serde(default)]
	pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SectionUpdate {
	pub name: Option<String>,
	pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBook {
	pub section_id: Sid,
	pub title: String,
	pub author: String,
	#[serde(default)]
	pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookUpdate {
	pub section_id: Option<Sid>,
	pub title: Option<String>,
	pub author: Option<String>,
	pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchField {
	#[default]
	Any,
	Title,
	Author,
	Section,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
	#[default]
	Inserted,
	Title,
	Author,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
	pub q: Option<String>,
	#[serde(default)]
	pub field: SearchField,
	#[serde(default)]
	pub sort: SortKey,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApproveForm {
	pub due_in_days: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusFilter {
	pub status: Option<RequestStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteParams {
	#[serde(default)]
	pub cascade: bool,
}
