//! Crate-wide error type.
//!
//! Every failure a caller can observe maps onto one stable [`ErrorKind`],
//! which is also the `error` field of HTTP error bodies.

use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use serde_json::json;
use thiserror::Error;

use crate::types::{Bid, RequestStatus, Rid, Uid};

pub type Result<T> = std::result::Result<T, LibraryError>;

#[derive(Debug, Error)]
pub enum LibraryError {
	#[error("{entity} {id} not found")]
	NotFound { entity: &'static str, id: i64 },

	#[error("request {id} is {status}, cannot {action}")]
	InvalidState {
		id: Rid,
		status: RequestStatus,
		action: &'static str,
	},

	#[error("user {user} already holds {limit} approved books")]
	LimitExceeded { user: Uid, limit: i64 },

	#[error("user {user} already has an open request for book {book}")]
	DuplicatePending { user: Uid, book: Bid },

	#[error("forbidden: {0}")]
	Forbidden(String),

	#[error("conflict: {0}")]
	Conflict(String),

	#[error("invalid input: {0}")]
	Invalid(String),

	#[error("no authenticated user")]
	Unauthenticated,

	#[error("notification failed: {0}")]
	Notify(String),

	#[error("configuration error: {0}")]
	Config(String),

	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
	matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Stable, caller-facing classification of a [`LibraryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	NotFound,
	InvalidState,
	LimitExceeded,
	DuplicatePending,
	Forbidden,
	Conflict,
	Invalid,
	Unauthenticated,
	Internal,
}

impl ErrorKind {
	pub fn as_str(self) -> &'static str {
		match self {
			ErrorKind::NotFound => "not_found",
			ErrorKind::InvalidState => "invalid_state",
			ErrorKind::LimitExceeded => "limit_exceeded",
			ErrorKind::DuplicatePending => "duplicate_pending",
			ErrorKind::Forbidden => "forbidden",
			ErrorKind::Conflict => "conflict",
			ErrorKind::Invalid => "invalid",
			ErrorKind::Unauthenticated => "unauthenticated",
			ErrorKind::Internal => "internal",
		}
	}

	pub fn status(self) -> StatusCode {
		match self {
			ErrorKind::NotFound => StatusCode::NOT_FOUND,
			ErrorKind::InvalidState
			| ErrorKind::LimitExceeded
			| ErrorKind::DuplicatePending
			| ErrorKind::Conflict => StatusCode::CONFLICT,
			ErrorKind::Forbidden => StatusCode::FORBIDDEN,
			ErrorKind::Invalid => StatusCode::BAD_REQUEST,
			ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
			ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl LibraryError {
	pub fn not_found(entity: &'static str, id: i64) -> Self {
		Self::NotFound { entity, id }
	}

	pub fn forbidden(message: impl Into<String>) -> Self {
		Self::Forbidden(message.into())
	}

	pub fn conflict(message: impl Into<String>) -> Self {
		Self::Conflict(message.into())
	}

	pub fn invalid(message: impl Into<String>) -> Self {
		Self::Invalid(message.into())
	}

	pub fn config(message: impl Into<String>) -> Self {
		Self::Config(message.into())
	}

	pub fn kind(&self) -> ErrorKind {
		match self {
			LibraryError::NotFound { .. } => ErrorKind::NotFound,
			LibraryError::InvalidState { .. } => ErrorKind::InvalidState,
			LibraryError::LimitExceeded { .. } => ErrorKind::LimitExceeded,
			LibraryError::DuplicatePending { .. } => ErrorKind::DuplicatePending,
			LibraryError::Forbidden(_) => ErrorKind::Forbidden,
			LibraryError::Conflict(_) => ErrorKind::Conflict,
			LibraryError::Invalid(_) => ErrorKind::Invalid,
			LibraryError::Unauthenticated => ErrorKind::Unauthenticated,
			LibraryError::Notify(_)
			| LibraryError::Config(_)
			| LibraryError::Database(_)
			| LibraryError::Io(_) => ErrorKind::Internal,
		}
	}
}

impl IntoResponse for LibraryError {
	fn into_response(self) -> Response {
		let kind = self.kind();
		let message = if kind == ErrorKind::Internal {
			tracing::error!(error = %self, "request failed");
			"internal error".to_string()
		} else {
			self.to_string()
		};
		let body = json!({ "error": kind.as_str(), "message": message });
		(kind.status(), Json(body)).into_response()
	}
}
