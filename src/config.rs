//! Runtime configuration.
//!
//! Values come from the process environment, after `.env` has been loaded
//! with `dotenvy`. Every key has a default, so an empty environment yields a
//! working local setup backed by `elib.db`.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{LibraryError, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://elib.db";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
/// upper bound for `MAX_DUE_DAYS`
pub const DUE_DAYS_CEILING: i64 = 3650;
/// upper bound for job intervals and `REMINDER_AFTER_HOURS`
pub const JOB_PERIOD_CEILING: Duration = Duration::from_secs(366 * 86_400);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
	Pretty,
	Json,
}

/// Limits applied by the issuance service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuePolicy {
	/// most requests one user may hold in `approved` at once
	pub max_approved: i64,
	pub default_due_days: i64,
	pub max_due_days: i64,
}

impl Default for IssuePolicy {
	fn default() -> Self {
		Self {
			max_approved: 5,
			default_due_days: 7,
			max_due_days: 30,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobIntervals {
	pub revoke: Duration,
	pub reminder: Duration,
	pub report: Duration,
}

impl Default for JobIntervals {
	fn default() -> Self {
		Self {
			revoke: Duration::from_secs(300),
			reminder: Duration::from_secs(86_400),
			report: Duration::from_secs(86_400),
		}
	}
}

#[derive(Debug, Clone)]
pub struct Config {
	pub database_url: String,
	pub bind_addr: SocketAddr,
	pub max_connections: u32,
	pub acquire_timeout: Duration,
	pub policy: IssuePolicy,
	pub cache_ttl: Duration,
	pub intervals: JobIntervals,
	/// students idle for longer than this get a reminder
	pub reminder_after: chrono::Duration,
	pub librarian_name: String,
	pub librarian_email: String,
	pub log_format: LogFormat,
}

impl Config {
	pub fn from_env() -> Result<Self> {
		// a missing .env is fine, the defaults cover it
		let _ = dotenvy::dotenv();
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	pub fn from_lookup<F>(lookup: F) -> Result<Self>
	where
		F: Fn(&str) -> Option<String>,
	{
		let defaults = IssuePolicy::default();
		let intervals = JobIntervals::default();

		let log_format = match lookup("LOG_FORMAT").as_deref() {
			None | Some("") | Some("pretty") => LogFormat::Pretty,
			Some("json") => LogFormat::Json,
			Some(other) => {
				return Err(LibraryError::config(format!("LOG_FORMAT: unknown format {other:?}")))
			}
		};

		let reminder_hours: i64 = parse_or(&lookup, "REMINDER_AFTER_HOURS", 24)?;
		let reminder_after = chrono::Duration::try_hours(reminder_hours).ok_or_else(|| {
			LibraryError::config(format!("REMINDER_AFTER_HOURS: {reminder_hours} out of range"))
		})?;

		let default_addr: SocketAddr = DEFAULT_BIND_ADDR
			.parse()
			.map_err(|_| LibraryError::config("default bind address"))?;

		let config = Config {
			database_url: lookup("DATABASE_URL")
				.unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
			bind_addr: parse_or(&lookup, "BIND_ADDR", default_addr)?,
			max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 5)?,
			acquire_timeout: Duration::from_secs(parse_or(&lookup, "DB_ACQUIRE_TIMEOUT_SECS", 3)?),
			policy: IssuePolicy {
				max_approved: parse_or(&lookup, "ISSUE_LIMIT", defaults.max_approved)?,
				default_due_days: parse_or(&lookup, "DEFAULT_DUE_DAYS", defaults.default_due_days)?,
				max_due_days: parse_or(&lookup, "MAX_DUE_DAYS", defaults.max_due_days)?,
			},
			cache_ttl: Duration::from_secs(parse_or(&lookup, "CACHE_TTL_SECS", 60)?),
			intervals: JobIntervals {
				revoke: secs_or(&lookup, "REVOKE_INTERVAL_SECS", intervals.revoke)?,
				reminder: secs_or(&lookup, "REMINDER_INTERVAL_SECS", intervals.reminder)?,
				report: secs_or(&lookup, "REPORT_INTERVAL_SECS", intervals.report)?,
			},
			reminder_after,
			librarian_name: lookup("LIBRARIAN_NAME").unwrap_or_else(|| "Librarian".to_string()),
			librarian_email: lookup("LIBRARIAN_EMAIL")
				.unwrap_or_else(|| "librarian@elib.local".to_string()),
			log_format,
		};
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<()> {
		if self.max_connections == 0 {
			return Err(LibraryError::config("DB_MAX_CONNECTIONS must be > 0"));
		}
		if self.policy.max_approved <= 0 {
			return Err(LibraryError::config("ISSUE_LIMIT must be > 0"));
		}
		if self.policy.default_due_days <= 0 || self.policy.max_due_days <= 0 {
			return Err(LibraryError::config("due periods must be > 0"));
		}
		if self.policy.max_due_days > DUE_DAYS_CEILING {
			return Err(LibraryError::config(format!("MAX_DUE_DAYS must be <= {DUE_DAYS_CEILING}")));
		}
		if self.policy.default_due_days > self.policy.max_due_days {
			return Err(LibraryError::config("DEFAULT_DUE_DAYS exceeds MAX_DUE_DAYS"));
		}
		let JobIntervals { revoke, reminder, report } = &self.intervals;
		if revoke.is_zero() || reminder.is_zero() || report.is_zero() {
			return Err(LibraryError::config("job intervals must be > 0"));
		}
		if [revoke, reminder, report].into_iter().any(|period| *period > JOB_PERIOD_CEILING) {
			return Err(LibraryError::config("job intervals must be at most a year"));
		}
		let ceiling = chrono::Duration::from_std(JOB_PERIOD_CEILING)
			.map_err(|_| LibraryError::config("job period ceiling"))?;
		if self.reminder_after <= chrono::Duration::zero() || self.reminder_after > ceiling {
			return Err(LibraryError::config("REMINDER_AFTER_HOURS must be between 1 and 8784"));
		}
		if self.librarian_email.trim().is_empty() {
			return Err(LibraryError::config("LIBRARIAN_EMAIL is empty"));
		}
		Ok(())
	}
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
	F: Fn(&str) -> Option<String>,
	T: FromStr,
{
	match lookup(key) {
		Some(raw) if !raw.trim().is_empty() => raw
			.trim()
			.parse()
			.map_err(|_| LibraryError::config(format!("{key}: cannot parse {raw:?}"))),
		_ => Ok(default),
	}
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
	F: Fn(&str) -> Option<String>,
{
	parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
}
