//! Periodic jobs. Each one is a plain async function over [`Library`]; the
//! [`Scheduler`](crate::scheduler::Scheduler) decides when they run.
//!
//! Reminders and reports only read the ledger. Overdue revocation lives on
//! `Library::revoke_overdue`.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use crate::accounts;
use crate::error::{LibraryError, Result};
use crate::ledger;
use crate::library::Library;
use crate::notify::{
	MonthlyReport, Notifier, Reminder, ReportPeriod, ReportRenderer, StatusCounts,
};
use crate::types::{Account, Uid};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReminderSummary {
	pub idle: usize,
	pub sent: usize,
	pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
	pub period: String,
	pub sent: usize,
	pub empty: usize,
	pub already_sent: usize,
	pub failed: usize,
}

fn month_start(year: i32, month: u32) -> Result<DateTime<Utc>> {
	let date = NaiveDate::from_ymd_opt(year, month, 1)
		.and_then(|d| d.and_hms_opt(0, 0, 0))
		.ok_or_else(|| LibraryError::invalid(format!("no such month {year}-{month}")))?;
	Ok(Utc.from_utc_datetime(&date))
}

impl ReportPeriod {
	/// The calendar month before the one `now` falls in.
	pub fn previous_month(now: DateTime<Utc>) -> Result<Self> {
		let (year, month) = match now.month() {
			1 => (now.year() - 1, 12),
			m => (now.year(), m - 1),
		};
		Ok(Self {
			label: format!("{year:04}-{month:02}"),
			start: month_start(year, month)?,
			end: month_start(now.year(), now.month())?,
		})
	}
}

/// Nudges students who have not been active for `idle_after`.
///
/// A student whose reminder fails is counted and skipped; the rest still go
/// out.
pub async fn send_reminders(
	library: &Library,
	notifier: &dyn Notifier,
	idle_after: Duration,
) -> Result<ReminderSummary> {
	let now = library.clock.now();
	let cutoff = now
		.checked_sub_signed(idle_after)
		.ok_or_else(|| LibraryError::invalid("idle period out of range"))?;
	let idle = accounts::idle_students(&library.db, cutoff).await?;
	let mut summary = ReminderSummary {
		idle: idle.len(),
		..Default::default()
	};

	for account in idle {
		match remind_student(library, notifier, &account).await {
			Ok(()) => summary.sent += 1,
			Err(err) => {
				summary.failed += 1;
				tracing::warn!(uid = account.id, error = %err, "reminder not delivered");
			}
		}
	}

	Ok(summary)
}

async fn remind_student(
	library: &Library,
	notifier: &dyn Notifier,
	account: &Account,
) -> Result<()> {
	let reminder = Reminder {
		idle_since: account.last_activity.unwrap_or(account.created_at),
		holding: ledger::count_approved(&library.db, account.id).await?,
	};
	notifier.remind(account, &reminder).await
}

async fn already_reported(library: &Library, uid: Uid, period: &str) -> Result<bool> {
	let found: Option<(i64,)> =
		sqlx::query_as("SELECT 1 FROM report_log WHERE user_id = ? AND period = ?")
			.bind(uid)
			.bind(period)
			.fetch_optional(&library.db)
			.await?;
	Ok(found.is_some())
}

enum Outcome {
	Sent,
	Empty,
	AlreadySent,
}

/// Sends every student their activity for the previous month, once.
///
/// Students without rows in that month get nothing. A period is only logged
/// as sent after the notifier accepted it, so failures retry next run. One
/// student failing does not stop the others.
pub async fn send_monthly_reports(
	library: &Library,
	notifier: &dyn Notifier,
	renderer: &dyn ReportRenderer,
) -> Result<ReportSummary> {
	let now = library.clock.now();
	let period = ReportPeriod::previous_month(now)?;
	let mut summary = ReportSummary {
		period: period.label.clone(),
		..Default::default()
	};

	for user in accounts::list_students(&library.db).await? {
		let uid = user.id;
		match report_student(library, notifier, renderer, user, &period, now).await {
			Ok(Outcome::Sent) => summary.sent += 1,
			Ok(Outcome::Empty) => summary.empty += 1,
			Ok(Outcome::AlreadySent) => summary.already_sent += 1,
			Err(err) => {
				summary.failed += 1;
				tracing::warn!(uid, period = %period.label, error = %err, "report not delivered");
			}
		}
	}

	Ok(summary)
}

async fn report_student(
	library: &Library,
	notifier: &dyn Notifier,
	renderer: &dyn ReportRenderer,
	user: Account,
	period: &ReportPeriod,
	now: DateTime<Utc>,
) -> Result<Outcome> {
	if already_reported(library, user.id, &period.label).await? {
		return Ok(Outcome::AlreadySent);
	}

	let entries =
		ledger::list_by_user_between(&library.db, user.id, period.start, period.end).await?;
	if entries.is_empty() {
		return Ok(Outcome::Empty);
	}

	let report = MonthlyReport {
		counts: StatusCounts::tally(&entries),
		user,
		period: period.clone(),
		entries,
	};
	let document = renderer.render(&report)?;
	notifier.send_report(&report.user, &report, &document).await?;

	sqlx::query("INSERT OR IGNORE INTO report_log (user_id, period, sent_at) VALUES (?, ?, ?)")
		.bind(report.user.id)
		.bind(&period.label)
		.bind(now)
		.execute(&library.db)
		.await
		.map_err(|err| {
			tracing::error!(
				uid = report.user.id,
				"report delivered but not logged, next run repeats it"
			);
			err
		})?;
	Ok(Outcome::Sent)
}
