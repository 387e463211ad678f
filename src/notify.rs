//! Outbound collaborators of the scheduled jobs.
//!
//! Delivery (mail, push, ...) and document generation are not this crate's
//! business; jobs hand their results to a [`Notifier`] and a
//! [`ReportRenderer`]. The defaults log the dispatch and render HTML.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use maud::{html, DOCTYPE};
use serde::Serialize;

use crate::error::Result;
use crate::types::{Account, RequestEntry, RequestStatus};

#[derive(Debug, Clone, Serialize)]
pub struct Reminder {
	pub idle_since: DateTime<Utc>,
	/// books currently approved for the user
	pub holding: i64,
}

/// First instant of a calendar month and the first instant of the next one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportPeriod {
	pub label: String,
	pub start: DateTime<Utc>,
	pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
	pub pending: usize,
	pub approved: usize,
	pub returned: usize,
	pub revoked: usize,
}

impl StatusCounts {
	pub fn tally(entries: &[RequestEntry]) -> Self {
		let mut counts = Self::default();
		for entry in entries {
			match entry.request.status {
				RequestStatus::Pending => counts.pending += 1,
				RequestStatus::Approved => counts.approved += 1,
				RequestStatus::Returned => counts.returned += 1,
				RequestStatus::Revoked => counts.revoked += 1,
			}
		}
		counts
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyReport {
	pub user: Account,
	pub period: ReportPeriod,
	pub entries: Vec<RequestEntry>,
	pub counts: StatusCounts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReport {
	pub content_type: &'static str,
	pub filename: String,
	pub body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
	async fn remind(&self, account: &Account, reminder: &Reminder) -> Result<()>;

	async fn send_report(
		&self,
		account: &Account,
		report: &MonthlyReport,
		document: &RenderedReport,
	) -> Result<()>;
}

pub trait ReportRenderer: Send + Sync {
	fn render(&self, report: &MonthlyReport) -> Result<RenderedReport>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
	async fn remind(&self, account: &Account, reminder: &Reminder) -> Result<()> {
		tracing::info!(
			uid = account.id,
			email = %account.email,
			idle_since = %reminder.idle_since,
			holding = reminder.holding,
			"reminder dispatched"
		);
		Ok(())
	}

	async fn send_report(
		&self,
		account: &Account,
		report: &MonthlyReport,
		document: &RenderedReport,
	) -> Result<()> {
		tracing::info!(
			uid = account.id,
			email = %account.email,
			period = %report.period.label,
			file = %document.filename,
			bytes = document.body.len(),
			"monthly report dispatched"
		);
		Ok(())
	}
}

fn day(date: Option<DateTime<Utc>>) -> String {
	date.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_else(|| "-".to_string())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlReportRenderer;

impl ReportRenderer for HtmlReportRenderer {
	fn render(&self, report: &MonthlyReport) -> Result<RenderedReport> {
		let counts = &report.counts;
		let markup = html! {
			(DOCTYPE)
			html { body {
				h1 { "Reading activity " (report.period.label) }
				p { (report.user.name) " <" (report.user.email) ">" }
				table {
					thead{ tr {
						th { "Book" }
						th { "Requested" }
						th { "Issued" }
						th { "Due" }
						th { "Closed" }
						th { "Status" }
					} }
					tbody {
						@for entry in &report.entries {
							@let row = &entry.request;
							tr {
								td { (entry.title.as_deref().unwrap_or("(removed)")) }
								td { (day(Some(row.request_date))) }
								td { (day(row.issue_date)) }
								td { (day(row.due_date)) }
								td { (day(row.returned_at.or(row.revoked_at))) }
								td { (row.status) }
							}
						}
					}
				}
				p {
					"pending " (counts.pending)
					", approved " (counts.approved)
					", returned " (counts.returned)
					", revoked " (counts.revoked)
				}
			} }
		};

		Ok(RenderedReport {
			content_type: "text/html; charset=utf-8",
			filename: format!("report-{}-{}.html", report.user.id, report.period.label),
			body: markup.into_string(),
		})
	}
}
