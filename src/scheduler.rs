use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::JobIntervals;
use crate::error::Result;
use crate::jobs;
use crate::library::SharedState;
use crate::notify::{Notifier, ReportRenderer};

/// Runs the periodic jobs on their own tokio tasks, independent of request
/// handling. A failed run is logged; the job simply runs again next tick.
pub struct Scheduler {
	library: SharedState,
	notifier: Arc<dyn Notifier>,
	renderer: Arc<dyn ReportRenderer>,
	intervals: JobIntervals,
	reminder_after: chrono::Duration,
}

pub struct SchedulerHandle {
	tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl SchedulerHandle {
	pub fn jobs(&self) -> Vec<&'static str> {
		self.tasks.iter().map(|(name, _)| *name).collect()
	}

	pub fn shutdown(self) {
		for (name, task) in self.tasks {
			task.abort();
			tracing::debug!(job = name, "job stopped");
		}
	}
}

fn every<F, Fut, T>(
	name: &'static str,
	first_delay: Duration,
	period: Duration,
	job: F,
) -> JoinHandle<()>
where
	F: Fn() -> Fut + Send + 'static,
	Fut: Future<Output = Result<T>> + Send + 'static,
	T: Debug + Send + 'static,
{
	tokio::spawn(async move {
		let mut ticker = time::interval_at(Instant::now() + first_delay, period);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
		loop {
			ticker.tick().await;
			let run_id = Uuid::new_v4();
			let span = tracing::info_span!("job", job = name, %run_id);
			match job().instrument(span).await {
				Ok(summary) => tracing::info!(job = name, %run_id, ?summary, "job finished"),
				Err(err) => tracing::error!(job = name, %run_id, error = %err, "job failed"),
			}
		}
	})
}

impl Scheduler {
	pub fn new(
		library: SharedState,
		notifier: Arc<dyn Notifier>,
		renderer: Arc<dyn ReportRenderer>,
		intervals: JobIntervals,
		reminder_after: chrono::Duration,
	) -> Self {
		Self {
			library,
			notifier,
			renderer,
			intervals,
			reminder_after,
		}
	}

	pub fn spawn(self) -> SchedulerHandle {
		let Scheduler {
			library,
			notifier,
			renderer,
			intervals,
			reminder_after,
		} = self;

		let revoke = {
			let library = library.clone();
			every("revoke_overdue", Duration::ZERO, intervals.revoke, move || {
				let library = library.clone();
				async move { library.revoke_overdue().await }
			})
		};

		// reminders wait one period so a restart does not re-send them
		let remind = {
			let library = library.clone();
			let notifier = notifier.clone();
			every("reminders", intervals.reminder, intervals.reminder, move || {
				let library = library.clone();
				let notifier = notifier.clone();
				async move {
					jobs::send_reminders(&library, notifier.as_ref(), reminder_after).await
				}
			})
		};

		let report = every("monthly_reports", Duration::ZERO, intervals.report, move || {
			let library = library.clone();
			let notifier = notifier.clone();
			let renderer = renderer.clone();
			async move {
				jobs::send_monthly_reports(&library, notifier.as_ref(), renderer.as_ref()).await
			}
		});

		tracing::info!(
			revoke_secs = intervals.revoke.as_secs(),
			reminder_secs = intervals.reminder.as_secs(),
			report_secs = intervals.report.as_secs(),
			"scheduler started"
		);

		SchedulerHandle {
			tasks: vec![
				("revoke_overdue", revoke),
				("reminders", remind),
				("monthly_reports", report),
			],
		}
	}
}
