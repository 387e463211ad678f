// library system

use std::sync::Arc;

use elib::{
	accounts,
	config::{Config, LogFormat},
	notify::{HtmlReportRenderer, LogNotifier},
	routes,
	scheduler::Scheduler,
	sql, Library, Result,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(format: LogFormat) {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new("elib=info,tower_http=info"));
	let registry = tracing_subscriber::registry().with(filter);
	match format {
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
		LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
	}
}

async fn shutdown_signal() {
	if let Err(err) = tokio::signal::ctrl_c().await {
		tracing::error!(error = %err, "cannot listen for ctrl-c");
		std::future::pending::<()>().await;
	}
	tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
	let config = Config::from_env()?;
	init_tracing(config.log_format);

	// set up connection pool
	let pool = sql::connect(&config).await?;
	let library = Library::from_config(pool, &config);
	accounts::seed_librarian(
		&library.db,
		&config.librarian_name,
		&config.librarian_email,
		library.clock.now(),
	)
	.await?;
	let state = library.shared();

	let scheduler = Scheduler::new(
		state.clone(),
		Arc::new(LogNotifier),
		Arc::new(HtmlReportRenderer),
		config.intervals.clone(),
		config.reminder_after,
	)
	.spawn();

	let app = routes::router(state);
	let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
	tracing::info!(addr = %config.bind_addr, "listening");
	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown_signal())
		.await?;

	scheduler.shutdown();
	Ok(())
}
