use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

static INITIALIZED: OnceCell<()> = OnceCell::new();

/// Install the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, defaulting to `info`. Set
/// `LOG_FORMAT=json` for machine-readable output.
pub fn setup_logging() {
	INITIALIZED.get_or_init(|| {
		let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
		let json = std::env::var("LOG_FORMAT")
			.map(|f| f.eq_ignore_ascii_case("json"))
			.unwrap_or(false);
		if json {
			tracing_subscriber::registry()
				.with(filter)
				.with(tracing_subscriber::fmt::layer().json().flatten_event(true))
				.init();
		} else {
			tracing_subscriber::registry()
				.with(filter)
				.with(tracing_subscriber::fmt::layer())
				.init();
		}
	});
}

/// Best-effort subscriber for tests; safe to call repeatedly.
pub fn setup_test_logging() {
	let _ = tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with(tracing_subscriber::fmt::layer().with_test_writer())
		.try_init();
}
