use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Filter for a `-v` count. Connection lifecycle is logged under the
/// `tether` target; per-message traffic lives in `tether_runtime`.
fn default_filter(verbosity: u8) -> &'static str {
	match verbosity {
		// Bind address and failures only.
		0 => "warn,tether=info,tether_runtime=error",
		// Sessions coming and going, exported handlers, collections.
		1 => "info,tether_runtime=debug,tower_http=info",
		// Every run/call/release frame as well.
		_ => "debug,tether_runtime=trace,hyper=info",
	}
}

/// Installs the stderr subscriber. `RUST_LOG` overrides the verbosity.
pub fn init_logging(verbosity: u8) {
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}
