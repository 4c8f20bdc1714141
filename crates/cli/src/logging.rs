use tracing_subscriber::EnvFilter;

/// Installs the stderr subscriber.
///
/// `RUST_LOG` wins when set; otherwise `-v` raises the `marcus.*` targets
/// one level per flag.
pub fn init_logging(verbosity: u8) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbosity)));
	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_target(true)
		.try_init();
}

fn default_directives(verbosity: u8) -> &'static str {
	match verbosity {
		0 => "warn",
		1 => "warn,marcus=info",
		2 => "info,marcus=debug",
		_ => "debug,marcus=trace",
	}
}
