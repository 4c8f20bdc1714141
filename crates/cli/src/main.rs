use clap::Parser;
use marcus_session_cli::cli::Cli;
use marcus_session_cli::context::CommandContext;
use marcus_session_cli::output::{ErrorCode, ResultBuilder, print_result};
use marcus_session_cli::{commands, logging};
use tracing::error;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let format = cli.format;
	let ctx = match CommandContext::from_cli(&cli) {
		Ok(ctx) => ctx,
		Err(err) => {
			error!(target = "marcus.cli", error = %err, "invalid configuration");
			let result = ResultBuilder::<()>::new(cli.command.name())
				.error(ErrorCode::classify(&err), format!("{err:#}"))
				.build();
			print_result(&result, format);
			std::process::exit(2);
		}
	};

	if !commands::dispatch(cli.command, &ctx).await {
		std::process::exit(1);
	}
}
