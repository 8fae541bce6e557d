use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use cursed_core::telemetry;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cursed", about = "SSH certificate signing daemon", version)]
struct Args {
	/// Use config from file
	#[arg(short, long, value_name = "file")]
	file: Option<PathBuf>,

	/// Parse and resolve the configuration, then exit
	#[arg(long)]
	validate_only: bool,
}

fn main() -> anyhow::Result<()> {
	telemetry::setup_logging();
	let args = Args::parse();

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.expect("tokio runtime must build")
		.block_on(async move {
			let (contents, filename) = match args.file {
				Some(file) => {
					let contents = fs_err::read_to_string(&file)?;
					(contents, Some(file))
				},
				None => ("{}".to_string(), None),
			};
			let config = cursed::config::parse_config(contents, filename)?;
			if args.validate_only {
				println!("Configuration is valid!");
				return Ok(());
			}
			info!("version: {}", env!("CARGO_PKG_VERSION"));
			let bound = cursed::app::run(Arc::new(config)).await?;
			bound.wait_termination().await
		})
}
