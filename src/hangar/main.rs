//! Hangar, a minimalist write-once distributed file system
#[macro_use]
extern crate tracing;

mod cli;
mod server;

use structopt::StructOpt;

use hangar_util::error::Error;

use crate::cli::Command;

#[derive(StructOpt, Debug)]
#[structopt(name = "hangar", about = "Minimalist write-once distributed file system")]
struct Opt {
	#[structopt(subcommand)]
	cmd: Command,
}

#[tokio::main]
async fn main() {
	if std::env::var("RUST_LOG").is_err() {
		std::env::set_var("RUST_LOG", "hangar=info")
	}
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
		.init();

	let opt = Opt::from_args();
	let res = match opt.cmd {
		Command::Coordinator(opts) => server::run_coordinator(opts.config_file).await,
		Command::Node(opts) => server::run_storage_node(opts.config_file).await,
	};

	if let Err(e) = res {
		error!("{}", e);
		std::process::exit(1);
	}
}
