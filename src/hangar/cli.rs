use std::path::PathBuf;

use structopt::StructOpt;

#[derive(StructOpt, Debug)]
pub enum Command {
	/// Run the metadata coordinator
	#[structopt(name = "coordinator")]
	Coordinator(ServerOpt),

	/// Run a storage node
	#[structopt(name = "node")]
	Node(ServerOpt),
}

#[derive(StructOpt, Debug)]
pub struct ServerOpt {
	/// Configuration file
	#[structopt(short = "c", long = "config", default_value = "./hangar.toml")]
	pub config_file: PathBuf,
}
