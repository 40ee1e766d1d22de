//! framekv-cli: send one command and print the reply.
//!
//! ```text
//! $ framekv-cli set x 1
//! (ok)
//! $ framekv-cli get x
//! (ok) 1
//! $ framekv-cli get y
//! (nil)
//! ```

use clap::Parser;
use framekv::client::{format_response, Client};
use framekv::protocol::{FrameLimits, Status};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "framekv-cli")]
#[command(version)]
#[command(about = "Command-line client for framekv", long_about = None)]
struct CliArgs {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:12345")]
    server: String,

    /// Largest response accepted, in bytes
    #[arg(long)]
    max_message_size: Option<usize>,

    /// Command and arguments, e.g. `get key`
    #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
    args: Vec<String>,
}

fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let mut limits = FrameLimits::default();
    if let Some(max) = cli.max_message_size {
        limits.max_message_size = max;
    }

    let response =
        Client::with_limits(&cli.server, limits).and_then(|mut client| client.query(&cli.args));

    match response {
        Ok(response) => {
            println!("{}", format_response(&response));
            if response.status == Status::Error {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("framekv-cli: {e}");
            ExitCode::FAILURE
        }
    }
}
