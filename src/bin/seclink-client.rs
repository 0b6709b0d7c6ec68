//! Secure echo client. Sends one message and prints the response.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::error;

use seclink::{Config, PeerVerification};

#[derive(Parser)]
#[command(name = "seclink-client")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server host
    host: String,

    /// Server port
    port: u16,

    /// Message to send
    message: String,

    /// Require the server certificate to carry this subject CN
    #[arg(long)]
    verify_name: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_secs()
        .init();

    match run(&cli) {
        Ok(response) => {
            println!("Received: {}", String::from_utf8_lossy(&response));
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<Vec<u8>, seclink::Error> {
    let verification = match &cli.verify_name {
        Some(name) => PeerVerification::SubjectName(name.clone()),
        None => PeerVerification::Disabled,
    };

    let config = Config::builder().peer_verification(verification).build()?;
    seclink::exchange(&cli.host, cli.port, cli.message.as_bytes(), Arc::new(config))
}
