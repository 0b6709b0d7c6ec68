//! Secure echo server.
//!
//! Generates a self-signed identity at startup and echoes every request
//! until interrupted.

use std::net::TcpListener;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use log::{error, info};

use seclink::{Config, IdentityConfig, KeyAlgorithm, SerialPolicy, Server};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Key {
    Rsa2048,
    Rsa3072,
    Rsa4096,
    P256,
    P384,
}

impl Key {
    fn algorithm(self) -> (KeyAlgorithm, usize) {
        match self {
            Key::Rsa2048 => (KeyAlgorithm::Rsa, 2048),
            Key::Rsa3072 => (KeyAlgorithm::Rsa, 3072),
            Key::Rsa4096 => (KeyAlgorithm::Rsa, 4096),
            Key::P256 => (KeyAlgorithm::Ecdsa, 256),
            Key::P384 => (KeyAlgorithm::Ecdsa, 384),
        }
    }
}

#[derive(Parser)]
#[command(name = "seclink-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to listen on
    port: u16,

    /// Subject CN of the generated certificate
    #[arg(long, default_value = "localhost")]
    subject: String,

    /// Certificate validity in seconds
    #[arg(long, default_value_t = 31_536_000)]
    validity_secs: u64,

    /// Key type of the generated identity
    #[arg(long, value_enum, default_value = "rsa2048")]
    key: Key,

    /// Random certificate serial instead of the fixed serial 1
    #[arg(long)]
    random_serial: bool,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_secs()
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), seclink::Error> {
    let (algorithm, bits) = cli.key.algorithm();
    let serial = if cli.random_serial {
        SerialPolicy::Random
    } else {
        SerialPolicy::default()
    };

    let identity = IdentityConfig::default()
        .with_subject(cli.subject.clone())
        .with_validity(Duration::from_secs(cli.validity_secs))
        .with_key(algorithm, bits)
        .with_serial(serial);

    let config = Config::builder().identity(identity).build()?;
    let server = Server::new(Arc::new(config))?;

    info!(
        "Certificate fingerprint {}",
        server.identity().certificate().fingerprint_str()
    );

    let listener = TcpListener::bind(("0.0.0.0", cli.port))?;
    server.serve_tcp(listener)
}
