use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tiller::config::ConfigStore;
use tiller::engine::Engine;
use tiller::{credentials, logging, EngineError};
use tracing::{error, info};

const EXIT_STARTUP_FAULT: u8 = 1;
const EXIT_INVALID_CONFIG: u8 = 2;
const EXIT_ENCRYPT_FAILED: u8 = 3;

/// Signal-driven autonomous spot trading engine.
#[derive(Debug, Parser)]
#[command(name = "tiller", version, about)]
struct Cli {
    /// Configuration directory.
    #[arg(long, default_value = "config")]
    config: PathBuf,

    /// Emit JSON logs instead of the human-readable format.
    #[arg(long)]
    json_logs: bool,

    /// Record live ticker & signal snapshots under this directory.
    #[arg(long)]
    record: Option<PathBuf>,

    /// Replay a recorded snapshot directory instead of trading live.
    #[arg(long)]
    replay: Option<PathBuf>,

    /// One-shot: write an encrypted exchange-credentials blob and exit.
    #[arg(long, requires = "path", requires = "publickey", requires = "privatekey")]
    encrypt: bool,

    /// Output file for the encrypted credentials blob.
    #[arg(long)]
    path: Option<PathBuf>,

    /// Exchange API public key.
    #[arg(long)]
    publickey: Option<String>,

    /// Exchange API private key.
    #[arg(long)]
    privatekey: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.json_logs {
        logging::init_json_logging();
    } else {
        logging::init_logging();
    }

    if cli.encrypt {
        return run_encrypt(&cli);
    }

    run_engine(cli)
}

fn run_encrypt(cli: &Cli) -> ExitCode {
    let (Some(path), Some(publickey), Some(privatekey)) =
        (&cli.path, &cli.publickey, &cli.privatekey)
    else {
        // clap `requires` guards this; defensive exit keeps the contract
        error!("--encrypt requires --path, --publickey and --privatekey");
        return ExitCode::from(EXIT_ENCRYPT_FAILED);
    };

    match credentials::seal_to_file(path, publickey, privatekey) {
        Ok(()) => {
            info!(path = %path.display(), "credentials blob written");
            ExitCode::SUCCESS
        }
        Err(seal_error) => {
            error!(%seal_error, "credentials encryption failed");
            ExitCode::from(EXIT_ENCRYPT_FAILED)
        }
    }
}

fn run_engine(cli: Cli) -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(runtime_error) => {
            error!(%runtime_error, "failed to start async runtime");
            return ExitCode::from(EXIT_STARTUP_FAULT);
        }
    };

    runtime.block_on(async move {
        let config = match ConfigStore::load(&cli.config) {
            Ok(config) => Arc::new(config),
            Err(config_error) => {
                error!(%config_error, "configuration invalid");
                return ExitCode::from(EXIT_INVALID_CONFIG);
            }
        };

        let mut builder = Engine::builder(Arc::clone(&config));
        if let Some(record_root) = &cli.record {
            builder = builder.with_recording(record_root);
        }
        if let Some(replay_root) = &cli.replay {
            builder = builder.with_replay(replay_root);
        }

        let engine = match builder.build() {
            Ok(engine) => Arc::new(engine),
            Err(build_error @ EngineError::Configuration(_)) => {
                error!(%build_error, "engine configuration invalid");
                return ExitCode::from(EXIT_INVALID_CONFIG);
            }
            Err(build_error) => {
                error!(%build_error, "engine failed to start");
                return ExitCode::from(EXIT_STARTUP_FAULT);
            }
        };

        // ctrl-c requests a cooperative shutdown through the root token
        let token = engine.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                token.cancel();
            }
        });

        match engine.run().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(run_error) => {
                error!(%run_error, "engine terminated with fault");
                ExitCode::from(EXIT_STARTUP_FAULT)
            }
        }
    })
}
