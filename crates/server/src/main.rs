use std::process::ExitCode;

use micro_ota::storage::FileStorage;
use micro_ota_server::{PushOtaServer, config};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

const EXIT_UNCHANGED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match config::load(None) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("pushota: {e}");
            return ExitCode::FAILURE;
        }
    };

    let level = config.log_level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let storage = &config.storage;
    let storage = match FileStorage::open(&storage.dir, storage.slots.as_slice(), storage.slot_capacity, storage.version.clone()).await {
        Ok(storage) => storage,
        Err(e) => {
            error!(cause = %e, "failed to open slot directory");
            return ExitCode::FAILURE;
        }
    };

    let server = match PushOtaServer::builder()
        .config(config)
        .storage(storage)
        .on_connect(|| info!("client connected, starting transfer"))
        .build()
    {
        Ok(server) => server,
        Err(e) => {
            error!(cause = %e, "failed to build server");
            return ExitCode::FAILURE;
        }
    };

    match server.serve().await {
        Ok(outcome) if outcome.is_restart_safe() => {
            info!(?outcome, "safe to restart");
            ExitCode::SUCCESS
        }
        Ok(outcome) => {
            info!(?outcome, "nothing to restart for");
            ExitCode::from(EXIT_UNCHANGED)
        }
        Err(e) => {
            error!(cause = %e, "push ota failed");
            ExitCode::FAILURE
        }
    }
}
