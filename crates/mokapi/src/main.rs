use clap::Parser;
use mokapi::api::ApiServer;
use mokapi::cli::{Args, StaticConfig};
use mokapi::dynamic::{ConfigWatcher, FileProvider};
use mokapi::runtime::App;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let skeleton = args.generate_cli_skeleton.clone();

    let config = match args.into_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(path) = skeleton {
        return match write_skeleton(&config, &path) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    if let Err(e) = mokapi::logging::init(&config.log) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn write_skeleton(config: &StaticConfig, path: &str) -> anyhow::Result<()> {
    let yaml = config.skeleton()?;
    if path == "-" {
        print!("{yaml}");
    } else {
        std::fs::write(path, yaml)?;
    }
    Ok(())
}

async fn run(config: StaticConfig) -> anyhow::Result<()> {
    let app = App::new(config.store_sizes());
    info!("starting mokapi {}", app.version);

    for provider in config.unsupported_providers() {
        warn!("{} provider is not supported, ignoring its settings", provider);
    }
    if config.api.dashboard {
        info!("dashboard assets are not bundled, serving the API only");
    }

    let (shutdown, _) = broadcast::channel::<()>(1);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));
    let api = ApiServer::bind(addr, Arc::clone(&app), &config.api.path)
        .await
        .map_err(|e| anyhow::anyhow!("unable to start API on {}: {}", addr, e))?;
    let api_task = tokio::spawn(api.run(shutdown.subscribe()));

    let mut watcher = ConfigWatcher::new();
    if !config.providers.file.is_empty() {
        watcher.add_provider(Arc::new(FileProvider::new((&config.providers.file).into())));
    }
    watcher.add_listener(app.clone());
    let watcher_task = tokio::spawn(watcher.run(shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    let _ = shutdown.send(());
    app.shutdown();
    let _ = api_task.await;
    let _ = watcher_task.await;
    Ok(())
}
