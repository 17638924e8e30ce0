use tracing::{error, info};

use cairn::{Application, Config};

#[tokio::main]
async fn main() {
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    if let Err(e) = cairn::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        cairn::logging::init_console_only(&config.logging.level);
    }

    info!("Cairn - hierarchical resource storage");
    info!("Metadata database: {}", config.database.path);

    let app = match Application::open(config).await {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    app.run_startup_jobs().await;
    let runners = app.spawn_scheduled_jobs();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown requested");

    for runner in runners {
        runner.abort();
    }
    app.shutdown().await;
}
