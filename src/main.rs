use anyhow::Result;
use script2video::core::config::Config;
use script2video::core::io::{NativeStorage, Storage};
use script2video::services::catalog::Catalog;
use script2video::services::heygen::create_video_service;
use script2video::services::session::Session;
use script2video::ui::{ensure_api_key, App};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with your HeyGen settings.");
            return Err(e);
        }
    };

    config.ensure_directories()?;
    ensure_api_key(&mut config)?;

    let service = create_video_service(&config)?;
    let cache: Arc<dyn Storage> = Arc::new(NativeStorage::new(&config.cache_folder));
    let output: Arc<dyn Storage> = Arc::new(NativeStorage::new(&config.output_folder));

    let catalog = Catalog::new(service.clone(), cache);
    let session = Session::new(service, Duration::from_millis(config.polling.interval_ms));

    let mut app = App::new(config, session, catalog, output);
    app.run().await?;

    Ok(())
}
