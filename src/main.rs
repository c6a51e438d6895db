use anyhow::Result;
use log::{error, info, warn};
use std::sync::Arc;

use namewarden::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("Starting Namewarden v{}", namewarden::VERSION);

    let config_path = BotConfiguration::path_from_env();
    let config = BotConfiguration::load_or_create(&config_path).await;

    let twitch_config = match TwitchConfig::from_env() {
        Ok(twitch_config) => twitch_config,
        Err(e) => {
            error!("Twitch credentials are missing: {:#}", e);
            return Err(e);
        }
    };

    let channels = config.resolve_channels(&twitch_config.channels);
    if channels.is_empty() {
        warn!(
            "No channels configured; set TWITCH_CHANNELS or list channels in {}",
            config_path.display()
        );
    }

    let directory: Option<Arc<dyn AccountDirectory>> =
        match HelixConfig::from_env(&twitch_config.oauth_token, &config.block_reason) {
            Some(helix_config) => Some(Arc::new(HelixClient::new(helix_config))),
            None => {
                warn!("TWITCH_CLIENT_ID not set, accounts will be banned in chat but not blocked");
                None
            }
        };

    let engine = ModerationBot::load_engine(&config).await;

    let twitch = Arc::new(TwitchConnection::new(twitch_config));
    let bot = ModerationBot::new(config, engine, twitch.clone(), twitch, directory);

    if let Err(e) = bot.run(&channels).await {
        error!("Moderation bot stopped with an error: {:#}", e);
        return Err(e);
    }

    info!("Namewarden shut down cleanly");
    Ok(())
}
