use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use mensa_menu::api;
use mensa_menu::logging::init_logger;
use mensa_menu::{
    Config, HttpDocumentSource, LocationStore, MenuAssembler, MenuExtractor, SystemClock,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Invalid configuration")?;
    init_logger(config.log_format);

    let source = HttpDocumentSource::new(&config.source).context("Building HTTP client")?;
    let extractor = MenuExtractor::new().context("Compiling menu selectors")?;
    let clock = Arc::new(SystemClock);

    let assembler = MenuAssembler::new(
        Arc::new(source),
        Arc::new(extractor),
        clock.clone(),
        config.source.base_url.clone(),
    );
    let store = Arc::new(LocationStore::new(
        Arc::new(assembler),
        &config.store,
        clock,
    ));

    info!(
        "Menu ttl {:?}, allergen ttl {:?}, source {}",
        config.store.menu_ttl, config.store.allergens_ttl, config.source.base_url
    );
    api::serve(store, config.port)
        .await
        .context("Server error")?;

    Ok(())
}
