// This is where we will define the core application and all the related things
// on how to startup the application

use once_cell::sync::OnceCell;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    fmt,
    prelude::*,
};

use crate::repo::state::StateSource;

use super::{
    config::configuration::Configuration,
    logging::tracing::{tracing_subscribe, tracing_subscribe_with_console},
};

static LOGGER_INSTALLED: OnceCell<bool> = OnceCell::new();

#[derive(Debug, Clone)]
pub struct Application {
    pub config: Configuration,
}

impl Application {
    pub async fn initialize(config: Configuration) -> Self {
        Self { config }
    }

    /// `console` selects between the daemon's file-only subscriber and the
    /// client's file-plus-stderr one; see `application::logging::tracing`.
    pub fn install_logging(state: &StateSource, console: bool) {
        if let Some(true) = LOGGER_INSTALLED.get() {
            return;
        }

        let installed = if console { tracing_subscribe_with_console(state) } else { tracing_subscribe(state) };
        if !installed {
            warn!("Failed to install tracing_subscriber. There's probably one already...");
        };

        if color_eyre::install().is_err() {
            warn!("Failed to install color-eyre. Oh well...");
        };

        LOGGER_INSTALLED.set(true).unwrap();
    }
}
