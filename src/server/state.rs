use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::websocket::UpgradeController;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub controller: Arc<UpgradeController>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings, controller: Arc<UpgradeController>) -> Self {
        Self {
            settings: Arc::new(settings),
            controller,
            start_time: Instant::now(),
        }
    }
}
