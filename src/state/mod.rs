pub mod hub;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    dao::score_store::ScoreStore,
    metrics::HttpMetrics,
    services::{
        chat_service::{ChatHandler, ChatLog},
        scoreboard_service::ScoreboardHandler,
    },
};

use self::hub::Hub;

pub type SharedState = Arc<AppState>;

/// Central application state: the score store and the two connection hubs.
pub struct AppState {
    store: Arc<dyn ScoreStore>,
    config: Arc<AppConfig>,
    scoreboard: Hub,
    chat: Hub,
    chat_log: Arc<ChatLog>,
    metrics: HttpMetrics,
}

impl AppState {
    /// Build the state and start both hub loops. Must run inside a Tokio runtime.
    pub fn new(store: Arc<dyn ScoreStore>, config: AppConfig) -> SharedState {
        let chat_log = Arc::new(ChatLog::default());
        let chat = Hub::spawn(
            "chat",
            config.chat.clone(),
            Arc::new(ChatHandler::new(chat_log.clone(), config.chat.edit_window)),
        );
        let scoreboard = Hub::spawn(
            "scoreboard",
            config.scoreboard.clone(),
            Arc::new(ScoreboardHandler::new(store.clone(), config.publish_timeout)),
        );

        Arc::new(Self {
            store,
            config: Arc::new(config),
            scoreboard,
            chat,
            chat_log,
            metrics: HttpMetrics::default(),
        })
    }

    pub fn store(&self) -> &Arc<dyn ScoreStore> {
        &self.store
    }

    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    /// Hub grouping live scoreboard sessions by event id.
    pub fn scoreboard_hub(&self) -> &Hub {
        &self.scoreboard
    }

    /// Hub grouping chat sessions by room id.
    pub fn chat_hub(&self) -> &Hub {
        &self.chat
    }

    pub fn chat_log(&self) -> &Arc<ChatLog> {
        &self.chat_log
    }

    pub fn metrics(&self) -> &HttpMetrics {
        &self.metrics
    }
}
