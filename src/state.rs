use std::sync::Arc;

use crate::chat::assistant::Assistant;
use crate::chat::session::{SessionStore, SharedSession};

pub struct AppState {
    pub assistant: Arc<Assistant>,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(assistant: Arc<Assistant>) -> Self {
        Self {
            assistant,
            sessions: SessionStore::new(),
        }
    }

    /// The caller's session, created on first use.
    pub async fn session_for(&self, user_id: u64) -> SharedSession {
        self.sessions.get_or_create(user_id).await
    }
}

pub type Context<'a> = poise::Context<'a, AppState, anyhow::Error>;
