use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::aggregator::{StreamOutcome, StreamState, Update};
use super::preferences::Preferences;
use super::sources::{self, Source};
use crate::llm::CancelHandle;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("choose your preferences first with `/genealogy start`")]
    MissingPreferences,
    #[error("preferences are already set for this session; use `/genealogy restart` to change them")]
    PreferencesLocked,
    #[error("please type a question")]
    EmptyQuestion,
    #[error("still answering your previous question; please wait for it to finish")]
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    pub sources: Option<Vec<Source>>,
    pub is_streaming: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            sources: None,
            is_streaming: false,
            created_at: Utc::now(),
        }
    }
}

/// Addresses the in-flight model message of one exchange.
///
/// Only valid while the session epoch is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exchange {
    pub epoch: u64,
    pub index: usize,
}

/// One user's conversation: preferences, transcript and in-flight state.
#[derive(Debug, Default)]
pub struct Session {
    preferences: Option<Preferences>,
    transcript: Vec<ChatMessage>,
    epoch: u64,
    in_flight: Option<(Exchange, Option<CancelHandle>)>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preferences(&self) -> Option<&Preferences> {
        self.preferences.as_ref()
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_streaming(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Lock in preferences and post the greeting.
    pub fn submit_preferences(
        &mut self,
        preferences: Preferences,
    ) -> Result<&ChatMessage, SessionError> {
        if self.preferences.is_some() {
            return Err(SessionError::PreferencesLocked);
        }

        info!(
            website = %preferences.website,
            style = %preferences.answer_style,
            "Preferences submitted"
        );
        self.transcript
            .push(ChatMessage::new(Role::Model, preferences.greeting()));
        self.preferences = Some(preferences);
        Ok(&self.transcript[self.transcript.len() - 1])
    }

    /// Suggested starter questions, offered only before the first question.
    pub fn suggestions(&self) -> Option<Vec<String>> {
        let prefs = self.preferences.as_ref()?;
        if self.transcript.len() != 1 || self.is_streaming() {
            return None;
        }
        Some(prefs.suggested_prompts())
    }

    /// Append the user question and an empty streaming placeholder.
    ///
    /// A second exchange while one is open is rejected, not queued.
    pub fn begin_exchange(&mut self, question: &str) -> Result<Exchange, SessionError> {
        if self.preferences.is_none() {
            return Err(SessionError::MissingPreferences);
        }
        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::EmptyQuestion);
        }
        if self.in_flight.is_some() {
            return Err(SessionError::Busy);
        }

        self.transcript.push(ChatMessage::new(Role::User, question));
        let mut placeholder = ChatMessage::new(Role::Model, String::new());
        placeholder.is_streaming = true;
        self.transcript.push(placeholder);

        let exchange = Exchange {
            epoch: self.epoch,
            index: self.transcript.len() - 1,
        };
        self.in_flight = Some((exchange, None));
        Ok(exchange)
    }

    /// Remember how to abort the exchange's stream on restart.
    pub fn attach_cancel(&mut self, exchange: &Exchange, handle: CancelHandle) {
        if let Some((current, slot)) = &mut self.in_flight {
            if *current == *exchange {
                *slot = Some(handle);
                return;
            }
        }
        // exchange already finished or abandoned
        handle.cancel();
    }

    fn live_message(&mut self, exchange: &Exchange) -> Option<&mut ChatMessage> {
        if exchange.epoch != self.epoch {
            debug!(
                stale_epoch = exchange.epoch,
                epoch = self.epoch,
                "Dropping update from abandoned stream"
            );
            return None;
        }
        self.transcript.get_mut(exchange.index)
    }

    /// Mirror one aggregator update into the placeholder. Returns false if stale.
    ///
    /// Appends push only the new fragment; a replacement (the error
    /// substitution) overwrites the text.
    pub fn apply_update(&mut self, exchange: &Exchange, update: Update<'_>) -> bool {
        let Some(message) = self.live_message(exchange) else {
            return false;
        };

        match update {
            Update::Append { fragment, .. } => message.text.push_str(fragment),
            Update::Replace(text) => {
                message.text.clear();
                message.text.push_str(text);
            }
        }
        true
    }

    /// Close the exchange: split off sources on success, keep error text on failure.
    pub fn finish_exchange(
        &mut self,
        exchange: &Exchange,
        outcome: &StreamOutcome,
    ) -> Option<&ChatMessage> {
        if exchange.epoch != self.epoch {
            debug!(stale_epoch = exchange.epoch, "Ignoring completion of abandoned stream");
            return None;
        }
        if matches!(&self.in_flight, Some((current, _)) if current == exchange) {
            self.in_flight = None;
        }

        let message = self.transcript.get_mut(exchange.index)?;
        message.is_streaming = false;
        match outcome.state {
            StreamState::Failed => {
                message.text = outcome.text.clone();
                message.sources = None;
            }
            _ => {
                let extracted = sources::extract(&outcome.text);
                message.text = extracted.main_text;
                message.sources = (!extracted.sources.is_empty()).then_some(extracted.sources);
            }
        }
        Some(message)
    }

    /// Drop preferences and transcript and abandon any in-flight stream.
    pub fn restart(&mut self) {
        if let Some((_, Some(handle))) = self.in_flight.take() {
            handle.cancel();
        }
        self.epoch += 1;
        self.preferences = None;
        self.transcript.clear();
        info!(epoch = self.epoch, "Session restarted");
    }
}

pub type SharedSession = Arc<Mutex<Session>>;

/// Lock a session, recovering the data if a previous holder panicked.
pub fn lock(session: &SharedSession) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sessions keyed by user id.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<u64, SharedSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_create(&self, user_id: u64) -> SharedSession {
        if let Some(session) = self.sessions.read().await.get(&user_id) {
            return session.clone();
        }
        self.sessions
            .write()
            .await
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(Session::new())))
            .clone()
    }

    pub async fn get(&self, user_id: u64) -> Option<SharedSession> {
        self.sessions.read().await.get(&user_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::aggregator::StreamAggregator;
    use crate::chat::preferences::{AnswerStyle, Website};
    use crate::llm::{AnswerError, FragmentStream};
    use pretty_assertions::assert_eq;

    fn ready_session() -> Session {
        let mut session = Session::new();
        session
            .submit_preferences(Preferences::new(Website::FamilySearch, AnswerStyle::StepByStep))
            .unwrap();
        session
    }

    fn completed(text: &str) -> StreamOutcome {
        StreamOutcome {
            state: StreamState::Completed,
            text: text.to_string(),
            fragments: 1,
            error: None,
        }
    }

    #[test]
    fn test_preferences_locked_until_restart() {
        let mut session = ready_session();
        assert_eq!(session.transcript().len(), 1);
        assert_eq!(session.transcript()[0].role, Role::Model);

        let again = Preferences::new(Website::Any, AnswerStyle::Detailed);
        assert_eq!(
            session.submit_preferences(again.clone()).unwrap_err(),
            SessionError::PreferencesLocked
        );

        session.restart();
        assert!(session.preferences().is_none());
        assert!(session.transcript().is_empty());
        assert!(session.submit_preferences(again).is_ok());
    }

    #[test]
    fn test_begin_exchange_requires_preferences_and_text() {
        let mut session = Session::new();
        assert_eq!(
            session.begin_exchange("hi").unwrap_err(),
            SessionError::MissingPreferences
        );

        let mut session = ready_session();
        assert_eq!(
            session.begin_exchange("   ").unwrap_err(),
            SessionError::EmptyQuestion
        );
    }

    #[test]
    fn test_second_exchange_rejected_while_streaming() {
        let mut session = ready_session();
        let first = session.begin_exchange("Where are census records?").unwrap();
        assert_eq!(session.begin_exchange("Another?").unwrap_err(), SessionError::Busy);
        assert_eq!(session.transcript().len(), 3);

        let streaming = session.transcript().iter().filter(|m| m.is_streaming).count();
        assert_eq!(streaming, 1);

        session.finish_exchange(&first, &completed("Done."));
        assert!(session.begin_exchange("Another?").is_ok());
    }

    fn append<'a>(fragment: &'a str, full: &'a str) -> Update<'a> {
        Update::Append { fragment, full }
    }

    #[test]
    fn test_updates_append_fragment_and_error_replaces() {
        let mut session = ready_session();
        let ex = session.begin_exchange("q").unwrap();

        assert!(session.apply_update(&ex, append("Step 1", "Step 1")));
        assert!(session.apply_update(&ex, append(". Open", "Step 1. Open")));
        assert_eq!(session.transcript()[ex.index].text, "Step 1. Open");

        assert!(session.apply_update(&ex, Update::Replace("Sorry, there was an error.")));
        assert_eq!(session.transcript()[ex.index].text, "Sorry, there was an error.");
    }

    #[test]
    fn test_append_pushes_fragment_only() {
        let mut session = ready_session();
        let ex = session.begin_exchange("q").unwrap();

        // the stored text is never compared against the full text
        assert!(session.apply_update(&ex, append("abc", "unrelated")));
        assert!(session.apply_update(&ex, append("def", "also unrelated")));
        assert_eq!(session.transcript()[ex.index].text, "abcdef");
    }

    #[test]
    fn test_finish_splits_sources() {
        let mut session = ready_session();
        let ex = session.begin_exchange("q").unwrap();
        let text = "Here is your answer.\n--- Sources ---\n* **FamilySearch.org**: A primary source for vital records.";
        session.apply_update(&ex, append(text, text));

        let msg = session.finish_exchange(&ex, &completed(text)).unwrap().clone();
        assert_eq!(msg.text, "Here is your answer.");
        assert!(!msg.is_streaming);
        assert_eq!(
            msg.sources,
            Some(vec![Source {
                title: "FamilySearch.org".into(),
                explanation: "A primary source for vital records.".into(),
            }])
        );
        assert!(!session.is_streaming());
    }

    #[test]
    fn test_finish_without_sources_leaves_none() {
        let mut session = ready_session();
        let ex = session.begin_exchange("q").unwrap();
        let msg = session.finish_exchange(&ex, &completed("  Plain answer. ")).unwrap();
        assert_eq!(msg.text, "Plain answer.");
        assert_eq!(msg.sources, None);
    }

    #[test]
    fn test_failed_outcome_keeps_error_text() {
        let mut session = ready_session();
        let ex = session.begin_exchange("q").unwrap();
        let outcome = StreamOutcome::failed(AnswerError::RequestFailed("offline".into()));
        let msg = session.finish_exchange(&ex, &outcome).unwrap();
        assert_eq!(msg.text, outcome.text);
        assert!(!msg.is_streaming);
        assert!(session.begin_exchange("retry").is_ok());
    }

    #[test]
    fn test_restart_discards_late_callbacks() {
        let mut session = ready_session();
        let ex = session.begin_exchange("q").unwrap();
        session.apply_update(&ex, append("partial", "partial"));

        session.restart();
        assert!(!session.apply_update(&ex, append(" and late", "partial and late")));
        assert!(session.finish_exchange(&ex, &completed("partial and late")).is_none());
        assert!(session.transcript().is_empty());
        assert!(!session.is_streaming());
    }

    #[test]
    fn test_restart_cancels_attached_stream() {
        let mut session = ready_session();
        let ex = session.begin_exchange("q").unwrap();
        let stream = FragmentStream::from_fragments(vec![Ok("x".to_string())]);
        let handle = stream.cancel_handle();
        session.attach_cancel(&ex, handle.clone());

        session.restart();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_attach_after_finish_cancels_immediately() {
        let mut session = ready_session();
        let ex = session.begin_exchange("q").unwrap();
        session.finish_exchange(&ex, &completed("done"));

        let stream = FragmentStream::from_fragments(Vec::new());
        let handle = stream.cancel_handle();
        session.attach_cancel(&ex, handle.clone());
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_suggestions_only_before_first_question() {
        let mut session = ready_session();
        assert_eq!(session.suggestions().map(|s| s.len()), Some(3));
        session.begin_exchange("q").unwrap();
        assert!(session.suggestions().is_none());
        assert!(Session::new().suggestions().is_none());
    }

    #[tokio::test]
    async fn test_restart_mid_stream_leaves_new_transcript_untouched() {
        let shared: SharedSession = Arc::new(Mutex::new(ready_session()));
        let ex = lock(&shared).begin_exchange("q").unwrap();

        let fragments = vec![Ok("one ".to_string()), Ok("two ".to_string()), Ok("three".to_string())];
        let stream = FragmentStream::from_fragments(fragments);
        let session = shared.clone();

        let outcome = StreamAggregator::new()
            .run(
                stream,
                |update| {
                    let mut guard = lock(&session);
                    if update.text() == "one " {
                        guard.restart();
                        guard
                            .submit_preferences(Preferences::new(Website::Any, AnswerStyle::Detailed))
                            .unwrap();
                    }
                    guard.apply_update(&ex, update);
                },
                |outcome| {
                    lock(&session).finish_exchange(&ex, outcome);
                },
            )
            .await;

        assert_eq!(outcome.text, "one two three");
        let guard = lock(&shared);
        assert_eq!(guard.transcript().len(), 1);
        assert_eq!(
            guard.transcript()[0].text,
            Preferences::new(Website::Any, AnswerStyle::Detailed).greeting()
        );
        assert!(!guard.is_streaming());
    }

    #[tokio::test]
    async fn test_session_store_reuses_sessions() {
        let store = SessionStore::new();
        let a = store.get_or_create(7).await;
        let b = store.get_or_create(7).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert!(store.get(8).await.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_session_store_lookup_does_not_create() {
        let store = SessionStore::new();
        for _ in 0..3 {
            assert!(store.get(42).await.is_none());
        }
        assert_eq!(store.len().await, 0);

        store.get_or_create(42).await;
        assert!(store.get(42).await.is_some());
        assert_eq!(store.len().await, 1);
    }
}
