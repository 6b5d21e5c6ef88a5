use std::sync::Arc;

use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};

use super::aggregator::{StreamAggregator, StreamOutcome, Update};
use super::preferences::Preferences;
use super::prompts::{self, SYSTEM_DIRECTIVE};
use super::session::{lock, Exchange, SessionError, SharedSession};
use crate::llm::{AnswerClient, AnswerError};

#[derive(Debug, Error)]
pub enum StartError {
    /// The AI service is not usable; chatting stays blocked.
    #[error(transparent)]
    Initialization(#[from] AnswerError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// What the front-end shows once preferences are accepted.
#[derive(Debug, Clone)]
pub struct StartReply {
    pub greeting: String,
    pub suggestions: Vec<String>,
}

/// An answer being streamed into the session in the background.
pub struct PendingAnswer {
    pub exchange: Exchange,
    pub task: JoinHandle<StreamOutcome>,
}

/// Drives question/answer exchanges for sessions against one [`AnswerClient`].
pub struct Assistant {
    client: Arc<AnswerClient>,
}

impl Assistant {
    pub fn new(client: Arc<AnswerClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &AnswerClient {
        &self.client
    }

    /// Accept preferences, but only once the AI service can be reached.
    pub async fn start(
        &self,
        session: &SharedSession,
        preferences: Preferences,
    ) -> Result<StartReply, StartError> {
        self.client.ensure_ready().await?;

        let mut session = lock(session);
        let greeting = session.submit_preferences(preferences)?.text.clone();
        Ok(StartReply {
            greeting,
            suggestions: session.suggestions().unwrap_or_default(),
        })
    }

    /// Record the question and stream the answer into the session.
    ///
    /// Every failure after the exchange begins ends up as message text;
    /// only session-level rejections are returned as errors.
    pub fn ask(&self, session: &SharedSession, question: &str) -> Result<PendingAnswer, SessionError> {
        let (exchange, prompt) = {
            let mut guard = lock(session);
            let exchange = guard.begin_exchange(question)?;
            let prompt = guard
                .preferences()
                .map(|prefs| prompts::compose(question.trim(), prefs))
                .ok_or(SessionError::MissingPreferences)?;
            (exchange, prompt)
        };

        info!(
            epoch = exchange.epoch,
            question_len = question.len(),
            "Question submitted"
        );

        let client = self.client.clone();
        let session = session.clone();
        let task = tokio::spawn(async move {
            let stream = match client.submit(&prompt, SYSTEM_DIRECTIVE).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "Answer request failed");
                    return fail_exchange(&session, &exchange, e);
                }
            };

            lock(&session).attach_cancel(&exchange, stream.cancel_handle());

            StreamAggregator::new()
                .run(
                    stream,
                    |update| {
                        lock(&session).apply_update(&exchange, update);
                    },
                    |outcome| {
                        lock(&session).finish_exchange(&exchange, outcome);
                    },
                )
                .await
        });

        Ok(PendingAnswer { exchange, task })
    }
}

/// Close `exchange` with the error text in place of the answer.
fn fail_exchange(session: &SharedSession, exchange: &Exchange, error: AnswerError) -> StreamOutcome {
    let outcome = StreamOutcome::failed(error);
    let mut guard = lock(session);
    guard.apply_update(exchange, Update::Replace(&outcome.text));
    guard.finish_exchange(exchange, &outcome);
    outcome
}

/// Resolve a joined answer task. A task that panicked or was aborted never
/// closed its exchange, so it is closed here as failed.
pub fn settle(
    session: &SharedSession,
    exchange: &Exchange,
    joined: Result<StreamOutcome, JoinError>,
) -> StreamOutcome {
    match joined {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "Answer task aborted");
            fail_exchange(
                session,
                exchange,
                AnswerError::StreamInterrupted(format!("answer task ended: {}", e)),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::aggregator::StreamState;
    use crate::chat::preferences::{AnswerStyle, Website};
    use crate::chat::session::{Role, Session};
    use crate::llm::testing::ScriptedGenerator;
    use crate::llm::TextGenerator;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn assistant(generator: ScriptedGenerator) -> Assistant {
        let generator: Arc<dyn TextGenerator> = Arc::new(generator);
        Assistant::new(Arc::new(AnswerClient::new(move || Ok(generator.clone()))))
    }

    fn shared() -> SharedSession {
        Arc::new(Mutex::new(Session::new()))
    }

    fn prefs() -> Preferences {
        Preferences::new(Website::Ancestry, AnswerStyle::Detailed)
    }

    #[tokio::test]
    async fn test_start_then_ask_streams_answer_with_sources() {
        let assistant = assistant(ScriptedGenerator::replying(&[
            "Search the 1850 ",
            "census.\n--- Sources ---\n",
            "* **Ancestry.com**: Indexed federal census images.",
        ]));
        let session = shared();

        let reply = assistant.start(&session, prefs()).await.unwrap();
        assert!(reply.greeting.contains("for Ancestry.com"));
        assert_eq!(reply.suggestions.len(), 3);

        let pending = assistant.ask(&session, "  Where is the 1850 census? ").unwrap();
        let outcome = pending.task.await.unwrap();
        assert_eq!(outcome.state, StreamState::Completed);

        let guard = lock(&session);
        let transcript = guard.transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[1].role, Role::User);
        assert_eq!(transcript[1].text, "Where is the 1850 census?");
        assert_eq!(transcript[2].text, "Search the 1850 census.");
        assert_eq!(transcript[2].sources.as_ref().map(|s| s.len()), Some(1));
        assert!(!transcript[2].is_streaming);
    }

    #[tokio::test]
    async fn test_start_blocked_when_service_unavailable() {
        let client = AnswerClient::new(|| {
            Err(AnswerError::ServiceUnavailable("GEMINI_API_KEY is not set".into()))
        });
        let assistant = Assistant::new(Arc::new(client));
        let session = shared();

        let err = assistant.start(&session, prefs()).await.unwrap_err();
        assert!(matches!(err, StartError::Initialization(AnswerError::ServiceUnavailable(_))));
        assert!(lock(&session).preferences().is_none());
    }

    #[tokio::test]
    async fn test_request_failure_becomes_message_text() {
        let assistant = assistant(ScriptedGenerator {
            script: vec![],
            reject_with: Some(AnswerError::RequestFailed("network down".into())),
        });
        let session = shared();
        assistant.start(&session, prefs()).await.unwrap();

        let outcome = assistant.ask(&session, "q").unwrap().task.await.unwrap();
        assert!(outcome.is_failed());

        let guard = lock(&session);
        let last = guard.transcript().last().unwrap();
        assert_eq!(
            last.text,
            "Sorry, there was an error. An error occurred: request failed: network down"
        );
        assert!(!last.is_streaming);
        assert!(!guard.is_streaming());
    }

    #[tokio::test]
    async fn test_ask_rejected_while_answer_in_flight() {
        let assistant = assistant(ScriptedGenerator::replying(&["ok"]));
        let session = shared();
        assistant.start(&session, prefs()).await.unwrap();

        // The current-thread test runtime does not poll the spawned task
        // until we await, so the first exchange is still open here.
        let first = assistant.ask(&session, "first").unwrap();
        assert!(matches!(assistant.ask(&session, "second"), Err(SessionError::Busy)));
        assert_eq!(lock(&session).transcript().len(), 3);

        first.task.await.unwrap();
        assert!(assistant.ask(&session, "third").is_ok());
    }

    #[tokio::test]
    async fn test_aborted_task_frees_session() {
        let session = shared();
        let exchange = {
            let mut guard = lock(&session);
            guard.submit_preferences(prefs()).unwrap();
            guard.begin_exchange("q").unwrap()
        };

        let task = tokio::spawn(std::future::pending::<StreamOutcome>());
        task.abort();
        let joined = task.await;
        assert!(joined.is_err());

        let outcome = settle(&session, &exchange, joined);
        assert!(outcome.is_failed());

        let guard = lock(&session);
        assert!(!guard.is_streaming());
        let last = guard.transcript().last().unwrap();
        assert!(!last.is_streaming);
        assert!(last.text.starts_with("Sorry, there was an error."));
        drop(guard);

        let assistant = assistant(ScriptedGenerator::replying(&["ok"]));
        assert!(assistant.ask(&session, "again").is_ok());
    }
}
