use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::llm::{AnswerError, Fragment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
    Completed,
    /// Ended by an error; the text holds the user-facing error message.
    Failed,
}

/// What changed in the aggregated text, passed to `on_update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update<'a> {
    /// `fragment` was appended; `full` is the text so far.
    Append { fragment: &'a str, full: &'a str },
    /// The text was replaced wholesale by the error message.
    Replace(&'a str),
}

impl<'a> Update<'a> {
    /// The full text after this update.
    pub fn text(&self) -> &'a str {
        match *self {
            Update::Append { full, .. } => full,
            Update::Replace(text) => text,
        }
    }
}

/// Final result of one aggregation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    pub state: StreamState,
    pub text: String,
    pub fragments: usize,
    pub error: Option<AnswerError>,
}

impl StreamOutcome {
    /// Outcome for a request that failed before any stream existed.
    pub fn failed(error: AnswerError) -> Self {
        Self {
            state: StreamState::Failed,
            text: error.user_message(),
            fragments: 0,
            error: Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.state == StreamState::Failed
    }
}

/// Folds a fragment stream into one growing message.
#[derive(Debug)]
pub struct StreamAggregator {
    state: StreamState,
    text: String,
    fragments: usize,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self {
            state: StreamState::Idle,
            text: String::new(),
            fragments: 0,
        }
    }

    /// Consume `stream` to the end.
    ///
    /// `on_update` receives an [`Update::Append`] for every non-empty fragment,
    /// and one [`Update::Replace`] with the error text if the stream fails.
    /// `on_end` runs exactly once, after the last update, on every path.
    pub async fn run<S, U, E>(mut self, stream: S, mut on_update: U, on_end: E) -> StreamOutcome
    where
        S: Stream<Item = Fragment>,
        U: FnMut(Update<'_>),
        E: FnOnce(&StreamOutcome),
    {
        futures::pin_mut!(stream);
        self.state = StreamState::Streaming;
        let mut error = None;

        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    self.text.push_str(&fragment);
                    self.fragments += 1;
                    on_update(Update::Append {
                        fragment: &fragment,
                        full: &self.text,
                    });
                }
                Err(e) => {
                    warn!(fragments = self.fragments, error = %e, "Answer stream failed");
                    self.text = e.user_message();
                    self.state = StreamState::Failed;
                    on_update(Update::Replace(&self.text));
                    error = Some(e);
                    break;
                }
            }
        }

        if self.state == StreamState::Streaming {
            self.state = StreamState::Completed;
            info!(
                fragments = self.fragments,
                final_len = self.text.len(),
                "Answer stream completed"
            );
        }
        debug!(state = ?self.state, "Aggregation finished");

        let outcome = StreamOutcome {
            state: self.state,
            text: self.text,
            fragments: self.fragments,
            error,
        };
        on_end(&outcome);
        outcome
    }
}
