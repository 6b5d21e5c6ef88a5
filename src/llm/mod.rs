pub mod gemini;
pub mod sse;

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::{AbortHandle, Abortable, BoxStream};
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use gemini::{GeminiClient, GeminiConfig};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnswerError {
    /// The generator could not be constructed (missing or invalid credential).
    #[error("AI service unavailable: {0}")]
    ServiceUnavailable(String),
    /// The call was rejected before any fragment was produced.
    #[error("request failed: {0}")]
    RequestFailed(String),
    /// The stream opened but broke before completing.
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
}

impl AnswerError {
    /// Text substituted into the transcript in place of the answer.
    pub fn user_message(&self) -> String {
        format!("Sorry, there was an error. An error occurred: {}", self)
    }
}

/// One incremental chunk of generated text, or the error that ended the stream.
pub type Fragment = Result<String, AnswerError>;

pub type BoxFragmentStream = BoxStream<'static, Fragment>;

/// The remote text-generation call.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Open a streaming generation for `prompt` under `system_directive`.
    async fn generate(
        &self,
        prompt: &str,
        system_directive: &str,
    ) -> Result<BoxFragmentStream, AnswerError>;

    /// Short identifier used in logs (e.g. the model name).
    fn name(&self) -> &str;
}

/// Cancels the [`FragmentStream`] it was taken from. Cloneable and thread-safe.
#[derive(Debug, Clone)]
pub struct CancelHandle(AbortHandle);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_aborted()
    }
}

/// Lazy, single-pass fragment sequence. Ends early once cancelled.
pub struct FragmentStream {
    inner: Abortable<BoxFragmentStream>,
    handle: AbortHandle,
}

impl FragmentStream {
    pub fn new(inner: BoxFragmentStream) -> Self {
        let (handle, registration) = AbortHandle::new_pair();
        Self {
            inner: Abortable::new(inner, registration),
            handle,
        }
    }

    /// Wrap an in-memory sequence; used for canned replies and tests.
    pub fn from_fragments<I>(fragments: I) -> Self
    where
        I: IntoIterator<Item = Fragment>,
        I::IntoIter: Send + 'static,
    {
        Self::new(futures::stream::iter(fragments).boxed())
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.handle.clone())
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_aborted()
    }
}

impl Stream for FragmentStream {
    type Item = Fragment;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for FragmentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentStream")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Lifecycle of the lazily constructed generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitState {
    /// No construction attempted yet.
    Pending,
    Initializing,
    Ready,
    /// Last attempt failed; the next call retries.
    Failed(String),
}

impl fmt::Display for InitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitState::Pending => f.write_str("not yet connected"),
            InitState::Initializing => f.write_str("connecting"),
            InitState::Ready => f.write_str("ready"),
            InitState::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

type GeneratorFactory =
    Box<dyn Fn() -> Result<Arc<dyn TextGenerator>, AnswerError> + Send + Sync>;

/// Owns the single remote generator, built on first use.
///
/// A failed construction leaves the cell empty so a later call can succeed
/// once configuration is available.
pub struct AnswerClient {
    factory: GeneratorFactory,
    generator: OnceCell<Arc<dyn TextGenerator>>,
    state: Mutex<InitState>,
}

impl AnswerClient {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn TextGenerator>, AnswerError> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            generator: OnceCell::new(),
            state: Mutex::new(InitState::Pending),
        }
    }

    /// Gemini-backed client configured from the environment on first use.
    pub fn from_env() -> Self {
        Self::new(|| {
            let config = GeminiConfig::from_env()?;
            let client = GeminiClient::new(config)?;
            Ok(Arc::new(client) as Arc<dyn TextGenerator>)
        })
    }

    pub fn init_state(&self) -> InitState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn set_state(&self, next: InitState) {
        match self.state.lock() {
            Ok(mut s) => *s = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Construct the generator if needed and return it.
    pub async fn ensure_ready(&self) -> Result<Arc<dyn TextGenerator>, AnswerError> {
        self.generator
            .get_or_try_init(|| async {
                self.set_state(InitState::Initializing);
                match (self.factory)() {
                    Ok(generator) => {
                        info!(generator = generator.name(), "Text generator initialized");
                        self.set_state(InitState::Ready);
                        Ok(generator)
                    }
                    Err(e) => {
                        warn!(error = %e, "Text generator initialization failed");
                        self.set_state(InitState::Failed(e.to_string()));
                        Err(e)
                    }
                }
            })
            .await
            .cloned()
    }

    /// Open a fragment stream for one prompt. No retries.
    pub async fn submit(
        &self,
        prompt: &str,
        system_directive: &str,
    ) -> Result<FragmentStream, AnswerError> {
        let generator = self.ensure_ready().await?;
        debug!(
            generator = generator.name(),
            prompt_len = prompt.len(),
            "Submitting prompt"
        );
        let inner = generator.generate(prompt, system_directive).await?;
        Ok(FragmentStream::new(inner))
    }
}
