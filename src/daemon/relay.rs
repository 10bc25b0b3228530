//! Bridges one generate stream to one client event stream.
//!
//! Frames go out as soon as they arrive. The response text and the latest
//! context are accumulated on the side and committed to the session store once
//! the downstream stream ends cleanly. A failed or abandoned stream commits
//! nothing.

use crate::daemon::llm::{GenerationEvent, StreamLine};
use crate::protocol::StreamFrame;
use crate::store::{Role, SessionStore};
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// The assistant turn being assembled from stream lines.
#[derive(Debug, Default)]
struct TurnAccumulator {
    text: String,
    context: Option<Value>,
}

impl TurnAccumulator {
    fn absorb(&mut self, line: &StreamLine) {
        if let Some(fragment) = &line.response {
            self.text.push_str(fragment);
        }
        if let Some(context) = &line.context {
            self.context = Some(context.clone());
        }
    }
}

pub struct StreamRelay {
    store: Arc<SessionStore>,
    session_id: String,
}

impl StreamRelay {
    pub fn new(store: Arc<SessionStore>, session_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
        }
    }

    /// Consume `events`, yielding the frames to send to the client.
    ///
    /// Dropping the returned stream drops `events` with it, which releases the
    /// downstream connection.
    pub fn relay<S>(self, events: S) -> impl Stream<Item = StreamFrame> + Send + 'static
    where
        S: Stream<Item = GenerationEvent> + Send + 'static,
    {
        let Self { store, session_id } = self;

        async_stream::stream! {
            let mut events = Box::pin(events);
            let mut turn = TurnAccumulator::default();

            while let Some(event) = events.next().await {
                match event {
                    GenerationEvent::Line(line) => {
                        if line.done {
                            debug!("Ollama finished generating for session {}", session_id);
                        }
                        turn.absorb(&line);
                        yield StreamFrame::Relayed(line.raw);
                    }
                    GenerationEvent::Context(context) => {
                        turn.context = Some(context);
                    }
                    GenerationEvent::Failed(e) => {
                        warn!("Generation for session {} failed: {}", session_id, e);
                        yield StreamFrame::Error(e.to_string());
                        return;
                    }
                }
            }

            let session_id = if turn.text.is_empty() {
                session_id
            } else {
                debug!("Storing {} bytes of response for session {}", turn.text.len(), session_id);
                store
                    .append(&session_id, Role::Assistant, turn.text, turn.context)
                    .await
            };
            yield StreamFrame::Session(session_id);
        }
    }
}
