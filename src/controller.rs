//! Lifetime of one in-flight generation.
//!
//! A stream controller drains an adapter's fragment stream into a single
//! placeholder message, then finalizes it. It is the only writer to that
//! message while the message is thinking.

use crate::error::ChatError;
use crate::provider::FragmentStream;
use crate::store::TranscriptStore;
use crate::types::{MessageId, SessionId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Not started.
    Idle,
    /// Adapter invoked, no fragment yet.
    Requesting,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StreamState::Completed | StreamState::Cancelled | StreamState::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    /// Stopped by the user. Partial content stays; no diagnostic is added.
    Cancelled,
    /// Transport failed. One diagnostic fragment was appended.
    Failed,
}

impl From<StreamOutcome> for StreamState {
    fn from(o: StreamOutcome) -> Self {
        match o {
            StreamOutcome::Completed => StreamState::Completed,
            StreamOutcome::Cancelled => StreamState::Cancelled,
            StreamOutcome::Failed => StreamState::Failed,
        }
    }
}

/// Cloneable cancel handle. Cancelling twice, or after completion, does nothing.
#[derive(Debug, Clone)]
pub struct StreamCanceller(CancellationToken);

impl StreamCanceller {
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

#[derive(Debug)]
pub struct StreamHandle {
    session: SessionId,
    message: MessageId,
    cancel: CancellationToken,
    state: watch::Receiver<StreamState>,
    task: JoinHandle<StreamOutcome>,
}

impl StreamHandle {
    pub fn session_id(&self) -> SessionId {
        self.session
    }

    /// The placeholder message this stream writes into.
    pub fn message_id(&self) -> MessageId {
        self.message
    }

    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn canceller(&self) -> StreamCanceller {
        StreamCanceller(self.cancel.clone())
    }

    /// Watch state transitions (for UIs that poll rather than await).
    pub fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.state.clone()
    }

    /// Resolves exactly once, after the message has been finalized.
    pub async fn wait(self) -> StreamOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(session = %self.session, error = %e, "stream task aborted");
                StreamOutcome::Failed
            }
        }
    }
}

/// Spawn a task that applies `stream` to `message` in `session`.
///
/// The placeholder must already exist. Must be called from within a tokio runtime.
pub fn start(
    store: TranscriptStore,
    session: SessionId,
    message: MessageId,
    mut stream: FragmentStream,
) -> StreamHandle {
    let cancel = CancellationToken::new();
    let (state_tx, state_rx) = watch::channel(StreamState::Idle);
    state_tx.send_replace(StreamState::Requesting);

    let token = cancel.clone();
    let task = tokio::spawn(async move {
        let mut fragments = 0usize;
        let outcome = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break StreamOutcome::Cancelled,
                item = stream.next() => match item {
                    Some(Ok(text)) => {
                        if fragments == 0 {
                            state_tx.send_replace(StreamState::Streaming);
                        }
                        fragments += 1;
                        store.append_to_message(session, message, &text);
                    }
                    Some(Err(e)) => {
                        apply_failure(&store, session, message, &e);
                        break StreamOutcome::Failed;
                    }
                    None => break StreamOutcome::Completed,
                },
            }
        };
        // Dropping the stream closes the transport.
        drop(stream);

        if let Err(e) = store.finalize_message(session, message, None) {
            tracing::warn!(%session, %message, error = %e, "could not finalize message");
        }
        tracing::debug!(%session, %message, fragments, ?outcome, "stream finished");
        state_tx.send_replace(outcome.into());
        outcome
    });

    StreamHandle {
        session,
        message,
        cancel,
        state: state_rx,
        task,
    }
}

fn apply_failure(store: &TranscriptStore, session: SessionId, message: MessageId, e: &ChatError) {
    tracing::warn!(%session, %message, error = %e, "generation failed");
    let diagnostic = e.diagnostic();
    let empty = store
        .message(session, message)
        .is_some_and(|m| m.content.is_empty());
    let text = if empty { diagnostic.trim_start() } else { diagnostic.as_str() };
    store.append_to_message(session, message, text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderKind;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    type Tx = mpsc::Sender<Result<String, ChatError>>;

    fn scripted() -> (Tx, FragmentStream) {
        let (tx, rx) = mpsc::channel(16);
        (tx, Box::pin(ReceiverStream::new(rx)))
    }

    fn placeholder(store: &TranscriptStore) -> (SessionId, MessageId) {
        let s = store.create_session("m");
        store.append_user_message(s.id, "hi", Vec::new()).unwrap();
        let p = store.append_placeholder(s.id).unwrap();
        (s.id, p)
    }

    async fn wait_for_content(store: &TranscriptStore, s: SessionId, m: MessageId, want: &str) {
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            loop {
                if store.message(s, m).map(|m| m.content) == Some(want.to_string()) {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("content never arrived");
    }

    #[tokio::test]
    async fn fragments_are_concatenated_in_order() {
        let store = TranscriptStore::new();
        let (s, p) = placeholder(&store);
        let (tx, stream) = scripted();
        let handle = start(store.clone(), s, p, stream);
        assert_eq!(handle.state(), StreamState::Requesting);

        for part in ["The ", "quick ", "fox"] {
            tx.send(Ok(part.to_string())).await.unwrap();
        }
        drop(tx);

        assert_eq!(handle.wait().await, StreamOutcome::Completed);
        let m = store.message(s, p).unwrap();
        assert_eq!(m.content, "The quick fox");
        assert!(!m.is_thinking);
    }

    #[tokio::test]
    async fn cancel_keeps_partial_content_and_is_idempotent() {
        let store = TranscriptStore::new();
        let (s, p) = placeholder(&store);
        let (tx, stream) = scripted();
        let handle = start(store.clone(), s, p, stream);

        tx.send(Ok("one ".into())).await.unwrap();
        tx.send(Ok("two".into())).await.unwrap();
        wait_for_content(&store, s, p, "one two").await;
        assert_eq!(handle.state(), StreamState::Streaming);

        handle.cancel();
        handle.cancel();
        let _ = tx.send(Ok(" three".into())).await;

        let canceller = handle.canceller();
        assert_eq!(handle.wait().await, StreamOutcome::Cancelled);
        canceller.cancel();

        let m = store.message(s, p).unwrap();
        assert_eq!(m.content, "one two");
        assert!(!m.is_thinking);
    }

    #[tokio::test]
    async fn failure_appends_one_diagnostic() {
        let store = TranscriptStore::new();
        let (s, p) = placeholder(&store);
        let (tx, stream) = scripted();
        let handle = start(store.clone(), s, p, stream);

        tx.send(Ok("partial".into())).await.unwrap();
        tx.send(Err(ChatError::stream(ProviderKind::Ollama, "connection reset")))
            .await
            .unwrap();

        let mut states = handle.subscribe();
        assert_eq!(handle.wait().await, StreamOutcome::Failed);
        assert_eq!(*states.borrow_and_update(), StreamState::Failed);

        let m = store.message(s, p).unwrap();
        assert_eq!(
            m.content,
            "partial\n\n[Error: ollama stream failed: connection reset]"
        );
        assert!(!m.is_thinking);
    }

    #[tokio::test]
    async fn failure_before_any_fragment_has_no_leading_blank_lines() {
        let store = TranscriptStore::new();
        let (s, p) = placeholder(&store);
        let (tx, stream) = scripted();
        let handle = start(store.clone(), s, p, stream);
        tx.send(Err(ChatError::stream(ProviderKind::Foundry, "HTTP 500")))
            .await
            .unwrap();
        assert_eq!(handle.wait().await, StreamOutcome::Failed);
        assert_eq!(
            store.message(s, p).unwrap().content,
            "[Error: foundry stream failed: HTTP 500]"
        );
    }

    #[tokio::test]
    async fn cancel_after_completion_is_a_no_op() {
        let store = TranscriptStore::new();
        let (s, p) = placeholder(&store);
        let (tx, stream) = scripted();
        let handle = start(store.clone(), s, p, stream);
        let canceller = handle.canceller();
        tx.send(Ok("done".into())).await.unwrap();
        drop(tx);
        assert_eq!(handle.wait().await, StreamOutcome::Completed);

        canceller.cancel();
        assert!(canceller.is_cancelled());
        assert_eq!(store.message(s, p).unwrap().content, "done");
    }
}
