//! Session/transcript store.
//!
//! All mutation goes through the narrow operation set below, keyed by session
//! and message id. Streams that outlive structural changes (new messages,
//! new sessions) keep writing into the right place because nothing here is
//! positional.

use crate::error::StoreError;
use crate::types::{now_millis, Attachment, Message, MessageId, Role, Session, SessionId};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

const TITLE_CHARS: usize = 30;
const DEFAULT_TITLE: &str = "New Conversation";
const EVENT_CAPACITY: usize = 256;

/// Change notifications for whoever renders the transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    SessionCreated(SessionId),
    MessageAppended {
        session: SessionId,
        message: MessageId,
    },
    MessageUpdated {
        session: SessionId,
        message: MessageId,
        fragment: String,
    },
    MessageFinalized {
        session: SessionId,
        message: MessageId,
    },
}

#[derive(Debug, Default)]
struct Inner {
    /// Most recently created first.
    sessions: Vec<Session>,
    current: Option<SessionId>,
    next_id: u64,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn session_mut(&mut self, id: SessionId) -> Result<&mut Session, StoreError> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::UnknownSession(id))
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptStore {
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, ev: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(ev);
    }

    /// Create an empty session, put it at the front and make it current.
    pub fn create_session(&self, model_id: impl Into<String>) -> Session {
        let session = {
            let mut inner = self.inner.lock();
            let id = SessionId(inner.next_id());
            let session = Session {
                id,
                title: DEFAULT_TITLE.to_string(),
                messages: Vec::new(),
                created_at: now_millis(),
                model_id: model_id.into(),
            };
            inner.sessions.insert(0, session.clone());
            inner.current = Some(id);
            session
        };
        tracing::debug!(session = %session.id, "session created");
        self.emit(StoreEvent::SessionCreated(session.id));
        session
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.inner.lock().sessions.clone()
    }

    pub fn session(&self, id: SessionId) -> Option<Session> {
        self.inner.lock().sessions.iter().find(|s| s.id == id).cloned()
    }

    pub fn message(&self, session: SessionId, message: MessageId) -> Option<Message> {
        let inner = self.inner.lock();
        let s = inner.sessions.iter().find(|s| s.id == session)?;
        s.messages.iter().find(|m| m.id == message).cloned()
    }

    pub fn current(&self) -> Option<SessionId> {
        self.inner.lock().current
    }

    pub fn set_current(&self, id: SessionId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.session_mut(id)?;
        inner.current = Some(id);
        Ok(())
    }

    /// Change the model a session routes to. Title and messages are untouched.
    pub fn set_model(&self, id: SessionId, model_id: impl Into<String>) -> Result<(), StoreError> {
        self.inner.lock().session_mut(id)?.model_id = model_id.into();
        Ok(())
    }

    /// Messages of a session, excluding any in-flight placeholder.
    pub fn transcript(&self, id: SessionId) -> Result<Vec<Message>, StoreError> {
        let mut inner = self.inner.lock();
        let s = inner.session_mut(id)?;
        Ok(s.messages.iter().filter(|m| !m.is_thinking).cloned().collect())
    }

    /// Append a user message. The first one in a session also sets its title.
    pub fn append_user_message(
        &self,
        session: SessionId,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<MessageId, StoreError> {
        let content = content.into();
        let id = {
            let mut inner = self.inner.lock();
            let id = MessageId(inner.next_id());
            let s = inner.session_mut(session)?;
            if s.messages.is_empty() {
                s.title = content.chars().take(TITLE_CHARS).collect();
            }
            s.messages.push(Message {
                id,
                role: Role::User,
                content,
                timestamp: now_millis(),
                attachments,
                is_thinking: false,
            });
            id
        };
        self.emit(StoreEvent::MessageAppended {
            session,
            message: id,
        });
        Ok(id)
    }

    /// Append an empty model message marked as thinking.
    ///
    /// At most one placeholder may be in flight per session.
    pub fn append_placeholder(&self, session: SessionId) -> Result<MessageId, StoreError> {
        let id = {
            let mut inner = self.inner.lock();
            let id = MessageId(inner.next_id());
            let s = inner.session_mut(session)?;
            if s.is_streaming() {
                return Err(StoreError::AlreadyStreaming(session));
            }
            s.messages.push(Message {
                id,
                role: Role::Model,
                content: String::new(),
                timestamp: now_millis(),
                attachments: Vec::new(),
                is_thinking: true,
            });
            id
        };
        self.emit(StoreEvent::MessageAppended {
            session,
            message: id,
        });
        Ok(id)
    }

    /// Append a fragment to an in-flight message.
    ///
    /// Returns false (and changes nothing) if the session or message is gone
    /// or the message was already finalized.
    pub fn append_to_message(
        &self,
        session: SessionId,
        message: MessageId,
        fragment: &str,
    ) -> bool {
        let applied = {
            let mut inner = self.inner.lock();
            match inner
                .session_mut(session)
                .ok()
                .and_then(|s| s.messages.iter_mut().find(|m| m.id == message))
            {
                Some(m) if m.is_thinking => {
                    m.content.push_str(fragment);
                    true
                }
                _ => false,
            }
        };
        if applied {
            self.emit(StoreEvent::MessageUpdated {
                session,
                message,
                fragment: fragment.to_string(),
            });
        }
        applied
    }

    /// Clear the thinking flag, optionally replacing the content.
    pub fn finalize_message(
        &self,
        session: SessionId,
        message: MessageId,
        content_override: Option<String>,
    ) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.lock();
            let m = inner
                .session_mut(session)?
                .messages
                .iter_mut()
                .find(|m| m.id == message)
                .ok_or(StoreError::UnknownMessage { session, message })?;
            if let Some(content) = content_override {
                m.content = content;
            }
            m.is_thinking = false;
        }
        self.emit(StoreEvent::MessageFinalized { session, message });
        Ok(())
    }
}
