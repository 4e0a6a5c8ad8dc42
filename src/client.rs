use crate::controller::{self, StreamCanceller, StreamHandle};
use crate::error::{ChatError, StoreError};
use crate::probe::{self, Endpoint};
use crate::provider::{ChatRequest, FragmentStream};
use crate::selector::{self, ProviderSettings};
use crate::store::TranscriptStore;
use crate::types::{
    now_millis, Attachment, Message, MessageId, ModelDescriptor, Role, Session, SessionId,
};
use futures_util::stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Front door for the UI layer: sessions, sending, stopping, model lists.
#[derive(Debug)]
pub struct ChatClient {
    http: reqwest::Client,
    store: TranscriptStore,
    active: Mutex<HashMap<SessionId, Slot>>,
    probe_timeout: Duration,
}

#[derive(Debug)]
enum Slot {
    /// A `send` has passed its checks and is still preparing the request.
    Reserved,
    Running(StreamCanceller),
}

/// Holds a session's `Slot::Reserved` until the stream starts.
/// Dropping it unstarted (error return, cancelled future) frees the session.
struct Reservation<'a> {
    active: &'a Mutex<HashMap<SessionId, Slot>>,
    session: SessionId,
    armed: bool,
}

impl Reservation<'_> {
    fn commit(mut self, canceller: StreamCanceller) {
        self.armed = false;
        self.active.lock().insert(self.session, Slot::Running(canceller));
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut active = self.active.lock();
        if matches!(active.get(&self.session), Some(Slot::Reserved)) {
            active.remove(&self.session);
        }
    }
}

impl ChatClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_store(http, TranscriptStore::new())
    }

    pub fn with_store(http: reqwest::Client, store: TranscriptStore) -> Self {
        Self {
            http,
            store,
            active: Mutex::new(HashMap::new()),
            probe_timeout: probe::QUICK_TIMEOUT,
        }
    }

    /// Budget for the health check that precedes each local-provider send.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn store(&self) -> &TranscriptStore {
        &self.store
    }

    pub fn new_session(&self, model_id: impl Into<String>) -> Session {
        self.store.create_session(model_id)
    }

    /// Models of the effective provider. Empty on any failure.
    pub async fn list_models(&self, settings: &ProviderSettings) -> Vec<ModelDescriptor> {
        match selector::select(&self.http, settings) {
            Ok(provider) => provider.list_models().await,
            Err(e) => {
                tracing::warn!(error = %e, "cannot list models");
                Vec::new()
            }
        }
    }

    /// Health-check the effective provider's configured endpoint.
    pub async fn probe(&self, settings: &ProviderSettings, timeout: Duration) -> Option<Endpoint> {
        let kind = settings.effective_provider();
        probe::probe(&self.http, kind, settings.endpoint(kind), timeout).await
    }

    /// Append `content` as a user turn and start streaming the reply.
    ///
    /// Validation problems (no model, transcript shape, missing credentials)
    /// return an error before the session is touched. An unreachable local
    /// server still produces a reply, consisting of the error text.
    pub async fn send(
        &self,
        session: SessionId,
        content: &str,
        attachments: Vec<Attachment>,
        model: Option<&str>,
        settings: &ProviderSettings,
    ) -> Result<StreamHandle, ChatError> {
        let (current, reservation) = self.reserve(session)?;

        let model = match model.filter(|m| !m.trim().is_empty()) {
            Some(m) => m.to_string(),
            None if !current.model_id.trim().is_empty() => current.model_id.clone(),
            None => self
                .list_models(settings)
                .await
                .into_iter()
                .next()
                .map(|m| m.id)
                .unwrap_or_default(),
        };

        let kind = settings.effective_provider();
        let configured = settings.endpoint(kind);
        let mut unreachable = None;
        let endpoint = if kind.is_local() {
            match probe::probe(&self.http, kind, configured, self.probe_timeout).await {
                Some(ep) => {
                    if ep.reachability == probe::Reachability::Unauthorized {
                        tracing::warn!(
                            provider = %kind,
                            endpoint = %ep.url,
                            "server wants different credentials"
                        );
                    }
                    ep.url
                }
                None => {
                    unreachable = Some(ChatError::Unreachable {
                        provider: kind,
                        message: format!("no server answering at {configured}"),
                    });
                    configured.to_string()
                }
            }
        } else {
            configured.to_string()
        };

        let provider = selector::build(&self.http, settings, kind, &endpoint)?;

        let mut messages = self.store.transcript(session)?;
        messages.push(Message {
            id: MessageId(0),
            role: Role::User,
            content: content.to_string(),
            timestamp: now_millis(),
            attachments: attachments.clone(),
            is_thinking: false,
        });
        let req = ChatRequest {
            model: model.clone(),
            system_prompt: settings.system_prompt.clone(),
            messages,
            attachments: attachments.clone(),
        };
        // Validates; nothing is sent until the stream is polled.
        let fragments = provider.stream_chat(req)?;
        let fragments: FragmentStream = match unreachable {
            Some(e) => {
                drop(fragments);
                Box::pin(stream::once(async move { Err::<String, ChatError>(e) }))
            }
            None => fragments,
        };

        if current.model_id != model {
            self.store.set_model(session, model.clone())?;
        }
        self.store.append_user_message(session, content, attachments)?;
        let placeholder = self.store.append_placeholder(session)?;
        tracing::info!(%session, provider = %kind, %model, "generation started");

        let handle = controller::start(self.store.clone(), session, placeholder, fragments);
        reservation.commit(handle.canceller());
        Ok(handle)
    }

    /// Claim `session` for one `send`. Checked and taken under one lock so
    /// two sends racing on the same session cannot both get through.
    fn reserve(&self, session: SessionId) -> Result<(Session, Reservation<'_>), ChatError> {
        let mut active = self.active.lock();
        let current = self
            .store
            .session(session)
            .ok_or(StoreError::UnknownSession(session))?;
        if current.is_streaming() || matches!(active.get(&session), Some(Slot::Reserved)) {
            return Err(StoreError::AlreadyStreaming(session).into());
        }
        active.insert(session, Slot::Reserved);
        Ok((
            current,
            Reservation {
                active: &self.active,
                session,
                armed: true,
            },
        ))
    }

    /// Cancel the in-flight generation of `session`, if any.
    ///
    /// Returns whether a generation was actually running.
    pub fn stop(&self, session: SessionId) -> bool {
        let canceller = {
            let mut active = self.active.lock();
            if !matches!(active.get(&session), Some(Slot::Running(_))) {
                return false;
            }
            match active.remove(&session) {
                Some(Slot::Running(canceller)) => canceller,
                _ => return false,
            }
        };
        let streaming = self
            .store
            .session(session)
            .is_some_and(|s| s.is_streaming());
        canceller.cancel();
        tracing::debug!(%session, streaming, "generation stopped");
        streaming
    }
}
