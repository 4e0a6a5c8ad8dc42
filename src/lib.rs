//! Multi-provider streaming chat core.
//!
//! One capability trait ([`provider::Provider`]) with three adapters (a local
//! OpenAI-compatible server, Ollama, Gemini), a bounded-time prober for the
//! local ones, and a stream controller that drains an adapter's fragments
//! into a shared [`store::TranscriptStore`] under a cancel handle.

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod paths;
pub mod probe;
pub mod provider;
pub mod selector;
pub mod store;
pub mod types;

pub use client::ChatClient;
pub use controller::{StreamHandle, StreamOutcome, StreamState};
pub use error::{ChatError, StoreError};
pub use selector::ProviderSettings;
pub use store::{StoreEvent, TranscriptStore};
pub use types::{
    Attachment, AttachmentKind, Message, MessageId, ModelDescriptor, ProviderKind, Role, Session,
    SessionId,
};
