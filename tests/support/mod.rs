#![allow(dead_code)]

use axum::Router;
use llmchat::{Message, Role, SessionId, TranscriptStore};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Serve `app` on an ephemeral localhost port and return its base URL.
pub async fn spawn_server(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server listener");
    let address: SocketAddr = listener.local_addr().expect("mock listener local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("run mock server");
    });
    format!("http://{address}")
}

/// A port nothing listens on (bound once, then released).
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{address}")
}

/// A server that accepts connections and never answers.
pub async fn silent_server_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{address}")
}

/// Build a transcript through the store, the way the client does.
pub fn transcript(turns: &[(Role, &str)]) -> (TranscriptStore, SessionId, Vec<Message>) {
    let store = TranscriptStore::new();
    let session = store.create_session("test-model");
    for (role, text) in turns {
        match role {
            Role::User => {
                store
                    .append_user_message(session.id, *text, Vec::new())
                    .expect("append user");
            }
            _ => {
                let id = store.append_placeholder(session.id).expect("placeholder");
                store.append_to_message(session.id, id, text);
                store.finalize_message(session.id, id, None).expect("finalize");
            }
        }
    }
    let messages = store.transcript(session.id).expect("transcript");
    (store, session.id, messages)
}

pub fn http() -> reqwest::Client {
    reqwest::Client::new()
}
