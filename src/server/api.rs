//! WebSocket endpoint.
//!
//! One route, `/{code}`. The session is validated and loaded before the
//! upgrade completes, so a client that names a session with no snapshot
//! on disk is refused with a plain HTTP 404 and never gets a socket.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    Router,
    extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    extract::{Path as UrlPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::model::{Model, Update};
use crate::server::registry::{Registry, SessionHandle};
use crate::session::SessionCode;
use crate::storage::Store;

/// Bind and serve. The data root must already be initialized.
pub async fn serve<M: Model>(port: u16, bind: &str, root: &Path) -> Result<()> {
    let listener = TcpListener::bind(format!("{bind}:{port}")).await?;
    serve_on::<M>(listener, root).await
}

/// Serve on an already-bound listener. Tests bind port 0 and read the
/// local address back before calling this.
pub async fn serve_on<M: Model>(listener: TcpListener, root: &Path) -> Result<()> {
    let store = Arc::new(Store::open(root)?);
    let registry = Registry::new(store);

    let app = Router::new()
        .route("/{code}", get(ws_handler::<M>))
        .with_state(registry);

    tracing::info!(addr = %listener.local_addr()?, root = %root.display(), "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_handler<M: Model>(
    UrlPath(code): UrlPath<String>,
    State(registry): State<Arc<Registry<M>>>,
    ws: WebSocketUpgrade,
) -> Response {
    let code: SessionCode = match code.parse() {
        Ok(code) => code,
        Err(err) => {
            tracing::warn!("refusing connection: {err}");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    match registry.attach(&code).await {
        Ok(session) => ws.on_upgrade(move |socket| handle_socket(socket, session)),
        Err(err) => {
            tracing::warn!(%code, "refusing connection: {err}");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

async fn handle_socket<M: Model>(socket: WebSocket, session: Arc<SessionHandle<M>>) {
    let conn = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    // Frames for this connection are queued by the session actor; the
    // first one is always the snapshot.
    let (tx, mut rx) = mpsc::unbounded_channel::<Utf8Bytes>();
    session.subscribe(conn, tx);

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        // Channel closed: either the connection is going away or the
        // session kicked it. Complete the close handshake.
        let _ = sender.close().await;
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let parsed = serde_json::from_str::<Update>(text.as_str())
                    .map_err(anyhow::Error::from)
                    .and_then(|update| {
                        let mutation = M::decode(&update)?;
                        Ok((update, mutation))
                    });
                match parsed {
                    Ok((update, mutation)) => session.update(conn, text, update, mutation),
                    Err(err) => {
                        tracing::warn!(code = %session.code(), %conn, "protocol violation: {err}");
                        break;
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!(code = %session.code(), %conn, "protocol violation: binary frame");
                break;
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(_) => break,
        }
    }

    session.unsubscribe(conn);
    send_task.abort();
}
