#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use lockstep::{DecodeError, Model, Store, Update};

/// Minimal single-field model: state `{"count": N}`, one mutation
/// `increment(by)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CounterMutation {
    Increment(i64),
}

impl Model for Counter {
    type Snapshot = Counter;
    type Mutation = CounterMutation;

    fn init() -> Self {
        Self::default()
    }

    fn save(&self) -> Counter {
        self.clone()
    }

    fn load(snapshot: Counter) -> Self {
        snapshot
    }

    fn decode(update: &Update) -> Result<CounterMutation, DecodeError> {
        match update.name.as_str() {
            "increment" => {
                let (by,) = update.parse_args()?;
                Ok(CounterMutation::Increment(by))
            }
            _ => Err(update.unknown()),
        }
    }

    fn encode(mutation: &CounterMutation) -> Update {
        match mutation {
            CounterMutation::Increment(by) => Update::new("increment", vec![json!(by)]),
        }
    }

    fn apply(&mut self, mutation: &CounterMutation) {
        match mutation {
            CounterMutation::Increment(by) => self.count += by,
        }
    }
}

/// Initialize a data root and provision sessions in it.
pub fn seed<M: Model>(root: &Path, codes: &[&str]) {
    Store::init(root).unwrap();
    let store = Store::open(root).unwrap();
    for code in codes {
        store.create::<M>(&code.parse().unwrap()).unwrap();
    }
}

/// Serve the data root on an ephemeral port.
pub async fn start_server<M: Model>(root: &Path) -> (SocketAddr, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let root = root.to_path_buf();
    let server = tokio::spawn(async move {
        let _ = lockstep::serve_on::<M>(listener, &root).await;
    });
    sleep(Duration::from_millis(50)).await;
    (addr, server)
}

pub fn ws_url(addr: SocketAddr, code: &str) -> String {
    format!("ws://{addr}/{code}")
}

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Socket on the accepting side, used by tests that play the server.
pub type ServerWs = WebSocketStream<TcpStream>;

/// Open a raw socket to a session, without the client agent.
pub async fn raw_connect(addr: SocketAddr, code: &str) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(ws_url(addr, code))
        .await
        .expect("ws connect");
    ws
}

/// Next text frame, with a bounded wait.
pub async fn next_text(ws: &mut Ws) -> String {
    use futures::StreamExt;
    loop {
        let msg = timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended while waiting for a frame")
            .expect("ws error while waiting for a frame");
        match msg {
            Message::Text(text) => return text.to_string(),
            _ => continue,
        }
    }
}

/// Send one text frame.
pub async fn send_text(ws: &mut Ws, text: &str) {
    use futures::SinkExt;
    ws.send(Message::Text(text.to_string().into()))
        .await
        .expect("ws send");
}

/// Wait until the server ends the connection, with a bounded wait.
pub async fn wait_close(ws: &mut Ws) {
    use futures::StreamExt;
    let end = timeout(Duration::from_secs(3), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(end.is_ok(), "connection was not closed by the server");
}
