//! Two clients sharing one counter session against an embedded server.
//!
//! Run with: cargo run --example counter

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use lockstep::{DecodeError, Model, Store, Update};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Counter {
    count: i64,
}

#[derive(Debug, Clone)]
enum CounterMutation {
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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    Store::init(root.path())?;
    Store::open(root.path())?.create::<Counter>(&"demo".parse()?)?;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server_root = root.path().to_path_buf();
    tokio::spawn(async move {
        if let Err(err) = lockstep::serve_on::<Counter>(listener, &server_root).await {
            eprintln!("server stopped: {err:#}");
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let url = format!("ws://{addr}/demo");
    let alice = lockstep::connect::<Counter>(&url).await?;
    let bob = lockstep::connect::<Counter>(&url).await?;
    println!("both start at {}", alice.read(|c| c.count));

    alice.mutate(&CounterMutation::Increment(2))?;
    println!(
        "alice immediately after sending: {}",
        alice.read(|c| c.count)
    );

    alice.wait_revision(1).await?;
    bob.wait_revision(1).await?;
    println!("after the echo, alice sees {}", alice.read(|c| c.count));
    println!("bob sees {}", bob.read(|c| c.count));

    bob.mutate(&CounterMutation::Increment(40))?;
    alice.wait_revision(2).await?;
    println!("alice converges on {}", alice.read(|c| c.count));

    // One commit per mutation, inspectable with plain git.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let store = Store::open(root.path())?;
    for entry in store.entries(&"demo".parse()?, 10)? {
        println!("commit {}: {}", entry.id, entry.message.replace('\n', " "));
    }

    Ok(())
}
