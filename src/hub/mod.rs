//! Subscription Hub (`spec.md` §2 component L / §4.H).
//!
//! A single-writer actor: all hub state (`topics`, `clients`,
//! `client_topics`) is owned exclusively by the task running [`run`];
//! everyone else talks to it over [`HubHandle`]'s request channel. Ported
//! 1:1 from `original_source/.../handler/websocket/hub.go`'s
//! `Hub.Run()` `select` loop.

pub mod client;

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;

use crate::message::{Topic, BROADCAST_ALL};

pub type ClientId = u64;

const CLIENT_QUEUE_CAPACITY: usize = 256;

enum HubRequest {
    Join {
        id: ClientId,
        initial_topics: Vec<Topic>,
        sender: mpsc::Sender<String>,
    },
    Leave {
        id: ClientId,
    },
    Subscribe {
        id: ClientId,
        topic: Topic,
    },
    Unsubscribe {
        id: ClientId,
        topic: Topic,
    },
    Broadcast {
        topic: Topic,
        message: String,
    },
}

/// Cloneable, cheap-to-share front for the hub actor. Every producer
/// (dispatcher handlers, client read pumps) holds one of these rather than
/// any direct reference to hub state.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubRequest>,
    next_id: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl HubHandle {
    pub fn next_client_id(&self) -> ClientId {
        self.next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    /// Join the hub, returning the receiver the client's write pump should
    /// drain. `initial_topics` is applied by the hub before the client can
    /// miss anything (`spec.md` §4.H "re-register c's initial topics").
    pub async fn join(&self, id: ClientId, initial_topics: Vec<Topic>) -> mpsc::Receiver<String> {
        let (sender, receiver) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let _ = self
            .tx
            .send(HubRequest::Join {
                id,
                initial_topics,
                sender,
            })
            .await;
        receiver
    }

    pub async fn leave(&self, id: ClientId) {
        let _ = self.tx.send(HubRequest::Leave { id }).await;
    }

    pub async fn subscribe(&self, id: ClientId, topic: Topic) {
        let _ = self.tx.send(HubRequest::Subscribe { id, topic }).await;
    }

    pub async fn unsubscribe(&self, id: ClientId, topic: Topic) {
        let _ = self.tx.send(HubRequest::Unsubscribe { id, topic }).await;
    }

    /// Broadcast is the one request producers (dispatcher handler tasks)
    /// send at volume; `spec.md` §5 specifies these channels are
    /// unbuffered and callers are already bounded upstream (the
    /// dispatcher's `max_in_flight`), so a plain `send` here is correct —
    /// it is still never a blocking *data-plane* path to a client, only to
    /// the single hub task.
    pub async fn broadcast(&self, topic: impl Into<Topic>, message: String) {
        let _ = self
            .tx
            .send(HubRequest::Broadcast {
                topic: topic.into(),
                message,
            })
            .await;
    }
}

/// Spawn the hub actor task and return a handle to it.
pub fn spawn() -> HubHandle {
    let (tx, rx) = mpsc::channel(1024);
    tokio::spawn(run(rx));
    HubHandle {
        tx,
        next_id: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(1)),
    }
}

async fn run(mut rx: mpsc::Receiver<HubRequest>) {
    let mut topics: HashMap<Topic, HashSet<ClientId>> = HashMap::new();
    let mut clients: HashMap<ClientId, mpsc::Sender<String>> = HashMap::new();
    let mut client_topics: HashMap<ClientId, HashSet<Topic>> = HashMap::new();

    while let Some(request) = rx.recv().await {
        match request {
            HubRequest::Join {
                id,
                initial_topics,
                sender,
            } => {
                clients.insert(id, sender);
                for topic in initial_topics {
                    subscribe_topic(&mut topics, &mut client_topics, id, topic);
                }
                tracing::debug!(client_id = id, "client joined hub");
            }
            HubRequest::Leave { id } => {
                if let Some(subscribed) = client_topics.remove(&id) {
                    for topic in subscribed {
                        unsubscribe_topic_entry(&mut topics, &topic, id);
                    }
                }
                clients.remove(&id);
                tracing::debug!(client_id = id, "client left hub");
            }
            HubRequest::Subscribe { id, topic } => {
                subscribe_topic(&mut topics, &mut client_topics, id, topic);
            }
            HubRequest::Unsubscribe { id, topic } => {
                unsubscribe_topic_entry(&mut topics, &topic, id);
                if let Some(subscribed) = client_topics.get_mut(&id) {
                    subscribed.remove(&topic);
                    if subscribed.is_empty() {
                        client_topics.remove(&id);
                    }
                }
            }
            HubRequest::Broadcast { topic, message } => {
                broadcast(&topics, &clients, &topic, &message);
            }
        }
    }
}

fn subscribe_topic(
    topics: &mut HashMap<Topic, HashSet<ClientId>>,
    client_topics: &mut HashMap<ClientId, HashSet<Topic>>,
    id: ClientId,
    topic: Topic,
) {
    topics.entry(topic.clone()).or_default().insert(id);
    client_topics.entry(id).or_default().insert(topic);
}

fn unsubscribe_topic_entry(topics: &mut HashMap<Topic, HashSet<ClientId>>, topic: &str, id: ClientId) {
    if let Some(members) = topics.get_mut(topic) {
        members.remove(&id);
        if members.is_empty() {
            topics.remove(topic);
        }
    }
}

fn broadcast(
    topics: &HashMap<Topic, HashSet<ClientId>>,
    clients: &HashMap<ClientId, mpsc::Sender<String>>,
    topic: &str,
    message: &str,
) {
    let Some(members) = topics.get(topic) else {
        return;
    };

    for &id in members {
        let Some(sender) = clients.get(&id) else {
            tracing::warn!(client_id = id, topic, "broadcast target not registered");
            continue;
        };

        match sender.try_send(message.to_string()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::info!(client_id = id, topic, "client send queue full, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(client_id = id, topic, "client send queue closed, dropping message");
            }
        }
    }
}

/// Initial topic set applied to every joining client (Open Question 1,
/// resolved in DESIGN.md — every client starts subscribed to the sentinel
/// broadcast topic).
pub fn default_initial_topics() -> Vec<Topic> {
    vec![BROADCAST_ALL.to_string()]
}
