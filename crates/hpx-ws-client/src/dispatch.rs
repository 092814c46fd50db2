//! Delivery of inbound messages.
//!
//! The reader task awaits [`Dispatcher::fire`] before it reads the next
//! message, so a dispatcher sees messages strictly in arrival order and a slow
//! dispatcher applies backpressure to the socket.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{connection::Connection, message::InboundMessage};

/// Receives every message parsed by a connection's reader task.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn fire(&self, message: InboundMessage, source: &Connection);
}

type Subscriber = Arc<dyn Fn(&InboundMessage, &Connection) + Send + Sync>;

/// Synchronous callbacks run one after another on the reader task.
#[derive(Clone, Default)]
pub struct Subscribers {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(&InboundMessage, &Connection) + Send + Sync + 'static,
    {
        self.subscribers.write().push(Arc::new(subscriber));
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }
}

impl fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("count", &self.len())
            .finish()
    }
}

#[async_trait]
impl Dispatcher for Subscribers {
    async fn fire(&self, message: InboundMessage, source: &Connection) {
        // Snapshot so a callback may subscribe without deadlocking.
        let subscribers = self.subscribers.read().clone();
        for subscriber in &subscribers {
            subscriber(&message, source);
        }
    }
}

#[async_trait]
impl Dispatcher for mpsc::UnboundedSender<InboundMessage> {
    async fn fire(&self, message: InboundMessage, source: &Connection) {
        if self.send(message).is_err() {
            debug!(connection = %source.id(), "message receiver dropped");
        }
    }
}

/// Waits for capacity, so a full channel pauses the reader task.
#[async_trait]
impl Dispatcher for mpsc::Sender<InboundMessage> {
    async fn fire(&self, message: InboundMessage, source: &Connection) {
        if self.send(message).await.is_err() {
            debug!(connection = %source.id(), "message receiver dropped");
        }
    }
}
