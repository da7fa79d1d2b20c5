//! Fan-out of generated fragments to conversation listeners.
//!
//! Every conversation with a pending or recently finished reply owns a
//! response queue: the fragments emitted so far plus the channels of the
//! listeners currently attached. Pushing a fragment appends it to the queue
//! and forwards it to every listener. Subscribing takes a snapshot of the
//! queue and registers the listener under the same lock, so a late listener
//! sees every fragment exactly once and in emission order.

use crate::infrastructure::entities::ConversationId;
use di::{inject, injectable};
use log::debug;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    Error(String),
    Done,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("a response is already being generated for this conversation")]
    Busy,
}

struct Listener {
    id: u64,
    sender: mpsc::UnboundedSender<Fragment>,
}

struct ResponseQueue {
    epoch: u64,
    fragments: Vec<Fragment>,
    listeners: Vec<Listener>,
    finished: bool,
    updated_at: Instant,
}

impl ResponseQueue {
    fn new(epoch: u64) -> ResponseQueue {
        ResponseQueue {
            epoch,
            fragments: Vec::new(),
            listeners: Vec::new(),
            finished: false,
            updated_at: Instant::now(),
        }
    }
}

type Queues = Arc<Mutex<HashMap<ConversationId, ResponseQueue>>>;

#[derive(Default)]
pub struct ResponseRelay {
    queues: Queues,
    next_epoch: AtomicU64,
    next_listener_id: AtomicU64,
}

#[injectable]
impl ResponseRelay {
    #[inject]
    pub fn create() -> ResponseRelay {
        ResponseRelay::default()
    }
}

impl ResponseRelay {
    /// Starts a fresh response queue for the conversation.
    ///
    /// A finished queue is replaced; an unfinished one means a generation is
    /// still running and the call fails with [`RelayError::Busy`]. Each queue
    /// gets a new epoch, so subscriptions to the replaced one never touch it.
    pub fn open(&self, id: &ConversationId) -> Result<(), RelayError> {
        let mut queues = self.queues.lock();
        if let Some(queue) = queues.get(id) {
            if !queue.finished {
                return Err(RelayError::Busy);
            }
        }
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        queues.insert(id.clone(), ResponseQueue::new(epoch));
        Ok(())
    }

    /// Appends a fragment and forwards it to every live listener.
    pub fn push(&self, id: &ConversationId, fragment: Fragment) {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(id) else {
            debug!("dropping fragment for conversation {id} without response queue");
            return;
        };
        if queue.finished {
            debug!("dropping fragment for finished conversation {id}");
            return;
        }

        queue.finished = fragment == Fragment::Done;
        queue.updated_at = Instant::now();
        queue
            .listeners
            .retain(|listener| listener.sender.send(fragment.clone()).is_ok());
        queue.fragments.push(fragment);
    }

    /// Attaches a listener, returning `None` if the conversation has no response queue.
    pub fn subscribe(&self, id: &ConversationId) -> Option<Subscription> {
        let mut queues = self.queues.lock();
        let queue = queues.get_mut(id)?;

        let listener_id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let replay: VecDeque<Fragment> = queue.fragments.iter().cloned().collect();

        let receiver = if queue.finished {
            None
        } else {
            let (sender, receiver) = mpsc::unbounded_channel();
            queue.listeners.push(Listener {
                id: listener_id,
                sender,
            });
            Some(receiver)
        };

        Some(Subscription {
            conversation_id: id.clone(),
            epoch: queue.epoch,
            listener_id,
            replay,
            receiver,
            saw_done: false,
            queues: self.queues.clone(),
        })
    }

    /// Drops finished queues nobody listens to that saw no fragment for at
    /// least `ttl`. Unfinished queues stay until their generation ends.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let mut queues = self.queues.lock();
        let before = queues.len();
        queues.retain(|_, queue| {
            queue.listeners.retain(|listener| !listener.sender.is_closed());
            !queue.finished
                || !queue.listeners.is_empty()
                || queue.updated_at.elapsed() < ttl
        });
        before - queues.len()
    }
}

/// A listener attached to one conversation's response queue.
///
/// Yields the replayed fragments first, then live ones, and ends after
/// [`Fragment::Done`]. Dropping it detaches the listener; the last listener
/// to drop after consuming a finished reply removes the queue.
pub struct Subscription {
    conversation_id: ConversationId,
    epoch: u64,
    listener_id: u64,
    replay: VecDeque<Fragment>,
    receiver: Option<mpsc::UnboundedReceiver<Fragment>>,
    saw_done: bool,
    queues: Queues,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<Fragment> {
        if self.saw_done {
            return None;
        }

        let fragment = match self.replay.pop_front() {
            Some(fragment) => fragment,
            None => self.receiver.as_mut()?.recv().await?,
        };

        if fragment == Fragment::Done {
            self.saw_done = true;
        }
        Some(fragment)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut queues = self.queues.lock();
        let Some(queue) = queues
            .get_mut(&self.conversation_id)
            .filter(|queue| queue.epoch == self.epoch)
        else {
            return;
        };

        queue
            .listeners
            .retain(|listener| listener.id != self.listener_id);

        if self.saw_done && queue.finished && queue.listeners.is_empty() {
            debug!(
                "response for conversation {} consumed, removing queue",
                self.conversation_id
            );
            queues.remove(&self.conversation_id);
        }
    }
}
