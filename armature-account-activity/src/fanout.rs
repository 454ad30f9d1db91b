//! Lossless one-to-many delivery
//!
//! Every listener owns an unbounded queue, so a slow listener never loses
//! events and never holds up the sender. Listeners that were dropped are
//! pruned on the next send.

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// A listener's end of a [`Fanout`]
pub type Listener<T> = mpsc::UnboundedReceiver<T>;

#[derive(Debug)]
pub(crate) struct Fanout<T> {
    senders: Mutex<Option<Vec<mpsc::UnboundedSender<T>>>>,
}

impl<T: Clone> Fanout<T> {
    pub(crate) fn new() -> Self {
        Self {
            senders: Mutex::new(Some(Vec::new())),
        }
    }

    /// Attach a listener; on a closed fanout it sees the end right away
    pub(crate) fn listen(&self) -> Listener<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        if let Some(senders) = self.senders.lock().as_mut() {
            senders.push(sender);
        }
        receiver
    }

    /// Deliver to every live listener; returns how many received it
    pub(crate) fn send(&self, value: T) -> usize {
        let mut guard = self.senders.lock();
        let Some(senders) = guard.as_mut() else {
            return 0;
        };
        senders.retain(|sender| sender.send(value.clone()).is_ok());
        senders.len()
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.senders
            .lock()
            .as_ref()
            .map(|senders| senders.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    /// Drop every sender; listeners drain what they have, then see the end
    pub(crate) fn close(&self) {
        self.senders.lock().take();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.senders.lock().is_none()
    }
}

impl<T: Clone> Default for Fanout<T> {
    fn default() -> Self {
        Self::new()
    }
}
