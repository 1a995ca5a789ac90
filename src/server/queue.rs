//! Request work queues.
//!
//! Queues hold request ids only; the requests themselves live in the
//! dispatcher. A request id is in at most one queue at a time.

use crate::core::RequestId;
use std::collections::VecDeque;

/// The four work queues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Ready for the next dispatch step
    Main,
    /// Waiting for a disambiguation decision
    Disambiguation,
    /// Waiting for the handling application to start
    StartingApplication,
    /// Waiting for the handling application to reply
    SentToApplication,
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueKind::Main => write!(f, "main"),
            QueueKind::Disambiguation => write!(f, "disambiguation"),
            QueueKind::StartingApplication => write!(f, "starting-application"),
            QueueKind::SentToApplication => write!(f, "sent-to-application"),
        }
    }
}

/// The set of request queues.
#[derive(Debug, Default)]
pub struct QueueSet {
    main: VecDeque<RequestId>,
    disambiguation: VecDeque<RequestId>,
    starting_application: VecDeque<RequestId>,
    sent_to_application: VecDeque<RequestId>,
}

impl QueueSet {
    /// Create empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, kind: QueueKind) -> &VecDeque<RequestId> {
        match kind {
            QueueKind::Main => &self.main,
            QueueKind::Disambiguation => &self.disambiguation,
            QueueKind::StartingApplication => &self.starting_application,
            QueueKind::SentToApplication => &self.sent_to_application,
        }
    }

    fn queue_mut(&mut self, kind: QueueKind) -> &mut VecDeque<RequestId> {
        match kind {
            QueueKind::Main => &mut self.main,
            QueueKind::Disambiguation => &mut self.disambiguation,
            QueueKind::StartingApplication => &mut self.starting_application,
            QueueKind::SentToApplication => &mut self.sent_to_application,
        }
    }

    /// Append a request to a queue.
    ///
    /// Returns false, leaving the queues untouched, if the request is
    /// already queued somewhere.
    pub fn enqueue(&mut self, kind: QueueKind, id: RequestId) -> bool {
        if self.location(id).is_some() {
            return false;
        }
        self.queue_mut(kind).push_back(id);
        true
    }

    /// Take the next request off the main queue.
    pub fn pop_main(&mut self) -> Option<RequestId> {
        self.main.pop_front()
    }

    /// Remove a request from a queue. Returns whether it was there.
    pub fn remove(&mut self, kind: QueueKind, id: RequestId) -> bool {
        let queue = self.queue_mut(kind);
        match queue.iter().position(|queued| *queued == id) {
            Some(index) => {
                queue.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove and return, in queue order, every id selected by `select`.
    pub fn take_where<F>(&mut self, kind: QueueKind, mut select: F) -> Vec<RequestId>
    where
        F: FnMut(&RequestId) -> bool,
    {
        let mut taken = Vec::new();
        self.queue_mut(kind).retain(|id| {
            if select(id) {
                taken.push(*id);
                false
            } else {
                true
            }
        });
        taken
    }

    /// Whether a queue holds the request.
    pub fn contains(&self, kind: QueueKind, id: RequestId) -> bool {
        self.queue(kind).contains(&id)
    }

    /// The queue currently holding the request, if any.
    pub fn location(&self, id: RequestId) -> Option<QueueKind> {
        [
            QueueKind::Main,
            QueueKind::Disambiguation,
            QueueKind::StartingApplication,
            QueueKind::SentToApplication,
        ]
        .into_iter()
        .find(|kind| self.contains(*kind, id))
    }

    /// Number of requests in a queue.
    pub fn len(&self, kind: QueueKind) -> usize {
        self.queue(kind).len()
    }

    /// Whether every queue is empty.
    pub fn is_empty(&self) -> bool {
        self.main.is_empty()
            && self.disambiguation.is_empty()
            && self.starting_application.is_empty()
            && self.sent_to_application.is_empty()
    }
}
