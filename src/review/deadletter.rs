//! Dead-letter queue for failed review tasks.
//!
//! A bounded FIFO holding tasks whose review failed, each with its last
//! error and attempt count. When full, the oldest entry is evicted and the
//! discard handler is invoked with it. The queue holds the file descriptor
//! alive for the retry, nothing more.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::types::{FileDescriptor, ScanError};

/// A failed task held for bounded retry.
#[derive(Debug)]
pub struct DeadLetter {
    pub task_id: usize,
    pub file: Arc<FileDescriptor>,
    pub error: ScanError,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

/// Cloneable view of a dead letter for inspection.
#[derive(Debug, Clone)]
pub struct DeadLetterInfo {
    pub task_id: usize,
    pub file: Arc<FileDescriptor>,
    pub error: String,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl From<&DeadLetter> for DeadLetterInfo {
    fn from(dl: &DeadLetter) -> Self {
        Self {
            task_id: dl.task_id,
            file: Arc::clone(&dl.file),
            error: dl.error.to_string(),
            attempts: dl.attempts,
            timestamp: dl.timestamp,
        }
    }
}

type DiscardHandler = Box<dyn Fn(&DeadLetter) + Send + Sync>;

/// Bounded FIFO of failed tasks.
pub struct DeadLetterQueue {
    items: Mutex<VecDeque<DeadLetter>>,
    max_size: usize,
    on_discard: Mutex<DiscardHandler>,
}

impl DeadLetterQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(max_size.min(64))),
            max_size,
            on_discard: Mutex::new(Box::new(|dl: &DeadLetter| {
                tracing::warn!(
                    attempts = dl.attempts,
                    error = %dl.error,
                    file = %dl.file.relative,
                    "discarded dead letter"
                );
            })),
        }
    }

    /// Append a failed task. On overflow the oldest entry is evicted and
    /// handed to the discard handler.
    pub fn push(&self, task_id: usize, file: Arc<FileDescriptor>, error: ScanError, attempts: u32) {
        let evicted = {
            let mut items = self.lock_items();
            let evicted = if items.len() >= self.max_size {
                items.pop_front()
            } else {
                None
            };
            items.push_back(DeadLetter {
                task_id,
                file,
                error,
                attempts,
                timestamp: Utc::now(),
            });
            evicted
        };

        // Invoke the handler outside the items lock.
        if let Some(ref dl) = evicted {
            (self.lock_handler())(dl);
        }
    }

    /// Remove and return the oldest entry.
    pub fn pop(&self) -> Option<DeadLetter> {
        self.lock_items().pop_front()
    }

    /// Look at the oldest entry without removing it.
    pub fn peek(&self) -> Option<DeadLetterInfo> {
        self.lock_items().front().map(DeadLetterInfo::from)
    }

    pub fn len(&self) -> usize {
        self.lock_items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_items().is_empty()
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.lock_items().clear();
    }

    /// Snapshot of all entries, oldest first.
    pub fn items(&self) -> Vec<DeadLetterInfo> {
        self.lock_items().iter().map(DeadLetterInfo::from).collect()
    }

    /// Replace the discard handler.
    pub fn set_discard_handler(&self, handler: impl Fn(&DeadLetter) + Send + Sync + 'static) {
        *self.lock_handler() = Box::new(handler);
    }

    fn lock_items(&self) -> std::sync::MutexGuard<'_, VecDeque<DeadLetter>> {
        self.items.lock().unwrap_or_else(|poisoned| {
            tracing::error!("dead letter queue mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_handler(&self) -> std::sync::MutexGuard<'_, DiscardHandler> {
        self.on_discard.lock().unwrap_or_else(|poisoned| {
            tracing::error!("dead letter handler mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_file(name: &str) -> Arc<FileDescriptor> {
        Arc::new(FileDescriptor {
            path: PathBuf::from(format!("/tmp/{name}")),
            relative: name.to_string(),
            size: 1,
            lines: 1,
            language: "go".to_string(),
        })
    }

    fn push_n(queue: &DeadLetterQueue, n: usize) {
        for i in 0..n {
            queue.push(
                i,
                test_file(&format!("f{i}.go")),
                ScanError::api("mock", format!("error {i}")),
                1,
            );
        }
    }

    #[test]
    fn fifo_order() {
        let queue = DeadLetterQueue::new(10);
        push_n(&queue, 3);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().unwrap().task_id, 0);
        assert_eq!(queue.pop().unwrap().task_id, 1);
        assert_eq!(queue.pop().unwrap().task_id, 2);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn overflow_evicts_oldest_and_fires_handler_once() {
        let queue = DeadLetterQueue::new(3);
        let discarded = Arc::new(AtomicUsize::new(0));
        let discarded_id = Arc::new(AtomicUsize::new(usize::MAX));

        let count = Arc::clone(&discarded);
        let id = Arc::clone(&discarded_id);
        queue.set_discard_handler(move |dl| {
            count.fetch_add(1, Ordering::SeqCst);
            id.store(dl.task_id, Ordering::SeqCst);
        });

        push_n(&queue, 4);

        assert_eq!(queue.len(), 3);
        assert_eq!(discarded.load(Ordering::SeqCst), 1);
        assert_eq!(discarded_id.load(Ordering::SeqCst), 0);
        // Newest three remain.
        let ids: Vec<_> = queue.items().iter().map(|i| i.task_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn peek_does_not_remove() {
        let queue = DeadLetterQueue::new(5);
        push_n(&queue, 2);

        let front = queue.peek().unwrap();
        assert_eq!(front.task_id, 0);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn clear_empties_the_queue() {
        let queue = DeadLetterQueue::new(5);
        push_n(&queue, 4);
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn items_is_a_snapshot() {
        let queue = DeadLetterQueue::new(5);
        push_n(&queue, 2);

        let snapshot = queue.items();
        queue.clear();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].error, "mock api error: error 0");
    }
}
