//! Pending-item storage for a busy processor
//!
//! With skip-if-running the processor keeps a single-slot [`Mailbox`]: a new
//! item replaces whatever is waiting, so memory stays O(1). Without it every
//! item is kept in arrival order.

use std::collections::VecDeque;

/// Single-slot, last-write-wins holder
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Option<T>,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self { slot: None }
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `item`, returning the item it displaced.
    pub fn put(&mut self, item: T) -> Option<T> {
        self.slot.replace(item)
    }

    pub fn take(&mut self) -> Option<T> {
        self.slot.take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }
}

/// Outcome of [`PendingQueue::push`]
#[derive(Debug, PartialEq)]
pub enum Pushed<T> {
    Queued,
    /// The mailbox held an older item, which is returned
    Replaced(T),
}

#[derive(Debug)]
pub enum PendingQueue<T> {
    Latest(Mailbox<T>),
    Fifo(VecDeque<T>),
}

impl<T> PendingQueue<T> {
    pub fn new(skip_if_running: bool) -> Self {
        if skip_if_running {
            PendingQueue::Latest(Mailbox::new())
        } else {
            PendingQueue::Fifo(VecDeque::new())
        }
    }

    pub fn push(&mut self, item: T) -> Pushed<T> {
        match self {
            PendingQueue::Latest(mailbox) => match mailbox.put(item) {
                Some(old) => Pushed::Replaced(old),
                None => Pushed::Queued,
            },
            PendingQueue::Fifo(queue) => {
                queue.push_back(item);
                Pushed::Queued
            }
        }
    }

    /// Oldest item in FIFO mode, the single survivor in mailbox mode
    pub fn pop(&mut self) -> Option<T> {
        match self {
            PendingQueue::Latest(mailbox) => mailbox.take(),
            PendingQueue::Fifo(queue) => queue.pop_front(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PendingQueue::Latest(mailbox) => usize::from(!mailbox.is_empty()),
            PendingQueue::Fifo(queue) => queue.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_latest(&self) -> bool {
        matches!(self, PendingQueue::Latest(_))
    }

    /// Switch policy in place. Returns the items dropped by the switch: going
    /// to mailbox mode keeps only the newest queued item.
    pub fn set_skip_if_running(&mut self, skip_if_running: bool) -> Vec<T> {
        if skip_if_running == self.is_latest() {
            return Vec::new();
        }

        match std::mem::replace(self, PendingQueue::new(skip_if_running)) {
            PendingQueue::Fifo(mut queue) => {
                let newest = queue.pop_back();
                if let Some(item) = newest {
                    self.push(item);
                }
                queue.into_iter().collect()
            }
            PendingQueue::Latest(mut mailbox) => {
                if let Some(item) = mailbox.take() {
                    self.push(item);
                }
                Vec::new()
            }
        }
    }

    /// Remove everything that is waiting
    pub fn clear(&mut self) -> usize {
        let n = self.len();
        match self {
            PendingQueue::Latest(mailbox) => {
                mailbox.take();
            }
            PendingQueue::Fifo(queue) => queue.clear(),
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_last_write_wins() {
        let mut mailbox = Mailbox::new();
        assert_eq!(mailbox.put(1), None);
        assert_eq!(mailbox.put(2), Some(1));
        assert_eq!(mailbox.put(3), Some(2));
        assert_eq!(mailbox.take(), Some(3));
        assert!(mailbox.is_empty());
    }

    #[test]
    fn test_latest_queue_holds_one() {
        let mut queue = PendingQueue::new(true);
        for i in 0..100 {
            queue.push(i);
            assert_eq!(queue.len(), 1);
        }
        assert_eq!(queue.pop(), Some(99));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_fifo_keeps_order() {
        let mut queue = PendingQueue::new(false);
        for i in 0..5 {
            assert_eq!(queue.push(i), Pushed::Queued);
        }
        let drained: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_switch_to_mailbox_keeps_newest() {
        let mut queue = PendingQueue::new(false);
        for i in 0..4 {
            queue.push(i);
        }
        let dropped = queue.set_skip_if_running(true);
        assert_eq!(dropped, vec![0, 1, 2]);
        assert!(queue.is_latest());
        assert_eq!(queue.pop(), Some(3));
    }

    #[test]
    fn test_switch_to_fifo_keeps_slot() {
        let mut queue = PendingQueue::new(true);
        queue.push(7);
        assert!(queue.set_skip_if_running(false).is_empty());
        queue.push(8);
        assert_eq!(queue.pop(), Some(7));
        assert_eq!(queue.pop(), Some(8));
    }

    #[test]
    fn test_clear_counts() {
        let mut queue = PendingQueue::new(false);
        queue.push('a');
        queue.push('b');
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
