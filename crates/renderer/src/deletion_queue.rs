//! Named registry of GPU teardown actions.
//!
//! Every component that creates GPU objects registers how to destroy them.
//! [`DeletionQueue::flush`] runs the actions newest first, so an object is
//! always destroyed before anything it was created from.
//!
//! Re-registering a name replaces its action in place: the old action is
//! dropped without running and the new one keeps the old position. Passes
//! rely on this when they rebuild swapchain-sized targets, since the
//! replacement drops the old targets immediately.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use deferred_renderer::DeletionQueue;
//!
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let mut queue = DeletionQueue::new();
//! for name in ["a", "b", "c"] {
//!     let log = log.clone();
//!     queue.push(name, move || log.borrow_mut().push(name));
//! }
//! queue.flush();
//! assert_eq!(*log.borrow(), vec!["c", "b", "a"]);
//! ```

use tracing::{debug, warn};

struct Entry {
    name: String,
    action: Box<dyn FnOnce()>,
}

/// Ordered, named teardown actions.
#[derive(Default)]
pub struct DeletionQueue {
    entries: Vec<Entry>,
    flushed: bool,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `action` under `name`.
    ///
    /// Returns `true` when an existing entry was replaced in place.
    pub fn push(&mut self, name: impl Into<String>, action: impl FnOnce() + 'static) -> bool {
        let name = name.into();
        if self.flushed {
            warn!("Deletion queue re-armed after flush by '{}'", name);
            self.flushed = false;
        }

        match self.entries.iter_mut().find(|entry| entry.name == name) {
            Some(entry) => {
                debug!("Replacing teardown action '{}'", name);
                // The replaced closure is dropped here, releasing whatever it
                // captured without running it.
                entry.action = Box::new(action);
                true
            }
            None => {
                debug!("Registered teardown action '{}'", name);
                self.entries.push(Entry {
                    name,
                    action: Box::new(action),
                });
                false
            }
        }
    }

    /// Keeps `value` alive until flush, then drops it.
    ///
    /// Meant for RAII GPU objects whose `Drop` destroys them.
    pub fn retain<T: 'static>(&mut self, name: impl Into<String>, value: T) -> bool {
        self.push(name, move || drop(value))
    }

    /// Runs every action newest first and empties the queue.
    ///
    /// Returns the number of actions run. A second flush runs nothing.
    pub fn flush(&mut self) -> usize {
        if self.flushed {
            warn!("Deletion queue already flushed, ignoring");
            return 0;
        }

        let count = self.entries.len();
        while let Some(entry) = self.entries.pop() {
            debug!("Running teardown action '{}'", entry.name);
            (entry.action)();
        }
        self.flushed = true;
        debug!("Deletion queue flushed {} action(s)", count);
        count
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            warn!(
                "Deletion queue dropped with {} pending action(s), flushing",
                self.entries.len()
            );
            self.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Box<dyn FnOnce()>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let make = move |label: &str| -> Box<dyn FnOnce()> {
            let sink = sink.clone();
            let label = label.to_string();
            Box::new(move || sink.borrow_mut().push(label))
        };
        (log, make)
    }

    #[test]
    fn test_flush_runs_in_reverse() {
        let (log, make) = recorder();
        let mut queue = DeletionQueue::new();
        queue.push("A", make("A"));
        queue.push("B", make("B"));
        queue.push("C", make("C"));

        assert_eq!(queue.flush(), 3);
        assert_eq!(*log.borrow(), vec!["C", "B", "A"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_repush_replaces_in_place() {
        let (log, make) = recorder();
        let mut queue = DeletionQueue::new();
        assert!(!queue.push("A", make("A")));
        assert!(!queue.push("B", make("B-old")));
        assert!(!queue.push("C", make("C")));
        assert!(queue.push("B", make("B-new")));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.names().collect::<Vec<_>>(), vec!["A", "B", "C"]);

        queue.flush();
        assert_eq!(*log.borrow(), vec!["C", "B-new", "A"]);
    }

    #[test]
    fn test_replaced_value_is_dropped_immediately() {
        let (log, make) = recorder();
        struct Tracked(Rc<RefCell<Vec<String>>>, &'static str);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.borrow_mut().push(format!("drop {}", self.1));
            }
        }

        let mut queue = DeletionQueue::new();
        queue.retain("target", Tracked(log.clone(), "old"));
        queue.push("other", make("other"));
        queue.retain("target", Tracked(log.clone(), "new"));
        assert_eq!(*log.borrow(), vec!["drop old"]);

        queue.flush();
        assert_eq!(*log.borrow(), vec!["drop old", "other", "drop new"]);
    }

    #[test]
    fn test_second_flush_is_noop() {
        let (log, make) = recorder();
        let mut queue = DeletionQueue::new();
        queue.push("A", make("A"));
        assert_eq!(queue.flush(), 1);
        assert_eq!(queue.flush(), 0);
        assert_eq!(log.borrow().len(), 1);
        assert!(queue.is_flushed());
    }

    #[test]
    fn test_push_after_flush_rearms() {
        let (log, make) = recorder();
        let mut queue = DeletionQueue::new();
        queue.flush();
        queue.push("late", make("late"));
        assert!(!queue.is_flushed());
        assert!(queue.contains("late"));
        assert_eq!(queue.flush(), 1);
        assert_eq!(*log.borrow(), vec!["late"]);
    }

    #[test]
    fn test_drop_flushes_pending() {
        let (log, make) = recorder();
        {
            let mut queue = DeletionQueue::new();
            queue.push("A", make("A"));
            queue.push("B", make("B"));
        }
        assert_eq!(*log.borrow(), vec!["B", "A"]);
    }
}
