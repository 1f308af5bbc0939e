use std::fmt::{Debug, Formatter, Result};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::future::{Completion, State};

/// One link of a chain of `Completion`s that delivers several values over time.
///
/// Delivering a value completes this link and, unless it was the last value, creates the next
/// pending link in the same guarded step. A consumer that holds an early link can walk the chain
/// with `next` as it grows. A producer must eventually finish every open link it creates, either
/// with a last value or by failing it, or consumers of that link wait forever.
pub struct Progress<V> {
    cell: Completion<V>,
    next: Arc<Mutex<Option<Progress<V>>>>,
}

impl<V> Clone for Progress<V> {
    fn clone(&self) -> Self {
        Progress {
            cell: self.cell.clone(),
            next: Arc::clone(&self.next),
        }
    }
}

impl<V> Default for Progress<V> {
    fn default() -> Self {
        Progress::new()
    }
}

impl<V> Debug for Progress<V> {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "Progress({:?})", self.cell.state())
    }
}

impl<V> Progress<V> {
    /// Constructs a new, pending chain link.
    pub fn new() -> Self {
        Progress {
            cell: Completion::new(),
            next: Arc::new(Mutex::new(None)),
        }
    }

    fn lock_next(&self) -> MutexGuard<Option<Progress<V>>> {
        match self.next.lock() {
            Ok(next) => next,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Completes this link with `value`. Returns the next pending link, or `None` if `last` is set
    /// or this link was already terminal.
    pub fn deliver_next(&self, value: V, last: bool) -> Option<Progress<V>> {
        let next = if last { None } else { Some(Progress::new()) };
        let link = next.clone();
        let delivered = self.cell.complete_and(value, || {
            *self.lock_next() = link;
        });
        if delivered {
            next
        } else {
            None
        }
    }

    /// Completes this link with the last value of the chain.
    pub fn done(&self, value: V) -> bool {
        self.cell.complete(value)
    }

    /// Fails this link, which closes the chain.
    pub fn fail<R: Into<String>>(&self, reason: R) -> bool {
        self.cell.fail(reason)
    }

    /// Returns the link that follows this one, if it has been created.
    pub fn next(&self) -> Option<Progress<V>> {
        self.lock_next().clone()
    }

    /// Registers `listener` on this link's cell.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&Completion<V>) + Send + 'static,
    {
        self.cell.add_listener(listener)
    }

    /// Returns this link's cell.
    pub fn completion(&self) -> &Completion<V> {
        &self.cell
    }

    pub fn state(&self) -> State {
        self.cell.state()
    }

    pub fn result(&self) -> Option<V>
    where
        V: Clone,
    {
        self.cell.result()
    }
}
