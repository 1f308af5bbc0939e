pub mod progress;

use std::fmt::{Debug, Formatter, Result};
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};

/// The lifecycle of a `Completion`. A cell leaves `Pending` exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

impl State {
    /// Returns `true` if the state can no longer change.
    pub fn is_terminal(self) -> bool {
        self != State::Pending
    }
}

type Listener<V> = Box<dyn FnOnce(&Completion<V>) + Send>;

struct Inner<V> {
    state: State,
    value: Option<V>,
    reason: Option<String>,
    listeners: Vec<Listener<V>>,
}

/// A single-assignment result cell that notifies listeners when it completes.
///
/// The first call to `complete`, `fail` or `cancel` wins and every later call returns `false`
/// without touching the cell. Competing producers, such as a timeout and a late reply, may race
/// on the same cell and which one wins is not deterministic.
///
/// Nothing ever blocks on a `Completion`. Listeners run on the thread that performs the
/// completing write, or immediately on the registering thread if the cell is already terminal.
pub struct Completion<V> {
    inner: Arc<Mutex<Inner<V>>>,
}

impl<V> Clone for Completion<V> {
    fn clone(&self) -> Self {
        Completion {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Default for Completion<V> {
    fn default() -> Self {
        Completion::new()
    }
}

impl<V> Debug for Completion<V> {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "Completion({:?})", self.state())
    }
}

impl<V> Completion<V> {
    /// Constructs a new, pending `Completion`.
    pub fn new() -> Self {
        Completion {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Pending,
                value: None,
                reason: None,
                listeners: Vec::new(),
            })),
        }
    }

    /// Constructs a `Completion` that has already succeeded with `value`.
    pub fn completed(value: V) -> Self {
        let ret = Completion::new();
        ret.complete(value);
        ret
    }

    /// Constructs a `Completion` that has already failed with `reason`.
    pub fn failed<R: Into<String>>(reason: R) -> Self {
        let ret = Completion::new();
        ret.fail(reason);
        ret
    }

    fn lock(&self) -> MutexGuard<Inner<V>> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Succeeds the cell with `value` and notifies all listeners. Returns `false` if the cell was
    /// already terminal.
    pub fn complete(&self, value: V) -> bool {
        self.complete_and(value, || {})
    }

    /// Like `complete`, but runs `on_transition` while the transition is still guarded, so that
    /// listeners observe its effects.
    pub(crate) fn complete_and<F: FnOnce()>(&self, value: V, on_transition: F) -> bool {
        let listeners = {
            let mut inner = self.lock();
            if inner.state != State::Pending {
                return false;
            }
            inner.state = State::Succeeded;
            inner.value = Some(value);
            on_transition();
            mem::replace(&mut inner.listeners, Vec::new())
        };
        self.notify(listeners);
        true
    }

    /// Fails the cell with `reason` and notifies all listeners. Returns `false` if the cell was
    /// already terminal.
    pub fn fail<R: Into<String>>(&self, reason: R) -> bool {
        self.finish(State::Failed, Some(reason.into()))
    }

    /// Cancels the cell and notifies all listeners. Returns `false` if the cell was already
    /// terminal.
    pub fn cancel(&self) -> bool {
        self.finish(State::Cancelled, None)
    }

    fn finish(&self, state: State, reason: Option<String>) -> bool {
        let listeners = {
            let mut inner = self.lock();
            if inner.state != State::Pending {
                return false;
            }
            inner.state = state;
            inner.reason = reason;
            mem::replace(&mut inner.listeners, Vec::new())
        };
        self.notify(listeners);
        true
    }

    // Listeners run outside the lock so that they may freely read the cell or register more
    // listeners on it.
    fn notify(&self, listeners: Vec<Listener<V>>) {
        for listener in listeners {
            listener(self);
        }
    }

    /// Registers `listener`. It runs exactly once with the terminal cell: right now if the cell is
    /// already terminal, otherwise when it becomes so.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&Completion<V>) + Send + 'static,
    {
        {
            let mut inner = self.lock();
            if inner.state == State::Pending {
                inner.listeners.push(Box::new(listener));
                return;
            }
        }
        listener(self);
    }

    /// Returns the current state of the cell.
    pub fn state(&self) -> State {
        self.lock().state
    }

    /// Returns `true` if the cell is terminal.
    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// Returns `true` if the cell succeeded.
    pub fn is_success(&self) -> bool {
        self.state() == State::Succeeded
    }

    /// Returns the value the cell succeeded with, or `None` while pending or after failing.
    pub fn result(&self) -> Option<V>
    where
        V: Clone,
    {
        self.lock().value.clone()
    }

    /// Returns the reason the cell failed with, if any.
    pub fn failure_reason(&self) -> Option<String> {
        self.lock().reason.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::{Completion, State};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;

    #[test]
    fn test_pending_has_no_result() {
        let cell: Completion<u32> = Completion::new();
        assert_eq!(cell.state(), State::Pending);
        assert_eq!(cell.result(), None);
        assert_eq!(cell.failure_reason(), None);
        assert!(!cell.is_done());
    }

    #[test]
    fn test_first_writer_wins() {
        let cell = Completion::new();
        assert!(cell.complete(1));
        assert!(!cell.complete(2));
        assert!(!cell.fail("late"));
        assert!(!cell.cancel());
        assert_eq!(cell.state(), State::Succeeded);
        assert!(cell.is_success());
        assert_eq!(cell.result(), Some(1));
        assert_eq!(cell.failure_reason(), None);
    }

    #[test]
    fn test_fail_keeps_reason() {
        let cell: Completion<u32> = Completion::failed("timed out");
        assert!(!cell.complete(3));
        assert_eq!(cell.state(), State::Failed);
        assert!(cell.is_done());
        assert!(!cell.is_success());
        assert_eq!(cell.result(), None);
        assert_eq!(cell.failure_reason(), Some(String::from("timed out")));
    }

    #[test]
    fn test_listener_before_and_after_completion() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cell = Completion::new();

        let early = Arc::clone(&seen);
        cell.add_listener(move |c: &Completion<u32>| {
            early.lock().unwrap().push(("early", c.state(), c.result()));
        });
        assert!(seen.lock().unwrap().is_empty());

        cell.complete(7);
        let late = Arc::clone(&seen);
        cell.add_listener(move |c: &Completion<u32>| {
            late.lock().unwrap().push(("late", c.state(), c.result()));
        });

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                ("early", State::Succeeded, Some(7)),
                ("late", State::Succeeded, Some(7)),
            ]
        );
    }

    #[test]
    fn test_listener_may_register_listener() {
        let count = Arc::new(AtomicUsize::new(0));
        let cell: Completion<()> = Completion::new();
        let outer = Arc::clone(&count);
        cell.add_listener(move |c| {
            outer.fetch_add(1, Ordering::SeqCst);
            let inner = Arc::clone(&outer);
            c.add_listener(move |_| {
                inner.fetch_add(1, Ordering::SeqCst);
            });
        });
        cell.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_completion_single_winner() {
        for _ in 0..50 {
            let cell = Completion::new();
            let barrier = Arc::new(Barrier::new(8));
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let cell = cell.clone();
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        if i % 2 == 0 {
                            cell.complete(i)
                        } else {
                            cell.fail(format!("producer {}", i))
                        }
                    })
                })
                .collect();
            let wins = handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(wins, 1);
            assert!(cell.is_done());
        }
    }

    #[test]
    fn test_concurrent_listeners_notified_once() {
        for _ in 0..50 {
            let cell: Completion<u32> = Completion::new();
            let count = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(Barrier::new(9));
            let mut handles = Vec::new();
            for _ in 0..8 {
                let cell = cell.clone();
                let count = Arc::clone(&count);
                let barrier = Arc::clone(&barrier);
                handles.push(thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..10 {
                        let count = Arc::clone(&count);
                        cell.add_listener(move |c| {
                            assert_eq!(c.result(), Some(42));
                            count.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                }));
            }
            barrier.wait();
            cell.complete(42);
            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(count.load(Ordering::SeqCst), 80);
        }
    }
}
