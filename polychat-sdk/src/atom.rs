//! A single-value observable cell.
//!
//! `Atom<T>` holds one value and notifies subscribers synchronously whenever
//! it is replaced. There is no history and no buffering: a subscriber only
//! sees values set after it subscribed. Used for client collections
//! (channel/user/emote lists) and for UI-local state that sibling components
//! need to observe without threading it through every layer.

use std::sync::Arc;

use parking_lot::Mutex;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Token identifying a subscription, returned by [`Atom::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

struct Inner<T> {
    value: T,
    next_id: u64,
    subscribers: Vec<(u64, Callback<T>)>,
}

pub struct Atom<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Atom<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                value,
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Register a callback invoked on every subsequent [`set`](Atom::set).
    /// No ordering is guaranteed across subscribers.
    pub fn subscribe(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::new(f)));
        Subscription(id)
    }

    /// Drop a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, sub: Subscription) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(id, _)| *id != sub.0);
        inner.subscribers.len() != before
    }
}

impl<T: Clone> Atom<T> {
    pub fn get(&self) -> T {
        self.inner.lock().value.clone()
    }

    /// Store a new value and notify every subscriber with it.
    ///
    /// Notification happens on the calling thread, after the internal lock is
    /// released, so subscribers may read or set the atom themselves.
    pub fn set(&self, value: T) {
        let subscribers: Vec<Callback<T>> = {
            let mut inner = self.inner.lock();
            inner.value = value.clone();
            inner.subscribers.iter().map(|(_, f)| Arc::clone(f)).collect()
        };
        for f in &subscribers {
            f(&value);
        }
    }
}

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default> Default for Atom<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + std::fmt::Debug> std::fmt::Debug for Atom<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Atom").field(&self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn set_then_get() {
        let atom = Atom::new(1);
        atom.set(7);
        assert_eq!(atom.get(), 7);
    }

    #[test]
    fn subscribers_notified_exactly_once_per_set() {
        let atom = Atom::new(0);
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let c = Arc::clone(&count);
        let s = Arc::clone(&seen);
        atom.subscribe(move |v| {
            c.fetch_add(1, Ordering::SeqCst);
            s.lock().push(*v);
        });

        atom.set(5);
        atom.set(9);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(*seen.lock(), vec![5, 9]);
    }

    #[test]
    fn multiple_subscribers_all_fire() {
        let atom = Atom::new(String::new());
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let h = Arc::clone(&hits);
            atom.subscribe(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
        atom.set("x".to_string());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn no_retroactive_notification() {
        let atom = Atom::new(0);
        atom.set(1);
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        atom.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let atom = Atom::new(0);
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = atom.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        atom.set(1);
        assert!(atom.unsubscribe(sub));
        atom.set(2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!atom.unsubscribe(sub));
    }

    #[test]
    fn clones_share_state() {
        let a = Atom::new(0);
        let b = a.clone();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        b.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        a.set(3);
        assert_eq!(b.get(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscriber_may_read_the_atom() {
        let atom = Atom::new(0);
        let other = atom.clone();
        let seen = Arc::new(Mutex::new(0));
        let s = Arc::clone(&seen);
        atom.subscribe(move |_| {
            *s.lock() = other.get();
        });
        atom.set(42);
        assert_eq!(*seen.lock(), 42);
    }
}
