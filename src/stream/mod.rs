//! Push-based observable streams
//!
//! A [`Publisher`] pushes items to every subscribed [`Observer`] synchronously,
//! on the thread that calls [`Publisher::emit`]. Derived streams built with
//! [`Observable::inspect`] run a side effect on each item before handing the
//! same item on, unchanged.
//!
//! Async consumers can bridge any observable into a `futures` [`Stream`] with
//! [`Observable::into_stream`].
//!
//! [`Stream`]: futures::Stream

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::channel::mpsc;
use thiserror::Error;

/// Lock a mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Failure signalled by an upstream publisher through `on_error`
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Upstream '{origin}' failed: {message}")]
pub struct StreamError {
    pub origin: String,
    pub message: String,
}

impl StreamError {
    pub fn new(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            message: message.into(),
        }
    }
}

/// Receiver of pushed items
pub trait Observer<T>: Send + Sync {
    fn on_next(&self, item: &T);

    fn on_error(&self, _error: &StreamError) {}

    fn on_completed(&self) {}
}

type ObserverRef<T> = Arc<dyn Observer<T>>;
type SubscribeFn<T> = dyn Fn(ObserverRef<T>) -> Subscription + Send + Sync;

struct Subscribers<T> {
    entries: Mutex<Vec<(u64, ObserverRef<T>)>>,
    next_id: AtomicU64,
    terminated: AtomicBool,
}

impl<T: 'static> Subscribers<T> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            terminated: AtomicBool::new(false),
        }
    }

    fn attach(self: &Arc<Self>, observer: ObserverRef<T>) -> Subscription {
        if self.terminated.load(Ordering::SeqCst) {
            observer.on_completed();
            return Subscription::inert();
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.entries).push((id, observer));

        let weak: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(subscribers) = weak.upgrade() {
                lock(&subscribers.entries).retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Copy of the current observers, so callbacks run without the lock held
    fn snapshot(&self) -> Vec<ObserverRef<T>> {
        lock(&self.entries)
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    fn drain(&self) -> Vec<ObserverRef<T>> {
        lock(&self.entries)
            .drain(..)
            .map(|(_, observer)| observer)
            .collect()
    }
}

/// Handle to a live subscription
///
/// Dropping the handle does not cancel the subscription; only
/// [`Subscription::unsubscribe`] does.
#[derive(Clone)]
pub struct Subscription {
    active: Arc<AtomicBool>,
    cancel: Arc<dyn Fn() + Send + Sync>,
}

impl Subscription {
    fn new(cancel: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            active: Arc::new(AtomicBool::new(true)),
            cancel: Arc::new(cancel),
        }
    }

    fn inert() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(|| {}),
        }
    }

    /// Stop delivery to this subscription's observer. Idempotent.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            (self.cancel)();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Producing end of a stream
pub struct Publisher<T> {
    subscribers: Arc<Subscribers<T>>,
}

impl<T: Send + Sync + 'static> Publisher<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Subscribers::new()),
        }
    }

    /// Push an item to every current observer, in subscription order.
    /// Items emitted after termination are dropped.
    pub fn emit(&self, item: T) {
        if self.is_terminated() {
            return;
        }
        for observer in self.subscribers.snapshot() {
            observer.on_next(&item);
        }
    }

    /// Terminate the stream with an error. Later calls are ignored.
    pub fn error(&self, error: StreamError) {
        if self.subscribers.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        for observer in self.subscribers.drain() {
            observer.on_error(&error);
        }
    }

    /// Terminate the stream normally. Later calls are ignored.
    pub fn complete(&self) {
        if self.subscribers.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        for observer in self.subscribers.drain() {
            observer.on_completed();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.subscribers.terminated.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers.entries).len()
    }

    /// The subscribable view of this publisher
    pub fn observable(&self) -> Observable<T> {
        let subscribers = Arc::clone(&self.subscribers);
        Observable {
            subscribe_fn: Arc::new(move |observer| subscribers.attach(observer)),
        }
    }
}

impl<T: Send + Sync + 'static> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("subscribers", &lock(&self.subscribers.entries).len())
            .field(
                "terminated",
                &self.subscribers.terminated.load(Ordering::SeqCst),
            )
            .finish()
    }
}

/// Subscribable stream of items
pub struct Observable<T> {
    subscribe_fn: Arc<SubscribeFn<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            subscribe_fn: Arc::clone(&self.subscribe_fn),
        }
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Observable")
    }
}

impl<T: Send + Sync + 'static> Observable<T> {
    pub fn subscribe(&self, observer: impl Observer<T> + 'static) -> Subscription {
        self.subscribe_shared(Arc::new(observer))
    }

    pub fn subscribe_shared(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        (self.subscribe_fn)(observer)
    }

    /// Subscribe a closure that only cares about items
    pub fn for_each<F>(&self, f: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe(ForEach { f })
    }

    /// Derived stream that calls `f` on each item before passing it on unchanged
    pub fn inspect<F>(&self, f: F) -> Observable<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let f: Arc<dyn Fn(&T) + Send + Sync> = Arc::new(f);
        Observable {
            subscribe_fn: Arc::new(move |downstream| {
                upstream.subscribe(Inspect {
                    f: Arc::clone(&f),
                    downstream,
                })
            }),
        }
    }

    /// Bridge into an async `Stream`. The stream ends when this observable
    /// terminates.
    pub fn into_stream(&self) -> mpsc::UnboundedReceiver<T>
    where
        T: Clone,
    {
        let (tx, rx) = mpsc::unbounded();
        self.subscribe(ChannelObserver { tx });
        rx
    }
}

impl<T: Send + Sync + 'static> Observable<T> {
    /// Cold stream that replays `items` to each new subscriber, in order,
    /// then completes. Delivery happens inside `subscribe`.
    pub fn from_items(items: Vec<T>) -> Self {
        let items = Arc::new(items);
        Observable {
            subscribe_fn: Arc::new(move |observer: ObserverRef<T>| {
                for item in items.iter() {
                    observer.on_next(item);
                }
                observer.on_completed();
                Subscription::inert()
            }),
        }
    }
}

struct ForEach<F> {
    f: F,
}

impl<T, F> Observer<T> for ForEach<F>
where
    F: Fn(&T) + Send + Sync,
{
    fn on_next(&self, item: &T) {
        (self.f)(item)
    }
}

struct Inspect<T> {
    f: Arc<dyn Fn(&T) + Send + Sync>,
    downstream: ObserverRef<T>,
}

impl<T> Observer<T> for Inspect<T> {
    fn on_next(&self, item: &T) {
        (self.f)(item);
        self.downstream.on_next(item);
    }

    fn on_error(&self, error: &StreamError) {
        self.downstream.on_error(error);
    }

    fn on_completed(&self) {
        self.downstream.on_completed();
    }
}

struct ChannelObserver<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T: Clone + Send + Sync> Observer<T> for ChannelObserver<T> {
    fn on_next(&self, item: &T) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.unbounded_send(item.clone());
    }

    fn on_error(&self, _error: &StreamError) {
        self.tx.close_channel();
    }

    fn on_completed(&self) {
        self.tx.close_channel();
    }
}
