//! Observable item sets.
//!
//! An item set reports a changing collection through `Added` / `Removed`
//! events delivered to a single subscriber, plus an on-demand snapshot.
//! `Changed` hints that a present item was written.
//! [`DirectoryWatch`] is the leaf; [`UnionSet`] and [`FilteredSet`] compose
//! other sets.
//!
//! Every implementation emits while holding its own state lock, so events
//! reach the subscriber in one total order and `dispose` returning means no
//! further event can be delivered.

pub mod directory;
pub mod filter;
pub mod pattern;
pub mod union;

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::SourceError;

pub use directory::DirectoryWatch;
pub use filter::FilteredSet;
pub use pattern::FilePattern;
pub use union::UnionSet;

/// Identity of a unit of work. Blanket-implemented.
pub trait Item: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> Item for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// A change reported by an item set.
#[derive(Debug)]
pub enum ItemEvent<T> {
    /// The item became present.
    Added(T),
    /// A previously added item is gone.
    Removed(T),
    /// A present item's contents may have changed. Sets that judge items by
    /// content check it again.
    Changed(T),
    /// The source is permanently lost and will report nothing further.
    Failed(SourceError),
}

impl<T> ItemEvent<T> {
    pub fn item(&self) -> Option<&T> {
        match self {
            ItemEvent::Added(item) | ItemEvent::Removed(item) | ItemEvent::Changed(item) => {
                Some(item)
            }
            ItemEvent::Failed(_) => None,
        }
    }
}

/// Callback receiving an item set's events.
pub type EventSink<T> = Arc<dyn Fn(ItemEvent<T>) + Send + Sync>;

/// A changing collection of items with a single subscriber.
pub trait ItemSet<T: Item>: Send + Sync {
    /// Attach the one subscriber. Fails if one is already attached or the
    /// set has been disposed.
    fn subscribe(&self, sink: EventSink<T>) -> Result<(), SourceError>;

    /// Detach the subscriber. Events emitted afterwards are dropped.
    fn unsubscribe(&self);

    /// Begin producing events. Nothing is emitted before this call.
    fn start(&self) -> Result<(), SourceError>;

    /// Items currently present.
    fn current_items(&self) -> HashSet<T>;

    /// Stop producing events and release OS resources. No event is emitted
    /// after this returns. Idempotent.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}

macro_rules! forward_item_set {
    ($wrapper:ident) => {
        impl<T: Item, S: ItemSet<T> + ?Sized> ItemSet<T> for $wrapper<S> {
            fn subscribe(&self, sink: EventSink<T>) -> Result<(), SourceError> {
                (**self).subscribe(sink)
            }

            fn unsubscribe(&self) {
                (**self).unsubscribe()
            }

            fn start(&self) -> Result<(), SourceError> {
                (**self).start()
            }

            fn current_items(&self) -> HashSet<T> {
                (**self).current_items()
            }

            fn dispose(&self) {
                (**self).dispose()
            }

            fn is_disposed(&self) -> bool {
                (**self).is_disposed()
            }
        }
    };
}

forward_item_set!(Box);
forward_item_set!(Arc);

/// Subscriber bookkeeping shared by the item set implementations.
pub(crate) struct SubscriberSlot<T> {
    sink: Option<EventSink<T>>,
    started: bool,
    disposed: bool,
}

impl<T> Default for SubscriberSlot<T> {
    fn default() -> Self {
        Self {
            sink: None,
            started: false,
            disposed: false,
        }
    }
}

impl<T> SubscriberSlot<T> {
    pub(crate) fn attach(&mut self, sink: EventSink<T>) -> Result<(), SourceError> {
        if self.disposed {
            return Err(SourceError::Disposed);
        }
        if self.sink.is_some() {
            return Err(SourceError::AlreadySubscribed);
        }
        self.sink = Some(sink);
        Ok(())
    }

    pub(crate) fn detach(&mut self) {
        self.sink = None;
    }

    /// Mark the set started.
    pub(crate) fn begin(&mut self) -> Result<(), SourceError> {
        if self.disposed {
            return Err(SourceError::Disposed);
        }
        if self.started {
            return Err(SourceError::AlreadyStarted);
        }
        self.started = true;
        Ok(())
    }

    /// Started and not yet disposed.
    pub(crate) fn is_live(&self) -> bool {
        self.started && !self.disposed
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub(crate) fn emit(&self, event: ItemEvent<T>) {
        if !self.is_live() {
            return;
        }
        if let Some(sink) = &self.sink {
            sink(event);
        }
    }

    pub(crate) fn close(&mut self) {
        self.sink = None;
        self.disposed = true;
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
