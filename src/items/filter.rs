//! Predicate filter over an item set.

use std::collections::HashSet;
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::{lock, EventSink, Item, ItemEvent, ItemSet, SubscriberSlot};
use crate::error::SourceError;

type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Narrows an item set to the items accepted by a predicate.
///
/// Only items that were surfaced as `Added` can later surface as `Removed`.
/// A predicate error counts as rejection: an item that vanished between
/// discovery and evaluation is not a failure of this layer. A rejected item
/// is evaluated again whenever the inner set reports it `Changed`.
pub struct FilteredSet<T: Item> {
    inner: Box<dyn ItemSet<T>>,
    predicate: Predicate<T>,
    state: Arc<Mutex<FilterState<T>>>,
}

struct FilterState<T> {
    slot: SubscriberSlot<T>,
    accepted: HashSet<T>,
}

impl<T: Item> FilteredSet<T> {
    /// Filter `inner` with a fallible predicate.
    pub fn new<S, P, E>(inner: S, predicate: P) -> Self
    where
        S: ItemSet<T> + 'static,
        P: Fn(&T) -> Result<bool, E> + Send + Sync + 'static,
        E: Display,
    {
        let predicate: Predicate<T> = Arc::new(move |item: &T| match predicate(item) {
            Ok(accepted) => accepted,
            Err(err) => {
                debug!(item = ?item, error = %err, "predicate failed, excluding item");
                false
            }
        });
        Self {
            inner: Box::new(inner),
            predicate,
            state: Arc::new(Mutex::new(FilterState {
                slot: SubscriberSlot::default(),
                accepted: HashSet::new(),
            })),
        }
    }

    /// Filter `inner` with an infallible predicate.
    pub fn from_fn<S, P>(inner: S, predicate: P) -> Self
    where
        S: ItemSet<T> + 'static,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::new(inner, move |item: &T| Ok::<bool, std::convert::Infallible>(predicate(item)))
    }
}

impl<T: Item> ItemSet<T> for FilteredSet<T> {
    fn subscribe(&self, sink: EventSink<T>) -> Result<(), SourceError> {
        lock(&self.state).slot.attach(sink)?;

        let state = self.state.clone();
        let predicate = self.predicate.clone();
        let forward: EventSink<T> = Arc::new(move |event: ItemEvent<T>| {
            let mut state = lock(&state);
            if !state.slot.is_live() {
                return;
            }
            match event {
                ItemEvent::Added(item) => {
                    if state.accepted.contains(&item) || predicate(&item) {
                        state.accepted.insert(item.clone());
                        state.slot.emit(ItemEvent::Added(item));
                    }
                }
                ItemEvent::Removed(item) => {
                    if state.accepted.remove(&item) {
                        state.slot.emit(ItemEvent::Removed(item));
                    }
                }
                // A rejected item is judged again once its contents change.
                ItemEvent::Changed(item) => {
                    if state.accepted.contains(&item) {
                        state.slot.emit(ItemEvent::Changed(item));
                    } else if predicate(&item) {
                        state.accepted.insert(item.clone());
                        state.slot.emit(ItemEvent::Added(item));
                    }
                }
                failed @ ItemEvent::Failed(_) => state.slot.emit(failed),
            }
        });

        if let Err(err) = self.inner.subscribe(forward) {
            lock(&self.state).slot.detach();
            return Err(err);
        }
        Ok(())
    }

    fn unsubscribe(&self) {
        self.inner.unsubscribe();
        lock(&self.state).slot.detach();
    }

    fn start(&self) -> Result<(), SourceError> {
        lock(&self.state).slot.begin()?;
        self.inner.start()
    }

    fn current_items(&self) -> HashSet<T> {
        lock(&self.state).accepted.clone()
    }

    fn dispose(&self) {
        self.inner.dispose();
        let mut state = lock(&self.state);
        state.slot.close();
        state.accepted.clear();
    }

    fn is_disposed(&self) -> bool {
        lock(&self.state).slot.is_disposed()
    }
}
