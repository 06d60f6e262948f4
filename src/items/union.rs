//! Union of several item sets.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::warn;

use super::{lock, EventSink, Item, ItemEvent, ItemSet, SubscriberSlot};
use crate::error::SourceError;

/// Merges the events and snapshots of several sources.
///
/// Sources are expected to be disjoint. An item reported by two sources is
/// forwarded as two `Added` events.
pub struct UnionSet<T: Item> {
    sources: Vec<Box<dyn ItemSet<T>>>,
    slot: Arc<Mutex<SubscriberSlot<T>>>,
}

impl<T: Item> UnionSet<T> {
    pub fn new(sources: Vec<Box<dyn ItemSet<T>>>) -> Self {
        Self {
            sources,
            slot: Arc::new(Mutex::new(SubscriberSlot::default())),
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl<T: Item> ItemSet<T> for UnionSet<T> {
    fn subscribe(&self, sink: EventSink<T>) -> Result<(), SourceError> {
        lock(&self.slot).attach(sink)?;

        for (index, source) in self.sources.iter().enumerate() {
            let slot = self.slot.clone();
            let forward: EventSink<T> = Arc::new(move |event: ItemEvent<T>| {
                lock(&slot).emit(event);
            });
            if let Err(err) = source.subscribe(forward) {
                for subscribed in &self.sources[..index] {
                    subscribed.unsubscribe();
                }
                lock(&self.slot).detach();
                return Err(err);
            }
        }
        Ok(())
    }

    fn unsubscribe(&self) {
        for source in &self.sources {
            source.unsubscribe();
        }
        lock(&self.slot).detach();
    }

    /// Starts every source even if some fail; failures are collected into
    /// [`SourceError::Partial`].
    fn start(&self) -> Result<(), SourceError> {
        // Sources emit through the slot while starting, so it must not be
        // held here.
        lock(&self.slot).begin()?;

        let mut errors = Vec::new();
        for source in &self.sources {
            if let Err(err) = source.start() {
                warn!(error = %err, "union member failed to start");
                errors.push(err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SourceError::Partial {
                total: self.sources.len(),
                errors,
            })
        }
    }

    fn current_items(&self) -> HashSet<T> {
        self.sources
            .iter()
            .flat_map(|source| source.current_items())
            .collect()
    }

    fn dispose(&self) {
        for source in &self.sources {
            source.dispose();
        }
        lock(&self.slot).close();
    }

    fn is_disposed(&self) -> bool {
        lock(&self.slot).is_disposed()
    }
}
