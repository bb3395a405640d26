//! The single point of shared mutable state between the executor and the
//! refresher.
//!
//! Both slots live behind one mutex, so a configuration is always handed over
//! whole: `publish` replaces the pending slot and `take_pending` moves it into
//! the active slot inside the same critical section.

use crate::table::Configuration;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

struct Slots {
    active: Arc<Configuration>,
    pending: Option<Configuration>,
}

/// Holds the active configuration and at most one pending replacement.
pub struct ConfigStore {
    slots: Mutex<Slots>,
}

impl ConfigStore {
    /// Creates a store bootstrapped with the first fetched configuration.
    pub fn new(initial: Configuration) -> Self {
        Self {
            slots: Mutex::new(Slots {
                active: Arc::new(initial),
                pending: None,
            }),
        }
    }

    /// Overwrites the pending slot. An unconsumed previous value is dropped.
    ///
    /// Returns `true` if a pending configuration was replaced.
    pub async fn publish(&self, config: Configuration) -> bool {
        let mut slots = self.slots.lock().await;
        let replaced = slots.pending.replace(config).is_some();
        if replaced {
            debug!("Discarded an unconsumed pending configuration.");
        }
        replaced
    }

    /// Takes the pending configuration, if any, and makes it the active one.
    ///
    /// Returns the newly active configuration.
    pub async fn take_pending(&self) -> Option<Arc<Configuration>> {
        let mut slots = self.slots.lock().await;
        let next = Arc::new(slots.pending.take()?);
        slots.active = next.clone();
        Some(next)
    }

    /// A snapshot of the active configuration.
    ///
    /// Only the executor reads it, once, to seed its first cycle; after that
    /// the active table changes hands through `take_pending` alone.
    pub(crate) async fn active(&self) -> Arc<Configuration> {
        self.slots.lock().await.active.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{RawApproachTiming, SlotTable};

    fn config(green: f64, approaches: u32) -> Configuration {
        let records: Vec<_> = (1..=approaches)
            .map(|id| RawApproachTiming::new(id, green, 2.0, 3.0))
            .collect();
        SlotTable::default().build(&records).unwrap()
    }

    #[tokio::test]
    async fn take_pending_clears_the_slot_and_swaps_active() {
        let store = ConfigStore::new(config(5.0, 2));
        assert!(store.take_pending().await.is_none());

        assert!(!store.publish(config(9.0, 3)).await);
        let adopted = store.take_pending().await.expect("pending configuration");
        assert_eq!(*adopted, config(9.0, 3));
        assert_eq!(*store.active().await, config(9.0, 3));
        assert!(store.take_pending().await.is_none());
    }

    #[tokio::test]
    async fn publish_leaves_the_active_table_alone_until_taken() {
        let store = ConfigStore::new(config(5.0, 2));
        store.publish(config(9.0, 3)).await;
        assert_eq!(*store.active().await, config(5.0, 2));

        store.take_pending().await;
        assert_eq!(*store.active().await, config(9.0, 3));
    }

    #[tokio::test]
    async fn last_publish_wins() {
        let store = ConfigStore::new(config(5.0, 1));
        store.publish(config(6.0, 1)).await;
        assert!(store.publish(config(7.0, 2)).await);
        assert_eq!(*store.take_pending().await.unwrap(), config(7.0, 2));
        assert!(store.take_pending().await.is_none());
    }

    #[tokio::test]
    async fn publishing_the_same_configuration_twice_adopts_once() {
        let store = ConfigStore::new(config(5.0, 1));
        store.publish(config(8.0, 2)).await;
        store.publish(config(8.0, 2)).await;
        assert!(store.take_pending().await.is_some());
        assert!(store.take_pending().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_handoff_never_tears_a_configuration() {
        let store = Arc::new(ConfigStore::new(config(1.0, 1)));

        let producer = {
            let store = store.clone();
            tokio::spawn(async move {
                for n in 1..=200u32 {
                    let approaches = n % 4 + 1;
                    store.publish(config(f64::from(n), approaches)).await;
                    tokio::task::yield_now().await;
                }
            })
        };

        let consumer = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut adopted = Vec::new();
                for _ in 0..400 {
                    if let Some(next) = store.take_pending().await {
                        adopted.push(next);
                    }
                    tokio::task::yield_now().await;
                }
                adopted
            })
        };

        producer.await.unwrap();
        let adopted = consumer.await.unwrap();
        for cfg in adopted {
            let green = cfg.approaches()[0].phases()[0].duration().as_secs() as u32;
            assert_eq!(cfg.len() as u32, green % 4 + 1);
            assert!(cfg
                .approaches()
                .iter()
                .all(|a| a.phases()[0].duration().as_secs() as u32 == green));
        }
    }
}
