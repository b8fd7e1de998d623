//! Single-reader measurement buffers
//!
//! A sensor driver owns a [`SensorFeed`] and overwrites the latest
//! measurement whenever one arrives; the consumer owns the matching
//! [`SensorSlot`]. The slot holds at most one unread measurement and every
//! measurement is handed out at most once.

use crate::error::{CoreError, Result};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::warn;

/// Create a connected feed/slot pair for the named sensor
pub fn sensor_slot<T>(name: &'static str) -> (SensorFeed<T>, SensorSlot<T>) {
    let (tx, rx) = watch::channel(None);
    (SensorFeed { name, tx }, SensorSlot { name, rx })
}

/// Producer side of a measurement buffer
#[derive(Debug)]
pub struct SensorFeed<T> {
    name: &'static str,
    tx: watch::Sender<Option<T>>,
}

impl<T> SensorFeed<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Replace the buffered measurement, dropping any unread one
    pub fn publish(&self, value: T) {
        self.tx.send_replace(Some(value));
    }

    /// Open another slot on this feed. Whatever is buffered right now counts
    /// as already read for the new slot.
    pub fn subscribe(&self) -> SensorSlot<T> {
        SensorSlot {
            name: self.name,
            rx: self.tx.subscribe(),
        }
    }
}

/// Consumer side of a measurement buffer
#[derive(Debug)]
pub struct SensorSlot<T> {
    name: &'static str,
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone> SensorSlot<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Mark whatever is buffered as consumed so the next take waits for a
    /// measurement published after this call.
    pub fn discard(&mut self) {
        self.rx.borrow_and_update();
    }

    /// Take the unread measurement, if any, without waiting
    ///
    /// A measurement published before the feed was dropped is still handed
    /// out; only an empty, closed slot reports [`CoreError::ChannelClosed`].
    pub fn try_take(&mut self) -> Result<Option<T>> {
        {
            let latest = self.rx.borrow_and_update();
            if latest.has_changed() {
                return Ok(latest.clone());
            }
        }
        self.rx
            .has_changed()
            .map_err(|_| CoreError::ChannelClosed(self.name))?;
        Ok(None)
    }

    /// Wait for an unread measurement and consume it.
    ///
    /// Logs a warning every `poll_interval` while stalled and fails with
    /// [`CoreError::CaptureTimeout`] once `timeout` has elapsed.
    pub async fn take(&mut self, poll_interval: Duration, timeout: Duration) -> Result<T> {
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            if let Some(value) = self.try_take()? {
                return Ok(value);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CoreError::CaptureTimeout {
                    sensor: self.name,
                    waited: now - started,
                });
            }
            let wait = poll_interval.min(deadline - now);
            match tokio::time::timeout(wait, self.rx.changed()).await {
                Ok(Ok(())) => {}
                // Closed: the next try_take drains a final value or reports it.
                Ok(Err(_)) => {}
                Err(_) => warn!(sensor = self.name, "Waiting on {} measurement", self.name),
            }
        }
    }
}
