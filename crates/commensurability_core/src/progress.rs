//! Progress hooks for image assembly.
//!
//! Reporting never influences results; an analysis built with
//! `progressbar = false` emits no events at all.

use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Integration of batch `batch` (0-based) of `total` is about to start.
    BatchStarted { batch: usize, total: usize, len: usize },
    /// Orbit `index` of the current batch has been evaluated and written.
    OrbitEvaluated { batch: usize, index: usize, len: usize },
    /// Every pixel of the image has been written.
    Finished { pixels: usize },
}

pub trait ProgressObserver {
    fn report(&mut self, event: ProgressEvent);
}

impl<F: FnMut(ProgressEvent)> ProgressObserver for F {
    fn report(&mut self, event: ProgressEvent) {
        self(event)
    }
}

/// Default observer: batch-level `info` events, orbit-level `debug` events.
#[derive(Debug)]
pub struct TracingProgress {
    started: Instant,
    batch_started: Instant,
}

impl TracingProgress {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            batch_started: now,
        }
    }
}

impl Default for TracingProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for TracingProgress {
    fn report(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::BatchStarted { batch, total, len } => {
                self.batch_started = Instant::now();
                info!(batch = batch + 1, total, orbits = len, "Integrating batch");
            }
            ProgressEvent::OrbitEvaluated { batch, index, len } => {
                debug!(batch = batch + 1, orbit = index + 1, of = len, "Orbit evaluated");
                if index + 1 == len {
                    debug!(
                        batch = batch + 1,
                        elapsed_ms = self.batch_started.elapsed().as_millis() as u64,
                        "Batch complete"
                    );
                }
            }
            ProgressEvent::Finished { pixels } => {
                info!(
                    pixels,
                    elapsed_ms = self.started.elapsed().as_millis() as u64,
                    "Image complete"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_observers() {
        let mut seen = Vec::new();
        {
            let mut observer = |event: ProgressEvent| seen.push(event);
            observer.report(ProgressEvent::Finished { pixels: 3 });
        }
        assert_eq!(seen, vec![ProgressEvent::Finished { pixels: 3 }]);
    }

    #[test]
    fn tracing_observer_accepts_every_event() {
        let mut observer = TracingProgress::new();
        observer.report(ProgressEvent::BatchStarted {
            batch: 0,
            total: 1,
            len: 1,
        });
        observer.report(ProgressEvent::OrbitEvaluated {
            batch: 0,
            index: 0,
            len: 1,
        });
        observer.report(ProgressEvent::Finished { pixels: 1 });
    }
}
