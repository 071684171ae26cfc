use crate::tiling::Window;
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Told about every tile written to the mosaic, in write order.
///
/// Receives a copy of the written window and nothing else, so it cannot steer the run.
pub trait ProgressReporter {
    fn tile_written(&mut self, window: Window);
}

impl<F: FnMut(Window)> ProgressReporter for F {
    fn tile_written(&mut self, window: Window) {
        self(window)
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn tile_written(&mut self, _window: Window) {}
}

/// Logs a line every `every` tiles.
pub struct LogProgress {
    total: Option<usize>,
    every: usize,
    written: usize,
}

impl LogProgress {
    pub fn new(total: Option<usize>, every: usize) -> Self {
        Self {
            total,
            every: every.max(1),
            written: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl ProgressReporter for LogProgress {
    fn tile_written(&mut self, _window: Window) {
        self.written += 1;
        if self.written % self.every != 0 {
            return;
        }
        match self.total {
            Some(total) => info!(
                "Processed {}/{} tiles ({:.1}%)",
                self.written,
                total,
                100.0 * self.written as f64 / total.max(1) as f64
            ),
            None => info!("Processed {} tiles", self.written),
        }
    }
}

/// Cooperative cancellation, polled between tiles and batches.
pub trait CancellationToken {
    fn is_cancelled(&self) -> bool;
}

pub struct NeverCancel;

impl CancellationToken for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl CancellationToken for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

impl<T: CancellationToken + ?Sized> CancellationToken for Arc<T> {
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}
