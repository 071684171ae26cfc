use std::mem;

/// Groups items into batches of at most `capacity`, preserving arrival order.
///
/// A full batch is handed out by [`push`](Self::push); the remainder is handed out by
/// [`finish`](Self::finish). Each emitted batch is a fresh `Vec`, so a caller holding a
/// previous batch never observes later pushes.
#[derive(Debug)]
pub struct BatchAccumulator<T> {
    capacity: usize,
    pending: Vec<T>,
}

impl<T> BatchAccumulator<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            pending: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Add an item; returns the completed batch once `capacity` is reached.
    pub fn push(&mut self, item: T) -> Option<Vec<T>> {
        self.pending.push(item);
        if self.pending.len() == self.capacity {
            Some(self.take())
        } else {
            None
        }
    }

    /// Flush the trailing partial batch, if any.
    pub fn finish(&mut self) -> Option<Vec<T>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    fn take(&mut self) -> Vec<T> {
        mem::replace(&mut self.pending, Vec::with_capacity(self.capacity))
    }
}
