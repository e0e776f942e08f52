//! Immutable sample storage
//!
//! Frames carry tens to hundreds of kilobytes of samples. A [`SampleBuffer`]
//! is allocated once at its final size, filled through a
//! [`SampleBufferBuilder`], and then shared by reference count. Transforms
//! always produce a new buffer.

use std::ops::Deref;
use std::sync::Arc;

/// Shared, immutable sample bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBuffer {
    data: Arc<[u8]>,
}

impl SampleBuffer {
    pub fn builder(capacity: usize) -> SampleBufferBuilder {
        SampleBufferBuilder::with_capacity(capacity)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Produce a new buffer of equal length.
    ///
    /// `f` receives the source bytes and a zeroed destination of the same
    /// length. The source buffer is left untouched.
    pub fn transform<F>(&self, f: F) -> SampleBuffer
    where
        F: FnOnce(&[u8], &mut [u8]),
    {
        let mut output = vec![0u8; self.data.len()];
        f(&self.data, &mut output);
        SampleBuffer { data: output.into() }
    }
}

impl Deref for SampleBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl AsRef<[u8]> for SampleBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for SampleBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self { data: data.into() }
    }
}

/// Append-only builder with a fixed capacity.
#[derive(Debug)]
pub struct SampleBufferBuilder {
    data: Vec<u8>,
    capacity: usize,
}

impl SampleBufferBuilder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: Vec::with_capacity(capacity), capacity }
    }

    /// Append bytes if they fit within the capacity.
    ///
    /// Returns `false` and leaves the builder unchanged when they do not.
    pub fn append(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.remaining() {
            return false;
        }
        self.data.extend_from_slice(bytes);
        true
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn is_full(&self) -> bool {
        self.data.len() == self.capacity
    }

    pub fn finish(self) -> SampleBuffer {
        SampleBuffer { data: self.data.into() }
    }
}
