//! Pre-allocated tensor buffers shared across `detect` calls.
//!
//! One input and one output buffer, each behind an in-use flag. Acquisition
//! never waits: if the flag is already set the caller gets `PoolError::InUse`
//! and is expected to fall back to scratch memory. The flag is cleared when
//! the lease drops, on every exit path.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    Input,
    Output,
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferKind::Input => f.write_str("input"),
            BufferKind::Output => f.write_str("output"),
        }
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("pooled {0} buffer is already in use")]
    InUse(BufferKind),
}

struct Slot {
    kind: BufferKind,
    in_use: AtomicBool,
    capacity_bytes: AtomicUsize,
    data: Mutex<Vec<f32>>,
}

impl Slot {
    fn new(kind: BufferKind, len: usize) -> Self {
        Self {
            kind,
            in_use: AtomicBool::new(false),
            capacity_bytes: AtomicUsize::new(len * std::mem::size_of::<f32>()),
            data: Mutex::new(vec![0.0; len]),
        }
    }

    fn acquire(&self) -> Result<BufferLease<'_>, PoolError> {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PoolError::InUse(self.kind));
        }
        // Only a lease that is mid-drop can still hold the lock here.
        let guard = self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(BufferLease {
            in_use: &self.in_use,
            capacity_bytes: &self.capacity_bytes,
            guard,
        })
    }
}

/// Exclusive access to one pooled buffer.
pub struct BufferLease<'a> {
    in_use: &'a AtomicBool,
    capacity_bytes: &'a AtomicUsize,
    guard: MutexGuard<'a, Vec<f32>>,
}

impl Deref for BufferLease<'_> {
    type Target = Vec<f32>;

    fn deref(&self) -> &Vec<f32> {
        &self.guard
    }
}

impl DerefMut for BufferLease<'_> {
    fn deref_mut(&mut self) -> &mut Vec<f32> {
        &mut self.guard
    }
}

impl Drop for BufferLease<'_> {
    fn drop(&mut self) {
        self.capacity_bytes.store(
            self.guard.capacity() * std::mem::size_of::<f32>(),
            Ordering::Relaxed,
        );
        self.in_use.store(false, Ordering::Release);
    }
}

pub struct PooledBuffers {
    input: Slot,
    output: Slot,
}

impl PooledBuffers {
    pub fn new(input_len: usize, output_len: usize) -> Self {
        Self {
            input: Slot::new(BufferKind::Input, input_len),
            output: Slot::new(BufferKind::Output, output_len),
        }
    }

    /// Lease the input buffer, resized to `len` floats.
    pub fn acquire_input(&self, len: usize) -> Result<BufferLease<'_>, PoolError> {
        let mut lease = self.input.acquire()?;
        lease.resize(len, 0.0);
        Ok(lease)
    }

    pub fn acquire_output(&self) -> Result<BufferLease<'_>, PoolError> {
        self.output.acquire()
    }

    pub fn is_in_use(&self, kind: BufferKind) -> bool {
        match kind {
            BufferKind::Input => self.input.in_use.load(Ordering::Acquire),
            BufferKind::Output => self.output.in_use.load(Ordering::Acquire),
        }
    }

    /// Bytes reserved by both buffers, as of the last released lease.
    pub fn memory_usage(&self) -> usize {
        self.input.capacity_bytes.load(Ordering::Relaxed)
            + self.output.capacity_bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_fast() {
        let pool = PooledBuffers::new(12, 5);
        let lease = pool.acquire_input(12).unwrap();
        assert_eq!(lease.len(), 12);
        assert_eq!(
            pool.acquire_input(12).err(),
            Some(PoolError::InUse(BufferKind::Input))
        );
        // The output buffer is independent.
        assert!(pool.acquire_output().is_ok());
    }

    #[test]
    fn drop_releases_flag() {
        let pool = PooledBuffers::new(4, 4);
        {
            let mut lease = pool.acquire_output().unwrap();
            lease.push(1.0);
            assert!(pool.is_in_use(BufferKind::Output));
        }
        assert!(!pool.is_in_use(BufferKind::Output));
        assert!(pool.acquire_output().is_ok());
    }

    #[test]
    fn flag_released_after_panic_in_holder() {
        let pool = PooledBuffers::new(4, 4);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _lease = pool.acquire_input(4).unwrap();
            panic!("holder failed");
        }));
        assert!(result.is_err());
        assert!(pool.acquire_input(4).is_ok());
    }

    #[test]
    fn memory_usage_counts_both_buffers() {
        let pool = PooledBuffers::new(100, 50);
        assert_eq!(pool.memory_usage(), 150 * 4);
        {
            let mut lease = pool.acquire_output().unwrap();
            lease.resize(500, 0.0);
        }
        assert!(pool.memory_usage() >= 600 * 4);
    }
}
