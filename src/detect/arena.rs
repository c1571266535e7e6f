use thiserror::Error;

/// Regions start on 16-byte boundaries (4 floats).
const ALIGN_FLOATS: usize = 4;

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ArenaError {
    #[error("arena handle from generation {handle} used after reset (now {current})")]
    StaleHandle { handle: u64, current: u64 },

    #[error("arena exhausted: requested {requested} floats, {available} available")]
    OutOfCapacity { requested: usize, available: usize },
}

/// Opaque reference to a region handed out by `ScratchArena::allocate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaHandle {
    offset: usize,
    len: usize,
    generation: u64,
}

impl ArenaHandle {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Bump allocator for per-call scratch tensors.
///
/// Backing storage grows on demand up to `limit` floats. `reset` rewinds the
/// cursor and bumps the generation, so handles issued before it are refused.
#[derive(Debug)]
pub struct ScratchArena {
    storage: Vec<f32>,
    used: usize,
    limit: usize,
    generation: u64,
}

impl ScratchArena {
    pub fn new(limit: usize) -> Self {
        Self {
            storage: Vec::new(),
            used: 0,
            limit,
            generation: 0,
        }
    }

    pub fn allocate(&mut self, len: usize) -> Result<ArenaHandle, ArenaError> {
        let offset = self.used.div_ceil(ALIGN_FLOATS) * ALIGN_FLOATS;
        let end = offset.saturating_add(len);
        if end > self.limit {
            return Err(ArenaError::OutOfCapacity {
                requested: len,
                available: self.limit.saturating_sub(offset),
            });
        }
        if end > self.storage.len() {
            self.storage.resize(end, 0.0);
        }
        self.storage[offset..end].fill(0.0);
        self.used = end;
        Ok(ArenaHandle {
            offset,
            len,
            generation: self.generation,
        })
    }

    pub fn get(&self, handle: ArenaHandle) -> Result<&[f32], ArenaError> {
        self.check(handle)?;
        Ok(&self.storage[handle.offset..handle.offset + handle.len])
    }

    pub fn get_mut(&mut self, handle: ArenaHandle) -> Result<&mut [f32], ArenaError> {
        self.check(handle)?;
        Ok(&mut self.storage[handle.offset..handle.offset + handle.len])
    }

    /// Invalidate every outstanding handle and reuse the storage.
    pub fn reset(&mut self) {
        self.used = 0;
        self.generation += 1;
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn check(&self, handle: ArenaHandle) -> Result<(), ArenaError> {
        if handle.generation != self.generation {
            return Err(ArenaError::StaleHandle {
                handle: handle.generation,
                current: self.generation,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_are_aligned_and_disjoint() {
        let mut arena = ScratchArena::new(64);
        let a = arena.allocate(3).unwrap();
        let b = arena.allocate(5).unwrap();
        assert_eq!(b.offset % ALIGN_FLOATS, 0);
        arena.get_mut(a).unwrap().fill(1.0);
        arena.get_mut(b).unwrap().fill(2.0);
        assert_eq!(arena.get(a).unwrap(), &[1.0; 3]);
        assert_eq!(arena.get(b).unwrap(), &[2.0; 5]);
    }

    #[test]
    fn reset_rejects_old_handles() {
        let mut arena = ScratchArena::new(16);
        let handle = arena.allocate(8).unwrap();
        arena.reset();
        assert_eq!(
            arena.get(handle),
            Err(ArenaError::StaleHandle {
                handle: 0,
                current: 1
            })
        );
        let fresh = arena.allocate(8).unwrap();
        assert!(arena.get(fresh).unwrap().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn limit_is_enforced() {
        let mut arena = ScratchArena::new(10);
        arena.allocate(6).unwrap();
        assert_eq!(
            arena.allocate(4),
            Err(ArenaError::OutOfCapacity {
                requested: 4,
                available: 2
            })
        );
    }
}
