//! Cyclic process-id allocation for guest runtime instances.

use pressbox_shared::{PressboxError, PressboxResult};

/// Hands out ids from `[first_id, first_id + range_length - 1]`, wrapping back
/// to `first_id` after the last one.
///
/// Each sequencer owns its own allocator, so independent sequencers never
/// share a cursor.
#[derive(Debug, Clone)]
pub struct ProcessIdAllocator {
    first_id: u64,
    last_id: u64,
    next_id: u64,
}

impl ProcessIdAllocator {
    /// Create an allocator. A range of length 1 hands out the same id forever.
    pub fn new(first_id: u64, range_length: u64) -> PressboxResult<Self> {
        if range_length == 0 {
            return Err(PressboxError::Config(
                "process id range must hold at least one id".into(),
            ));
        }
        let last_id = first_id.checked_add(range_length - 1).ok_or_else(|| {
            PressboxError::Config(format!(
                "process id range starting at {} with length {} overflows",
                first_id, range_length
            ))
        })?;

        Ok(Self {
            first_id,
            last_id,
            next_id: first_id,
        })
    }

    pub fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = if id < self.last_id {
            id + 1
        } else {
            self.first_id
        };
        id
    }

    pub fn first_id(&self) -> u64 {
        self.first_id
    }

    pub fn last_id(&self) -> u64 {
        self.last_id
    }
}
