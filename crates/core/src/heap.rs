//! Heap-bound `sbrk` hook.
//!
//! ```text
//! #  .data  #  .bss  #       heap        #        MSP stack         #
//! #         #        #                   # reserved: min_stack_size #
//! ^ RAM start        ^ heap_start                 stack_top, RAM end ^
//! ```
//!
//! The heap grows upwards from `heap_start` and may never cross
//! `stack_top - min_stack_size`.

use serde::{Deserialize, Serialize};

/// `errno` value reported after a rejected request.
pub const ENOMEM: i32 = 12;

/// RAM bounds supplied by the link step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapLayout {
    /// End of static data (`_end` / `__sheap`).
    pub heap_start: usize,
    /// Top of RAM (`_estack` / `_stack_start`).
    pub stack_top: usize,
    /// Bytes reserved below `stack_top` for the main stack (`_Min_Stack_Size`).
    pub min_stack_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("reserved stack of {min_stack_size:#x} bytes does not fit below {stack_top:#x}")]
    StackUnderflow {
        stack_top: usize,
        min_stack_size: usize,
    },
    #[error("heap start {heap_start:#x} lies above the stack limit {limit:#x}")]
    HeapAboveLimit { heap_start: usize, limit: usize },
}

impl HeapLayout {
    pub const fn new(heap_start: usize, stack_top: usize, min_stack_size: usize) -> Self {
        Self {
            heap_start,
            stack_top,
            min_stack_size,
        }
    }

    /// Highest address the heap-end pointer may reach.
    pub fn limit(&self) -> Option<usize> {
        self.stack_top.checked_sub(self.min_stack_size)
    }

    pub fn capacity(&self) -> usize {
        self.limit()
            .map_or(0, |limit| limit.saturating_sub(self.heap_start))
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        let limit = self.limit().ok_or(LayoutError::StackUnderflow {
            stack_top: self.stack_top,
            min_stack_size: self.min_stack_size,
        })?;
        if self.heap_start > limit {
            return Err(LayoutError::HeapAboveLimit {
                heap_start: self.heap_start,
                limit,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("out of memory: break {heap_end:#x} cannot move by {increment} (limit {limit:#x})")]
pub struct OutOfMemory {
    pub heap_end: usize,
    pub increment: isize,
    pub limit: usize,
}

/// Owner of the heap-end pointer.
#[derive(Debug, Clone)]
pub struct SbrkHeap {
    layout: HeapLayout,
    heap_end: Option<usize>,
    errno: i32,
}

impl SbrkHeap {
    pub const fn new(layout: HeapLayout) -> Self {
        Self {
            layout,
            heap_end: None,
            errno: 0,
        }
    }

    pub fn layout(&self) -> &HeapLayout {
        &self.layout
    }

    /// Moves the break by `increment` bytes and returns the old break.
    ///
    /// The first call pins the break to `heap_start`. A request that would
    /// cross the stack limit, drop below `heap_start` or overflow the address
    /// space sets `errno` to [`ENOMEM`] and leaves the break where it was.
    pub fn sbrk(&mut self, increment: isize) -> Result<usize, OutOfMemory> {
        let prev = *self.heap_end.get_or_insert(self.layout.heap_start);
        let limit = self.layout.limit().unwrap_or(0);

        let next = prev
            .checked_add_signed(increment)
            .filter(|&next| next <= limit && next >= self.layout.heap_start);

        match next {
            Some(next) => {
                self.heap_end = Some(next);
                tracing::trace!("sbrk({}) -> {:#x}, break now {:#x}", increment, prev, next);
                Ok(prev)
            }
            None => {
                self.errno = ENOMEM;
                tracing::debug!(
                    "sbrk({}) rejected: break {:#x}, limit {:#x}",
                    increment,
                    prev,
                    limit
                );
                Err(OutOfMemory {
                    heap_end: prev,
                    increment,
                    limit,
                })
            }
        }
    }

    /// Current break. Equals `heap_start` before the first request.
    pub fn heap_end(&self) -> usize {
        self.heap_end.unwrap_or(self.layout.heap_start)
    }

    pub fn used(&self) -> usize {
        self.heap_end() - self.layout.heap_start
    }

    pub fn remaining(&self) -> usize {
        self.layout
            .limit()
            .map_or(0, |limit| limit.saturating_sub(self.heap_end()))
    }

    /// Sticky error indicator, like C `errno`.
    pub fn errno(&self) -> i32 {
        self.errno
    }

    pub fn clear_errno(&mut self) {
        self.errno = 0;
    }
}
