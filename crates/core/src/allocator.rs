//! Global allocator that grows its arena through [`SbrkHeap::sbrk`].

use core::alloc::{GlobalAlloc, Layout};
use core::cell::RefCell;
use core::mem::size_of;
use core::ptr::{self, NonNull};

use critical_section::Mutex;
use linked_list_allocator::Heap;

use crate::heap::{HeapLayout, LayoutError, SbrkHeap};

const WORD: usize = size_of::<usize>();
/// Smallest step the break moves by. Room for a free-list hole header.
const MIN_GROWTH: usize = 4 * WORD;

/// First-fit free-list allocator whose arena ends at the program break.
///
/// The arena starts empty. When no hole fits a request the break is moved
/// up with `sbrk` and the new bytes are appended to the free list. The break
/// never moves back down; freed blocks are reused in place.
pub struct SbrkAllocator {
    state: Mutex<RefCell<Option<Arena>>>,
}

struct Arena {
    brk: SbrkHeap,
    heap: Heap,
}

/// Bytes to request from `sbrk` so that `layout` fits in the new tail.
fn growth_for(layout: Layout) -> Option<usize> {
    let size = layout.size().max(MIN_GROWTH).checked_add(WORD - 1)? & !(WORD - 1);
    if layout.align() > WORD {
        size.checked_add(layout.align() + 2 * WORD)
    } else {
        Some(size)
    }
}

impl Arena {
    fn alloc(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        if self.heap.size() > 0 {
            if let Ok(block) = self.heap.allocate_first_fit(layout) {
                return Some(block);
            }
        }
        self.grow(growth_for(layout)?)?;
        self.heap.allocate_first_fit(layout).ok()
    }

    fn grow(&mut self, by: usize) -> Option<()> {
        let prev = self.brk.sbrk(isize::try_from(by).ok()?).ok()?;
        // SAFETY: `sbrk` just handed out `prev..prev + by`, directly above
        // the current arena, and it is never handed out again.
        unsafe {
            if self.heap.size() == 0 {
                self.heap.init(prev as *mut u8, by);
            } else {
                self.heap.extend(by);
            }
        }
        Some(())
    }
}

impl SbrkAllocator {
    pub const fn empty() -> Self {
        Self {
            state: Mutex::new(RefCell::new(None)),
        }
    }

    /// Binds the allocator to a RAM layout. Later calls are ignored.
    ///
    /// # Safety
    ///
    /// `heap_start..stack_top - min_stack_size` must be RAM that nothing
    /// else uses, and `heap_start` must be word aligned.
    pub unsafe fn init(&self, layout: HeapLayout) -> Result<(), LayoutError> {
        layout.validate()?;
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.is_none() {
                *state = Some(Arena {
                    brk: SbrkHeap::new(layout),
                    heap: Heap::empty(),
                });
            }
        });
        Ok(())
    }

    /// Bytes between `heap_start` and the current break.
    pub fn used(&self) -> usize {
        self.with_arena(|arena| arena.brk.used()).unwrap_or(0)
    }

    pub fn remaining(&self) -> usize {
        self.with_arena(|arena| arena.brk.remaining()).unwrap_or(0)
    }

    /// Bytes currently handed out to live allocations.
    pub fn allocated(&self) -> usize {
        self.with_arena(|arena| arena.heap.used()).unwrap_or(0)
    }

    pub fn errno(&self) -> i32 {
        self.with_arena(|arena| arena.brk.errno()).unwrap_or(0)
    }

    fn with_arena<R>(&self, f: impl FnOnce(&Arena) -> R) -> Option<R> {
        critical_section::with(|cs| self.state.borrow_ref(cs).as_ref().map(f))
    }
}

unsafe impl GlobalAlloc for SbrkAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        critical_section::with(|cs| {
            match self.state.borrow_ref_mut(cs).as_mut() {
                Some(arena) => arena.alloc(layout).map_or(ptr::null_mut(), NonNull::as_ptr),
                None => ptr::null_mut(),
            }
        })
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let Some(block) = NonNull::new(ptr) else {
            return;
        };
        critical_section::with(|cs| {
            if let Some(arena) = self.state.borrow_ref_mut(cs).as_mut() {
                arena.heap.deallocate(block, layout);
            }
        });
    }
}
