//! The Executable Allocator (§4.8): hands out writable-then-executable
//! memory regions, keeps a process-global free list across compilations,
//! and is safe to call from multiple threads concurrently.
//!
//! Grounded on the `region` crate the way this project's own JIT crate uses
//! it (reserve with `region::alloc`, flip protection with `region::protect`
//! once the code is written, to stay W^X-friendly on platforms that enforce
//! it) and on the free-list/mutex shape described by the component design.

use std::sync::{Mutex, OnceLock};

use log::{debug, trace};
use region::Allocation;

use crate::error::{Error, Result};

/// Round `size` up to the allocator's block granularity (a host page),
/// matching §4.8's "allocations are rounded up to a block granularity."
fn round_up_to_page(size: usize) -> usize {
    let page = region::page::size().max(4096);
    (size + page - 1) / page * page
}

struct FreeBlock(Allocation);

// SAFETY: an `Allocation` is just an owned OS mapping; nothing here
// observes thread-affine state, and access to it is always serialized by
// `ALLOCATOR`'s mutex.
unsafe impl Send for FreeBlock {}

#[derive(Default)]
struct Allocator {
    // Kept address-sorted by size only; see `free` for why this crate
    // doesn't attempt address-range coalescing (the `region` crate doesn't
    // expose a way to grow an existing mapping in place).
    free_list: Vec<FreeBlock>,
}

impl Allocator {
    fn alloc(&mut self, size: usize) -> Result<Allocation> {
        let size = round_up_to_page(size);
        if let Some(idx) = self.free_list.iter().position(|b| b.0.len() >= size) {
            let block = self.free_list.remove(idx);
            trace!(
                "executable allocator: reusing a {} byte block from the free list",
                block.0.len()
            );
            return Ok(block.0);
        }

        let map = region::alloc(size, region::Protection::READ_WRITE)
            .map_err(|_| Error::ExecAllocFailed)?;
        debug!("executable allocator: reserved {} bytes from the OS", size);
        Ok(map)
    }

    /// Return a region to the free list for reuse by a later compilation.
    ///
    /// The original design coalesces adjacent freed regions; this crate's
    /// `region` dependency only exposes whole-mapping alloc/free, not raw
    /// `mmap`/`munmap`, so two independently-reserved regions can't be
    /// merged into one larger mapping even when they happen to be
    /// address-adjacent. Reuse is therefore keyed on size alone — still
    /// bounded by the same "don't keep re-asking the OS" goal, just without
    /// the address-merging refinement.
    fn free(&mut self, allocation: Allocation) {
        trace!(
            "executable allocator: released {} bytes to the free list",
            allocation.len()
        );
        self.free_list.push(FreeBlock(allocation));
    }

    fn free_unused(&mut self) {
        let n = self.free_list.len();
        self.free_list.clear();
        debug!("executable allocator: returned {} free block(s) to the OS", n);
    }
}

fn allocator() -> &'static Mutex<Allocator> {
    static ALLOCATOR: OnceLock<Mutex<Allocator>> = OnceLock::new();
    ALLOCATOR.get_or_init(|| Mutex::new(Allocator::default()))
}

/// An owned, executable region of memory. Dropping it does *not* free the
/// memory: the generated code outlives the `Compiler` that produced it and
/// is released explicitly via [`free_exec`] (§3 ownership, §8 invariant 5).
pub struct ExecMemory {
    allocation: Option<Allocation>,
}

impl ExecMemory {
    /// Raw pointer to the first byte of the region.
    pub fn as_ptr(&self) -> *mut u8 {
        self.allocation.as_ref().unwrap().as_ptr::<u8>() as *mut u8
    }

    /// Size in bytes actually backing this region (may exceed the
    /// requested size due to page rounding).
    pub fn size(&self) -> usize {
        self.allocation.as_ref().unwrap().len()
    }

    /// Write `code` into the (still writable) region. Must be called before
    /// [`ExecMemory::make_executable`].
    ///
    /// # Safety
    /// `code.len() <= self.size()`, and no other reference to this region's
    /// bytes may be alive.
    pub unsafe fn write(&mut self, code: &[u8]) {
        debug_assert!(code.len() <= self.size());
        std::ptr::copy_nonoverlapping(code.as_ptr(), self.as_ptr(), code.len());
    }

    /// Flip the region from read-write to read-execute, as required by
    /// platforms enforcing W^X, and flush the instruction cache over it.
    pub fn make_executable(&mut self) -> Result<()> {
        let (ptr, size) = (self.as_ptr(), self.size());
        // SAFETY: `ptr`/`size` describe this `ExecMemory`'s own region.
        unsafe {
            region::protect(ptr, size, region::Protection::READ_EXECUTE)
                .map_err(|_| Error::ExecAllocFailed)?;
        }
        crate::cache::flush(ptr, size);
        Ok(())
    }

    /// Temporarily reopen the region for writing (used by
    /// `set_jump_addr`/`set_const` self-modification after `generate_code`).
    ///
    /// # Safety
    /// The caller must not execute code in this region concurrently with
    /// the write, and must call [`ExecMemory::make_executable`] again
    /// before resuming execution.
    pub unsafe fn make_writable(&mut self) -> Result<()> {
        region::protect(self.as_ptr(), self.size(), region::Protection::READ_WRITE)
            .map_err(|_| Error::ExecAllocFailed)
    }

    /// Hand the backing allocation to the global free list. Consumes
    /// `self`; called exactly once, by [`crate::compiler::Compiler::free_code`].
    pub fn release(mut self) {
        if let Some(allocation) = self.allocation.take() {
            allocator().lock().unwrap().free(allocation);
        }
    }
}

/// Reserve `size` bytes of writable memory. The caller fills it in, then
/// calls [`ExecMemory::make_executable`] before returning a pointer to a
/// client.
pub fn alloc_exec(size: usize) -> Result<ExecMemory> {
    let allocation = allocator().lock().unwrap().alloc(size)?;
    Ok(ExecMemory {
        allocation: Some(allocation),
    })
}

/// Release a region back to the allocator's free list for reuse by a later
/// compilation. Prefer [`ExecMemory::release`]; this free function exists
/// for callers that only kept the raw pieces (e.g. across an FFI boundary).
pub fn free_unused() {
    allocator().lock().unwrap().free_unused();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_release_is_reused_by_the_free_list() {
        let mem = alloc_exec(64).unwrap();
        let size = mem.size();
        mem.release();
        let mem2 = alloc_exec(64).unwrap();
        assert!(mem2.size() >= size);
    }

    #[test]
    #[cfg(target_arch = "x86_64")]
    fn write_then_execute_roundtrips_a_constant_return() {
        // `mov eax, 7; ret`
        let code = [0xb8u8, 0x07, 0x00, 0x00, 0x00, 0xc3];
        let mut mem = alloc_exec(code.len()).unwrap();
        unsafe {
            mem.write(&code);
        }
        mem.make_executable().unwrap();
        let f: extern "C" fn() -> i32 = unsafe { std::mem::transmute(mem.as_ptr()) };
        assert_eq!(f(), 7);
    }
}
