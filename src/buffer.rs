//! Fragment buffers: the two 4 KiB-chunked pools backing instruction bytes
//! and auxiliary metadata (§4.3).
//!
//! The original design prepends fixed-capacity fragments to a singly-linked
//! list for O(1) growth, then reverses the list before the assembler pass.
//! Rust's aliasing rules make the "return a stable raw pointer into a
//! fragment, store it in a jump/const record, mutate through it later" idiom
//! unsound without `unsafe`, so this implementation keeps the same growth
//! discipline (never move or copy already-written bytes) but hands back a
//! `(fragment_index, offset)` pair instead of a pointer. Emission order is
//! tracked directly (fragments are pushed, not prepended) so no reversal
//! pass is needed; see [`Buffer::into_bytes`].

/// Fragment capacity in bytes, matching the original's 4 KiB pool chunks.
pub const FRAGMENT_CAPACITY: usize = 4096;

/// Largest single allocation an `ensure` call may request.
pub const MAX_ENSURE: usize = 256;

/// A stable handle into a [`Buffer`], usable to patch previously emitted
/// bytes (jump/const patch sites).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPos {
    fragment: u32,
    offset: u32,
}

struct Fragment {
    bytes: Vec<u8>,
}

impl Fragment {
    fn new() -> Fragment {
        Fragment {
            bytes: Vec::with_capacity(FRAGMENT_CAPACITY),
        }
    }

    fn remaining(&self) -> usize {
        FRAGMENT_CAPACITY - self.bytes.len()
    }
}

/// A growable pool of fixed-capacity fragments. Two instances of this back
/// every [`crate::compiler::Compiler`]: the instruction buffer and the
/// auxiliary buffer.
pub struct Buffer {
    fragments: Vec<Fragment>,
}

impl Buffer {
    /// A buffer with no fragments yet.
    pub fn new() -> Buffer {
        Buffer {
            fragments: Vec::new(),
        }
    }

    /// Total bytes written across every fragment so far.
    pub fn len(&self) -> usize {
        self.fragments.iter().map(|f| f.bytes.len()).sum()
    }

    /// True if nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Reserve `size` bytes (`size <= MAX_ENSURE`), appending a fresh
    /// fragment if the current tail doesn't have room, and return a handle
    /// to the start of the reservation. The reservation is zero-filled; the
    /// caller writes into it via [`Buffer::write_at`] or appends more bytes
    /// immediately with [`Buffer::push`].
    pub fn ensure(&mut self, size: usize) -> BufferPos {
        debug_assert!(size <= MAX_ENSURE);
        if self
            .fragments
            .last()
            .map_or(true, |f| f.remaining() < size)
        {
            self.fragments.push(Fragment::new());
        }
        let idx = self.fragments.len() - 1;
        let frag = &mut self.fragments[idx];
        let offset = frag.bytes.len();
        frag.bytes.resize(offset + size, 0);
        BufferPos {
            fragment: idx as u32,
            offset: offset as u32,
        }
    }

    /// Append `data` to the tail fragment, growing the pool as needed, and
    /// return a handle to where it starts.
    pub fn push(&mut self, data: &[u8]) -> BufferPos {
        let pos = self.ensure(data.len());
        self.write_at(pos, data);
        pos
    }

    /// Overwrite previously-reserved bytes at `pos`. Used both by emission
    /// (filling in a reservation right away) and by the assembler pass /
    /// self-modification APIs (patching a jump or constant site).
    pub fn write_at(&mut self, pos: BufferPos, data: &[u8]) {
        let frag = &mut self.fragments[pos.fragment as usize];
        let start = pos.offset as usize;
        frag.bytes[start..start + data.len()].copy_from_slice(data);
    }

    /// Read back previously-written bytes at `pos`.
    pub fn read_at(&self, pos: BufferPos, len: usize) -> &[u8] {
        let frag = &self.fragments[pos.fragment as usize];
        let start = pos.offset as usize;
        &frag.bytes[start..start + len]
    }

    /// The absolute byte offset of `pos` within the buffer as if it were one
    /// contiguous array, i.e. the offset it will have after [`Buffer::into_bytes`].
    pub fn absolute_offset(&self, pos: BufferPos) -> usize {
        let preceding: usize = self.fragments[..pos.fragment as usize]
            .iter()
            .map(|f| f.bytes.len())
            .sum();
        preceding + pos.offset as usize
    }

    /// Flatten every fragment into one contiguous byte vector, in emission
    /// order. This is the "reverse the prepended list" step of the
    /// assembler pass (§4.7b), made unnecessary by emitting into a `Vec` of
    /// fragments in forward order to begin with; the invariant it upholds is
    /// the same one tested in `fragment order after reversal equals the
    /// emission order` (§8 invariant 4).
    pub fn into_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for frag in self.fragments {
            out.extend_from_slice(&frag.bytes);
        }
        out
    }
}

impl Default for Buffer {
    fn default() -> Buffer {
        Buffer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_carves_from_head_fragment_when_it_fits() {
        let mut b = Buffer::new();
        let p0 = b.ensure(8);
        let p1 = b.ensure(8);
        assert_eq!(p0.fragment, p1.fragment);
        assert_eq!(p1.offset, p0.offset + 8);
    }

    #[test]
    fn ensure_starts_a_new_fragment_when_full() {
        let mut b = Buffer::new();
        b.ensure(FRAGMENT_CAPACITY - 4);
        let p1 = b.ensure(8);
        assert_eq!(p1.fragment, 1);
        assert_eq!(p1.offset, 0);
    }

    #[test]
    fn emission_order_equals_flattened_order() {
        let mut b = Buffer::new();
        b.push(&[1, 2, 3]);
        b.push(&[4, 5]);
        assert_eq!(b.into_bytes(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn write_at_patches_in_place() {
        let mut b = Buffer::new();
        let pos = b.push(&[0, 0, 0, 0]);
        b.write_at(pos, &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(b.read_at(pos, 4), &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn total_size_matches_sum_of_fragments() {
        let mut b = Buffer::new();
        b.ensure(FRAGMENT_CAPACITY - 4);
        b.ensure(8);
        assert_eq!(b.len(), FRAGMENT_CAPACITY - 4 + 8);
    }
}
