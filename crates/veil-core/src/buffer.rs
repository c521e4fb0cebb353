use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("write of {requested} bytes exceeds the {remaining} bytes remaining")]
    Overflow { requested: usize, remaining: usize },
    #[error("read of {requested} bytes exceeds the {remaining} bytes remaining")]
    Underflow { requested: usize, remaining: usize },
    #[error("position {position} beyond limit {limit}")]
    PositionOutOfBounds { position: usize, limit: usize },
}

enum Storage<'a> {
    /// Contiguous memory owned by the buffer itself.
    Heap(Box<[u8]>),
    /// Externally-pinned region the buffer borrows but never reallocates.
    Pinned(&'a mut [u8]),
}

impl Storage<'_> {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Heap(bytes) => bytes,
            Storage::Pinned(region) => region,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Storage::Heap(bytes) => bytes,
            Storage::Pinned(region) => region,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Storage::Heap(_) => "heap",
            Storage::Pinned(_) => "pinned",
        }
    }
}

/// Cursor-style byte buffer used on both sides of the engine boundary.
///
/// An `IoBuffer` tracks a `position` and a `limit` over fixed-capacity
/// storage. Writes fill `[position, limit)` and advance `position`; `flip`
/// turns a filled buffer into a readable one; `compact` preserves unread
/// bytes while reopening the rest of the capacity for writing. The two
/// backings behave identically: callers never branch on which kind they
/// hold, and position deltas always equal the exact byte counts moved.
pub struct IoBuffer<'a> {
    storage: Storage<'a>,
    position: usize,
    limit: usize,
}

impl IoBuffer<'static> {
    /// Allocate a buffer backed by owned heap memory.
    pub fn allocate(capacity: usize) -> Self {
        Self {
            storage: Storage::Heap(vec![0u8; capacity].into_boxed_slice()),
            position: 0,
            limit: capacity,
        }
    }
}

impl<'a> IoBuffer<'a> {
    /// Wrap an externally-pinned region. The buffer uses the region in place
    /// and never copies it elsewhere.
    pub fn pinned(region: &'a mut [u8]) -> Self {
        let capacity = region.len();
        Self {
            storage: Storage::Pinned(region),
            position: 0,
            limit: capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.as_slice().len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    /// Move the cursor to an absolute offset within `[0, limit]`.
    pub fn set_position(&mut self, position: usize) -> Result<(), BufferError> {
        if position > self.limit {
            return Err(BufferError::PositionOutOfBounds {
                position,
                limit: self.limit,
            });
        }
        self.position = position;
        Ok(())
    }

    /// The readable (or writable) window `[position, limit)`.
    pub fn remaining_slice(&self) -> &[u8] {
        &self.storage.as_slice()[self.position..self.limit]
    }

    /// Advance the cursor past `count` bytes that the caller has consumed
    /// through [`remaining_slice`](Self::remaining_slice).
    pub fn advance(&mut self, count: usize) -> Result<(), BufferError> {
        if count > self.remaining() {
            return Err(BufferError::Underflow {
                requested: count,
                remaining: self.remaining(),
            });
        }
        self.position += count;
        Ok(())
    }

    /// Copy `bytes` into the buffer at the cursor, advancing it. All-or-
    /// nothing: on overflow the buffer is untouched.
    pub fn put_slice(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        if bytes.len() > self.remaining() {
            return Err(BufferError::Overflow {
                requested: bytes.len(),
                remaining: self.remaining(),
            });
        }
        let start = self.position;
        self.storage.as_mut_slice()[start..start + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        Ok(())
    }

    /// Fill `out` from the buffer at the cursor, advancing it. All-or-
    /// nothing: on underflow neither side is touched.
    pub fn copy_to_slice(&mut self, out: &mut [u8]) -> Result<(), BufferError> {
        if out.len() > self.remaining() {
            return Err(BufferError::Underflow {
                requested: out.len(),
                remaining: self.remaining(),
            });
        }
        let start = self.position;
        out.copy_from_slice(&self.storage.as_slice()[start..start + out.len()]);
        self.position += out.len();
        Ok(())
    }

    /// Switch from filling to draining: limit becomes the current position
    /// and the cursor rewinds to zero.
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
    }

    /// Reset to an empty, writable state over the full capacity.
    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = self.capacity();
    }

    /// Shift unread bytes to the front and reopen the tail for writing.
    pub fn compact(&mut self) {
        let unread = self.remaining();
        let start = self.position;
        self.storage
            .as_mut_slice()
            .copy_within(start..start + unread, 0);
        self.position = unread;
        self.limit = self.capacity();
    }
}

impl fmt::Debug for IoBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoBuffer")
            .field("backing", &self.storage.label())
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("capacity", &self.capacity())
            .finish()
    }
}
