/// Fixed-capacity circular byte store used by the MJPEG demuxer.
///
/// The buffer exposes a logical window `[tail, tail + len)` addressed by
/// offsets relative to `tail`, so callers never deal with wrap-around.
/// Alongside the data it tracks an optional *mark*, the offset at which the
/// frame currently being assembled starts. Discarding bytes shifts the mark
/// down, and invalidates it entirely once the bytes it pointed at are gone.
///
/// ### Invariants:
/// - `0 <= len <= capacity` after every operation.
/// - `extract(a, b)` returns exactly `b - a` bytes, always as a fresh copy.
/// - Pushing past capacity drops the *oldest* unconsumed bytes.
pub struct RingBuffer {
    storage: Box<[u8]>,
    tail: usize,
    len: usize,
    mark: Option<usize>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        // A zero sized ring could never hold a marker; clamp to one byte.
        let capacity = capacity.max(1);

        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            tail: 0,
            len: 0,
            mark: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of the frame start within the current window, if known.
    pub fn mark(&self) -> Option<usize> {
        self.mark
    }

    pub fn set_mark(&mut self, offset: usize) {
        debug_assert!(offset <= self.len);
        self.mark = Some(offset);
    }

    pub fn clear_mark(&mut self) {
        self.mark = None;
    }

    /// Appends `data` to the window.
    ///
    /// Returns the number of previously buffered (or leading incoming) bytes
    /// that had to be dropped to make room. A non-zero return is logged as a
    /// warning since it means the consumer fell behind the producer.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let capacity = self.capacity();

        // Only the newest `capacity` bytes of an oversized chunk can survive.
        let (skipped_incoming, data) = if data.len() > capacity {
            (data.len() - capacity, &data[data.len() - capacity..])
        } else {
            (0, data)
        };

        let free = capacity - self.len;
        let evicted = data.len().saturating_sub(free);
        if evicted > 0 {
            self.discard(evicted);
        }

        let head = (self.tail + self.len) % capacity;
        let first = data.len().min(capacity - head);
        self.storage[head..head + first].copy_from_slice(&data[..first]);
        self.storage[..data.len() - first].copy_from_slice(&data[first..]);
        self.len += data.len();

        let dropped = skipped_incoming + evicted;
        if dropped > 0 {
            tracing::warn!(
                dropped,
                capacity,
                "ring buffer overflow; oldest unconsumed bytes discarded"
            );
        }

        dropped
    }

    /// Drops up to `n` bytes from the front of the window.
    pub fn discard(&mut self, n: usize) {
        let n = n.min(self.len);
        if n == 0 {
            return;
        }

        self.tail = (self.tail + n) % self.capacity();
        self.len -= n;

        self.mark = match self.mark {
            Some(mark) if mark >= n => Some(mark - n),
            _ => None,
        };

        if self.len == 0 {
            self.tail = 0;
        }
    }

    /// Drops everything and forgets the mark.
    pub fn clear(&mut self) {
        self.tail = 0;
        self.len = 0;
        self.mark = None;
    }

    /// Reads the byte at logical offset `pos`.
    #[inline]
    fn byte_at(&self, pos: usize) -> u8 {
        self.storage[(self.tail + pos) % self.capacity()]
    }

    /// Returns true if `pattern` occurs at logical offset `pos`.
    pub fn matches_at(&self, pos: usize, pattern: &[u8]) -> bool {
        if pos + pattern.len() > self.len {
            return false;
        }

        pattern
            .iter()
            .enumerate()
            .all(|(i, &b)| self.byte_at(pos + i) == b)
    }

    /// Searches for `pattern` fully contained in `[start, end)`.
    pub fn find(&self, start: usize, end: usize, pattern: &[u8]) -> Option<usize> {
        let end = end.min(self.len);
        if pattern.is_empty() || start >= end || end - start < pattern.len() {
            return None;
        }

        (start..=end - pattern.len()).find(|&pos| self.matches_at(pos, pattern))
    }

    /// Copies the logical range `[start, end)` out of the ring.
    ///
    /// The returned vector never aliases the ring's storage, which is
    /// overwritten as soon as more data is pushed.
    pub fn extract(&self, start: usize, end: usize) -> Option<Vec<u8>> {
        if start >= end || end > self.len {
            return None;
        }

        let capacity = self.capacity();
        let count = end - start;
        let real_start = (self.tail + start) % capacity;
        let first = count.min(capacity - real_start);

        let mut out = Vec::with_capacity(count);
        out.extend_from_slice(&self.storage[real_start..real_start + first]);
        out.extend_from_slice(&self.storage[..count - first]);

        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::RingBuffer;

    #[test]
    fn wraps_around_storage_boundary() {
        let mut ring = RingBuffer::new(8);
        ring.push(b"abcdef");
        ring.discard(4);
        ring.push(b"ghijk");

        assert_eq!(ring.len(), 7);
        assert_eq!(ring.extract(0, 7).unwrap(), b"efghijk");
        assert_eq!(ring.find(0, ring.len(), b"hi"), Some(3));
    }

    #[test]
    fn mark_shifts_then_invalidates() {
        let mut ring = RingBuffer::new(16);
        ring.push(b"0123456789");
        ring.set_mark(6);

        ring.discard(4);
        assert_eq!(ring.mark(), Some(2));

        ring.discard(3);
        assert_eq!(ring.mark(), None);
    }
}
