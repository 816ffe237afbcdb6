use camrelay::demux::RingBuffer;
use rand::Rng;
use std::collections::VecDeque;

#[test]
fn random_push_discard_matches_reference_window() {
    let mut rng = rand::rng();
    let capacity = 97;
    let mut ring = RingBuffer::new(capacity);

    // Mirror of what the ring should logically contain.
    let mut reference: VecDeque<u8> = VecDeque::new();
    let mut next_byte: u8 = 0;

    for _ in 0..5_000 {
        if rng.random_bool(0.6) {
            let chunk_len = rng.random_range(0..150);
            let chunk: Vec<u8> = (0..chunk_len)
                .map(|_| {
                    next_byte = next_byte.wrapping_add(1);
                    next_byte
                })
                .collect();

            ring.push(&chunk);
            reference.extend(chunk.iter().copied());
            while reference.len() > capacity {
                reference.pop_front();
            }
        } else {
            let n = rng.random_range(0..60);
            ring.discard(n);
            for _ in 0..n.min(reference.len()) {
                reference.pop_front();
            }
        }

        assert!(ring.len() <= ring.capacity());
        assert_eq!(ring.len(), reference.len());

        if ring.len() > 1 {
            let a = rng.random_range(0..ring.len() - 1);
            let b = rng.random_range(a + 1..=ring.len());
            let extracted = ring.extract(a, b).unwrap();

            assert_eq!(extracted.len(), b - a);
            let expected: Vec<u8> = reference.range(a..b).copied().collect();
            assert_eq!(extracted, expected);
        }
    }
}

#[test]
fn oversized_push_keeps_newest_bytes() {
    let mut ring = RingBuffer::new(4);
    ring.push(b"ab");

    let dropped = ring.push(b"cdefgh");

    assert_eq!(dropped, 4);
    assert_eq!(ring.len(), 4);
    assert_eq!(ring.extract(0, 4).unwrap(), b"efgh");
}

#[test]
fn overflow_evicts_oldest_and_invalidates_mark() {
    let mut ring = RingBuffer::new(8);
    ring.push(b"xxSOIabc");
    ring.set_mark(2);

    let dropped = ring.push(b"123");

    assert_eq!(dropped, 3);
    assert_eq!(ring.extract(0, ring.len()).unwrap(), b"OIabc123");
    assert_eq!(ring.mark(), None);
}

#[test]
fn extract_rejects_invalid_ranges() {
    let mut ring = RingBuffer::new(8);
    ring.push(b"abcd");

    assert!(ring.extract(2, 2).is_none());
    assert!(ring.extract(3, 1).is_none());
    assert!(ring.extract(0, 5).is_none());
}

#[test]
fn find_only_matches_patterns_fully_inside_range() {
    let mut ring = RingBuffer::new(16);
    ring.push(b"..\xFF\xD8....\xFF\xD9");

    assert_eq!(ring.find(0, ring.len(), &[0xFF, 0xD8]), Some(2));
    assert_eq!(ring.find(3, ring.len(), &[0xFF, 0xD8]), None);
    assert_eq!(ring.find(0, 9, &[0xFF, 0xD9]), None);
    assert_eq!(ring.find(0, 10, &[0xFF, 0xD9]), Some(8));
}
