//! Bounded-buffer shuffling over sample indices.

use rand::Rng;

/// Visit order for `len` samples through a shuffle buffer of `buffer_size`.
///
/// The buffer is filled with the first `buffer_size` indices; each output
/// draws a uniformly random slot and refills it with the next incoming index.
/// A sample therefore never moves earlier than `buffer_size - 1` places, and a
/// buffer of 1 (or 0) keeps insertion order.
pub fn buffered_order<R: Rng + ?Sized>(len: usize, buffer_size: usize, rng: &mut R) -> Vec<usize> {
    let capacity = buffer_size.max(1).min(len.max(1));
    let mut buffer: Vec<usize> = Vec::with_capacity(capacity);
    let mut order = Vec::with_capacity(len);
    let mut incoming = 0..len;

    for idx in incoming.by_ref().take(capacity) {
        buffer.push(idx);
    }
    while !buffer.is_empty() {
        let slot = rng.random_range(0..buffer.len());
        match incoming.next() {
            Some(next) => order.push(std::mem::replace(&mut buffer[slot], next)),
            None => order.push(buffer.swap_remove(slot)),
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sorted(mut v: Vec<usize>) -> Vec<usize> {
        v.sort_unstable();
        v
    }

    #[test]
    fn order_is_a_permutation() {
        let mut rng = StdRng::seed_from_u64(3);
        for (len, buffer) in [(0, 4), (1, 4), (10, 3), (10, 10), (10, 1000), (57, 8)] {
            let order = buffered_order(len, buffer, &mut rng);
            assert_eq!(sorted(order), (0..len).collect::<Vec<_>>());
        }
    }

    #[test]
    fn unit_buffer_keeps_insertion_order() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(buffered_order(6, 1, &mut rng), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(buffered_order(6, 0, &mut rng), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn samples_move_at_most_buffer_minus_one_earlier() {
        let mut rng = StdRng::seed_from_u64(11);
        let buffer = 4;
        let order = buffered_order(200, buffer, &mut rng);
        for (pos, idx) in order.iter().enumerate() {
            assert!(pos >= idx.saturating_sub(buffer - 1), "{idx} at {pos}");
        }
    }

    #[test]
    fn same_seed_same_order() {
        let a = buffered_order(50, 16, &mut StdRng::seed_from_u64(9));
        let b = buffered_order(50, 16, &mut StdRng::seed_from_u64(9));
        let c = buffered_order(50, 16, &mut StdRng::seed_from_u64(10));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
