//! Compressed snapshot id codec.
//!
//! The generator hands out monotonic 64 bit ids while only 16 bits travel on
//! the wire. The receptor reconstructs the full id by tracking how many times
//! the wire range has wrapped. Wire id zero is reserved, so one generation
//! spans 65535 ids.

/// Largest tolerated gap, in ids, between the highest reconstructed id and a
/// newly received one. Recovery stays monotonic as long as no more than
/// `THRESHOLD - 1` consecutive ids are lost.
const THRESHOLD: u16 = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("wire id outside the tolerated reorder window")]
pub struct IdRejected;

#[derive(Debug, Default)]
pub struct LocalIdGenerator {
    next: u64,
}

impl LocalIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next `(id, wire_id)` pair. `wire_id` is in `1..=65535`.
    pub fn emit(&mut self) -> (u64, u16) {
        let id = self.next;
        self.next += 1;
        (id, (id % u64::from(u16::MAX)) as u16 + 1)
    }
}

#[derive(Debug, Default)]
pub struct RemoteIdReceptor {
    head_wire: u16,
    generation: u64,
    highest_id: u64,
}

impl RemoteIdReceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconstructs the 64 bit id behind `wire`.
    ///
    /// The wire range is split into a right margin (where the head must sit
    /// before a wrap can be suspected) and a left margin twice as wide (where
    /// fresh post-wrap ids land). The left margin is wider so a single late
    /// out-of-order id cannot advance the generation prematurely; the advance
    /// is only committed once a post-wrap id clears the threshold itself.
    pub fn receive(&mut self, wire: u16) -> Result<u64, IdRejected> {
        if wire == 0 {
            // Reserved, never emitted.
            return Err(IdRejected);
        }

        let left_threshold = THRESHOLD;
        let left_threshold_margin = THRESHOLD * 2;
        let right_threshold = u16::MAX - THRESHOLD;

        let mut generation = self.generation;
        let mut commit_generation = false;

        if self.head_wire > right_threshold && wire < left_threshold_margin {
            // Assume this is an id of the next generation, but wait before
            // committing: old ids can still arrive.
            generation += 1;
            if wire > left_threshold {
                commit_generation = true;
            }
        }

        let id = u64::from(wire) - 1 + u64::from(u16::MAX) * generation;

        let delta = id as i128 - self.highest_id as i128;
        if delta < -i128::from(THRESHOLD) || delta > i128::from(THRESHOLD) {
            return Err(IdRejected);
        }

        if commit_generation {
            self.generation += 1;
            self.head_wire = wire;
        }
        self.head_wire = self.head_wire.max(wire);
        self.highest_id = self.highest_id.max(id);

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_sequence_reconstructs() {
        let mut generator = LocalIdGenerator::new();
        let mut receptor = RemoteIdReceptor::new();

        for _ in 0..200_000u64 {
            let (id, wire) = generator.emit();
            assert_eq!(receptor.receive(wire), Ok(id));
        }
    }

    #[test]
    fn lossy_sequence_reconstructs() {
        let mut generator = LocalIdGenerator::new();
        let mut receptor = RemoteIdReceptor::new();

        // Deterministic loss pattern, always shorter than the threshold.
        for step in 0..200_000u64 {
            let (id, wire) = generator.emit();
            if step % 7 == 0 || step % 11 == 3 {
                continue;
            }
            assert_eq!(receptor.receive(wire), Ok(id));
        }
    }

    #[test]
    fn wrap_boundary_in_order() {
        let mut generator = LocalIdGenerator::new();
        let mut receptor = RemoteIdReceptor::new();

        // Ids 65532..=65540 straddle the 16 bit wrap.
        let pairs: Vec<_> = (0..=65540u64).map(|_| generator.emit()).collect();
        for (id, wire) in &pairs {
            assert_eq!(receptor.receive(*wire), Ok(*id));
        }
        assert_eq!(pairs[65535].1, 1);
    }

    #[test]
    fn wrap_boundary_with_adjacent_swap() {
        let mut generator = LocalIdGenerator::new();
        let mut receptor = RemoteIdReceptor::new();

        let mut pairs: Vec<_> = (0..65541u64).map(|_| generator.emit()).collect();
        // Swap the two ids right after the wrap.
        let len = pairs.len();
        pairs.swap(len - 2, len - 3);

        for (id, wire) in &pairs {
            assert_eq!(receptor.receive(*wire), Ok(*id));
        }
    }

    #[test]
    fn late_id_across_the_wrap_is_accepted() {
        let mut generator = LocalIdGenerator::new();
        let mut receptor = RemoteIdReceptor::new();

        let pairs: Vec<_> = (0..65541u64).map(|_| generator.emit()).collect();
        let late = pairs[65532];

        for (id, wire) in &pairs[..65532] {
            assert_eq!(receptor.receive(*wire), Ok(*id));
        }
        for (id, wire) in &pairs[65533..] {
            assert_eq!(receptor.receive(*wire), Ok(*id));
        }

        // Delivered with displacement 8, well under the threshold.
        assert_eq!(receptor.receive(late.1), Ok(late.0));
    }

    #[test]
    fn oversized_gap_rejected() {
        let mut generator = LocalIdGenerator::new();
        let mut receptor = RemoteIdReceptor::new();

        let (id, wire) = generator.emit();
        assert_eq!(receptor.receive(wire), Ok(id));

        for _ in 0..u64::from(THRESHOLD) + 10 {
            generator.emit();
        }
        let (_, far_wire) = generator.emit();
        assert_eq!(receptor.receive(far_wire), Err(IdRejected));
    }

    #[test]
    fn reserved_wire_zero_rejected() {
        let mut receptor = RemoteIdReceptor::new();
        assert_eq!(receptor.receive(0), Err(IdRejected));
    }
}
