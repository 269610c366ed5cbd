/// Rolling window of packet arrivals used to estimate connection health.
///
/// Each physics tick the server records whether the expected input made it;
/// the missing count feeds the queue depth control loop.
#[derive(Debug, Clone)]
pub struct NetworkTracer {
    flags: Vec<bool>,
    head: usize,
}

impl NetworkTracer {
    pub fn new(traced_frames: usize) -> Self {
        Self {
            // Start optimistic: pretend the connection is good.
            flags: vec![true; traced_frames.max(1)],
            head: 0,
        }
    }

    pub fn notify_packet_arrived(&mut self) {
        self.head = (self.head + 1) % self.flags.len();
        self.flags[self.head] = true;
    }

    pub fn notify_missing_packet(&mut self) {
        self.head = (self.head + 1) % self.flags.len();
        self.flags[self.head] = false;
    }

    pub fn missing_count(&self) -> usize {
        self.flags.iter().filter(|arrived| !**arrived).count()
    }

    pub fn traced_frames(&self) -> usize {
        self.flags.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_optimistic() {
        let tracer = NetworkTracer::new(32);
        assert_eq!(tracer.missing_count(), 0);
    }

    #[test]
    fn counts_missing_packets() {
        let mut tracer = NetworkTracer::new(8);

        tracer.notify_missing_packet();
        tracer.notify_packet_arrived();
        tracer.notify_missing_packet();

        assert_eq!(tracer.missing_count(), 2);
    }

    #[test]
    fn window_forgets_old_entries() {
        let mut tracer = NetworkTracer::new(4);

        for _ in 0..4 {
            tracer.notify_missing_packet();
        }
        assert_eq!(tracer.missing_count(), 4);

        for _ in 0..4 {
            tracer.notify_packet_arrived();
        }
        assert_eq!(tracer.missing_count(), 0);
    }
}
