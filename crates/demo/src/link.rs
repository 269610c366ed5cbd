use rkyv::{Archive, Deserialize, Serialize, rancor};

use tether::PeerId;

use crate::character::CharacterState;

/// Everything that crosses the loopback link, serialized to bytes on post
/// and decoded on delivery like real wire traffic.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum LinkMessage {
    Inputs(Vec<u8>),
    State { id: u64, state: CharacterState },
    TickSpeed(i8),
    Flow(bool),
}

#[derive(Debug, Clone, Copy)]
pub struct LinkCondition {
    pub loss_percent: f32,
    pub min_latency_ticks: u32,
    pub max_latency_ticks: u32,
    pub jitter_ticks: u32,
}

/// Deterministic xorshift, seeded from the command line.
pub struct Rng(u64);

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub fn next_percent(&mut self) -> f32 {
        (self.next_u64() % 10_000) as f32 / 10_000.0
    }
}

#[derive(Debug)]
struct Delayed {
    release_tick: u64,
    to: PeerId,
    bytes: Vec<u8>,
}

/// In-process lossy link: drops, delays and jitters posted messages, then
/// releases them by tick.
pub struct LossyLink {
    condition: LinkCondition,
    rng: Rng,
    queue: Vec<Delayed>,
    pub posted: u64,
    pub dropped: u64,
    pub delivered: u64,
}

impl LossyLink {
    pub fn new(condition: LinkCondition, seed: u64) -> Self {
        Self {
            condition,
            rng: Rng::new(seed),
            queue: Vec::new(),
            posted: 0,
            dropped: 0,
            delivered: 0,
        }
    }

    pub fn post(&mut self, now: u64, to: PeerId, message: &LinkMessage) {
        self.posted += 1;

        if self.rng.next_percent() < self.condition.loss_percent / 100.0 {
            self.dropped += 1;
            return;
        }

        let bytes = match rkyv::to_bytes::<rancor::Error>(message) {
            Ok(aligned) => aligned.into_vec(),
            Err(err) => {
                log::error!("failed to serialize a link message: {err}");
                return;
            }
        };

        let base = self.condition.min_latency_ticks;
        let range = self
            .condition
            .max_latency_ticks
            .saturating_sub(self.condition.min_latency_ticks);
        let spread = (self.rng.next_percent() * range as f32) as u32;
        let jitter = if self.condition.jitter_ticks > 0 {
            (self.rng.next_percent() * self.condition.jitter_ticks as f32) as u32
        } else {
            0
        };

        self.queue.push(Delayed {
            release_tick: now + u64::from(base + spread + jitter),
            to,
            bytes,
        });
    }

    /// Messages whose release tick has come, in arrival order. Later posts
    /// can overtake earlier ones when the latency spread says so.
    pub fn take_due(&mut self, now: u64) -> Vec<(PeerId, LinkMessage)> {
        let mut due: Vec<Delayed> = Vec::new();
        let mut remaining = Vec::with_capacity(self.queue.len());

        for delayed in self.queue.drain(..) {
            if delayed.release_tick <= now {
                due.push(delayed);
            } else {
                remaining.push(delayed);
            }
        }
        self.queue = remaining;
        due.sort_by_key(|delayed| delayed.release_tick);

        let mut messages = Vec::with_capacity(due.len());
        for delayed in due {
            match rkyv::from_bytes::<LinkMessage, rancor::Error>(&delayed.bytes) {
                Ok(message) => {
                    self.delivered += 1;
                    messages.push((delayed.to, message));
                }
                Err(err) => log::warn!("dropping undecodable link message: {err}"),
            }
        }
        messages
    }

    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }
}
