use std::collections::VecDeque;

use crate::buffer::InputBuffer;
use crate::protocol::{MAX_SNAPSHOTS_PER_PACKET, PACKET_HEADER_LEN};

use super::config::ControllerConfig;
use super::host::{CharacterHost, Recovery, Transport};
use super::MAX_ADDITIONAL_TICK_SPEED;

/// `similarity` sentinel: this snapshot was never compared to any other.
const SIMILARITY_UNKNOWN: u64 = u64::MAX;

#[derive(Debug, Clone)]
pub(crate) struct InputSnapshot<S> {
    pub id: u64,
    pub bytes: Vec<u8>,
    pub custom_state: S,
    /// Id of a snapshot this one's payload is known to match.
    pub similarity: u64,
}

/// Owning-client side: collects inputs at the server-paced rate, keeps the
/// predicted snapshots for reconciliation, and ships redundancy-padded input
/// packets.
pub struct MasterController<S> {
    pub(crate) pending: VecDeque<InputSnapshot<S>>,
    next_id: u64,
    time_bank: f32,
    tick_additional_speed: f32,
    pub(crate) recover_id: u64,
    recover_state: Option<S>,
    reconciled_id: u64,
    tx_buffer: Vec<u8>,
}

impl<S: Clone> MasterController<S> {
    pub(crate) fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            next_id: 0,
            time_bank: 0.0,
            tick_additional_speed: 0.0,
            recover_id: 0,
            recover_state: None,
            reconciled_id: 0,
            tx_buffer: Vec::new(),
        }
    }

    pub(crate) fn physics_process<H, T>(
        &mut self,
        dt: f32,
        config: &ControllerConfig,
        inputs: &mut InputBuffer,
        host: &mut H,
        net: &mut T,
    ) where
        H: CharacterHost<State = S>,
        T: Transport<S>,
    {
        // The packet generation rate may need to speed up or slow down to
        // follow the server. The tick is subdivided by a pretended delta
        // while the simulation still advances by the real one: the time is
        // only pretending to run faster.
        let pretended_delta = self.pretended_delta(config);

        self.time_bank += dt;
        let mut sub_ticks = (self.time_bank / pretended_delta) as u32;
        self.time_bank -= sub_ticks as f32 * pretended_delta;

        while sub_ticks > 0 {
            sub_ticks -= 1;

            // On a bad connection inputs cannot pile up forever, otherwise
            // the server drifts too far behind the client and everything
            // turns into virtual lag.
            let accept_new_inputs = self.pending.len() < config.master_snapshot_storage_size();

            if accept_new_inputs {
                host.collect_inputs(inputs);
            } else {
                // Step with zeroed inputs instead.
                inputs.zero();
            }

            // The character still has to move even when the input is not
            // recorded.
            host.step_player(inputs, dt);

            if accept_new_inputs {
                self.record_snapshot(self.next_id, inputs, host);
                self.next_id += 1;

                // Sending from inside the sub tick matters: on a bad
                // connection the accelerated execution produces more packets
                // per second.
                self.send_frame_snapshots(config, inputs, host, net);
            }
        }

        self.process_recovery(dt, inputs, host);
    }

    pub(crate) fn record_snapshot<H: CharacterHost<State = S>>(
        &mut self,
        id: u64,
        inputs: &InputBuffer,
        host: &mut H,
    ) {
        self.pending.push_back(InputSnapshot {
            id,
            bytes: inputs.bytes().to_vec(),
            custom_state: host.create_snapshot(),
            similarity: SIMILARITY_UNKNOWN,
        });
    }

    /// Encodes the trailing window of the pending ring into the reused
    /// scratch buffer and transmits it. Consecutive identical payloads
    /// collapse into one entry with a duplication count.
    fn send_frame_snapshots<H, T>(
        &mut self,
        config: &ControllerConfig,
        inputs: &InputBuffer,
        host: &H,
        net: &mut T,
    ) where
        H: CharacterHost<State = S>,
        T: Transport<S>,
    {
        let snapshots_count = self.pending.len().min(config.max_redundant_inputs() + 1);
        assert!(
            snapshots_count <= MAX_SNAPSHOTS_PER_PACKET,
            "a packet cannot carry more than 254 input snapshots"
        );
        assert!(snapshots_count >= 1, "nothing to send");

        let buffer_size = inputs.byte_size();
        let packet_size = PACKET_HEADER_LEN + (1 + buffer_size) * snapshots_count;
        if self.tx_buffer.len() < packet_size {
            self.tx_buffer.resize(packet_size, 0);
        }

        let window_start = self.pending.len() - snapshots_count;

        // The snapshot count is written last, once known.
        let mut ofs = 1;

        let first_id = self.pending[window_start].id;
        self.tx_buffer[ofs..ofs + 4].copy_from_slice(&(first_id as u32).to_le_bytes());
        ofs += 4;

        let mut in_packet_snapshots: u8 = 0;
        let mut duplication_count: u8 = 0;
        // Index, id and similarity of the previously written snapshot.
        let mut previous: Option<(usize, u64, u64)> = None;

        for i in window_start..self.pending.len() {
            assert!(
                self.pending[i].bytes.len() == buffer_size,
                "stored input payload width drifted from the buffer width"
            );

            let is_similar = match previous {
                // The first snapshot of the packet is always written.
                None => false,
                Some((previous_index, previous_id, previous_similarity)) => {
                    if self.pending[i].similarity == previous_id {
                        // Known to match; save the space.
                        true
                    } else if self.pending[i].similarity == SIMILARITY_UNKNOWN {
                        !host.are_inputs_different(
                            inputs.view_of(&self.pending[previous_index].bytes),
                            inputs.view_of(&self.pending[i].bytes),
                        )
                    } else {
                        // The similarity check ran against an older snapshot;
                        // matching similarity ids still prove these two are
                        // the same payload.
                        self.pending[i].similarity == previous_similarity
                    }
                }
            };

            if is_similar {
                duplication_count += 1;
                if let Some((_, previous_id, _)) = previous {
                    // No need to compare this pair again next packet.
                    self.pending[i].similarity = previous_id;
                }
            } else {
                if previous.is_some() {
                    // Seal the duplication count of the previous run.
                    self.tx_buffer[ofs - buffer_size - 1] = duplication_count;
                }
                duplication_count = 0;

                self.tx_buffer[ofs] = 0;
                ofs += 1;
                self.tx_buffer[ofs..ofs + buffer_size].copy_from_slice(&self.pending[i].bytes);
                ofs += buffer_size;

                in_packet_snapshots += 1;
                previous = Some((i, self.pending[i].id, self.pending[i].similarity));
            }
        }

        // Seal the last run, then the count.
        self.tx_buffer[ofs - buffer_size - 1] = duplication_count;
        self.tx_buffer[0] = in_packet_snapshots;

        let final_packet_size =
            PACKET_HEADER_LEN + (1 + buffer_size) * usize::from(in_packet_snapshots);
        assert!(
            ofs == final_packet_size,
            "encoded packet size drifted from its declared contents"
        );

        net.send_inputs_to_server(&self.tx_buffer[..final_packet_size]);
    }

    /// An authoritative state arrived; keep it only if it is newer than both
    /// the pending one and the last reconciled id.
    pub(crate) fn player_state_check(&mut self, id: u64, state: S) {
        if id > self.recover_id && id > self.reconciled_id {
            self.recover_id = id;
            self.recover_state = Some(state);
        }
    }

    pub(crate) fn process_recovery<H: CharacterHost<State = S>>(
        &mut self,
        dt: f32,
        inputs: &mut InputBuffer,
        host: &mut H,
    ) {
        if self.recover_id <= self.reconciled_id {
            return;
        }

        // Pop everything up to the authoritative id; the ring is ordered.
        let mut reached: Option<InputSnapshot<S>> = None;
        while self
            .pending
            .front()
            .is_some_and(|snap| snap.id <= self.recover_id)
        {
            reached = self.pending.pop_front();
        }

        let Some(snapshot) = reached else {
            // Not collected locally yet; postpone.
            return;
        };
        if snapshot.id != self.recover_id {
            return;
        }

        self.reconciled_id = self.recover_id;

        let directive = match self.recover_state.as_ref() {
            Some(server_state) => {
                host.process_recovery(snapshot.id, server_state, &snapshot.custom_state)
            }
            // Unreachable: the slot is filled whenever recover_id advances.
            None => return,
        };

        if directive == Recovery::Replay {
            self.replay_snapshots(dt, inputs, host);
        }
    }

    /// Re-steps every pending snapshot from the current simulation state and
    /// refreshes the stored predictions.
    pub(crate) fn replay_snapshots<H: CharacterHost<State = S>>(
        &mut self,
        dt: f32,
        inputs: &mut InputBuffer,
        host: &mut H,
    ) {
        for i in 0..self.pending.len() {
            inputs.copy_bytes_from(&self.pending[i].bytes);
            host.step_player(inputs, dt);
            self.pending[i].custom_state = host.create_snapshot();
        }
    }

    pub(crate) fn receive_tick_additional_speed(&mut self, percent: i8) {
        self.tick_additional_speed = (f32::from(percent) / 100.0) * MAX_ADDITIONAL_TICK_SPEED;
        self.tick_additional_speed = self
            .tick_additional_speed
            .clamp(-MAX_ADDITIONAL_TICK_SPEED, MAX_ADDITIONAL_TICK_SPEED);
    }

    fn pretended_delta(&self, config: &ControllerConfig) -> f32 {
        1.0 / (config.iterations_per_second() as f32 + self.tick_additional_speed)
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id
    }

    pub(crate) fn tick_additional_speed(&self) -> f32 {
        self.tick_additional_speed
    }

    pub(crate) fn reconciled_id(&self) -> u64 {
        self.reconciled_id
    }
}
