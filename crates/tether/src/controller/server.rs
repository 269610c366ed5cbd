use std::collections::VecDeque;

use crate::buffer::InputBuffer;
use crate::net::NetworkTracer;
use crate::protocol::PacketReader;

use super::config::ControllerConfig;
use super::host::{CharacterHost, PeerId, Transport};
use super::{MAX_ADDITIONAL_TICK_SPEED, MIN_SNAPSHOTS_SIZE, TICK_SPEED_CHANGE_NOTIF_THRESHOLD};

/// `current_id` sentinel: no input has ever been consumed.
pub(crate) const NEVER_CONSUMED: u64 = u64::MAX;

#[derive(Debug, Clone)]
pub(crate) struct InputSnapshotSkinny {
    pub id: u64,
    pub bytes: Vec<u8>,
}

fn sign(value: f32) -> f32 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Authoritative side: consumes the master's input stream in strict id order,
/// steps the simulation, and paces the master's tick rate so the receive
/// queue hovers around an adaptive target depth.
pub struct ServerController {
    master_peer: PeerId,
    pub(crate) current_id: u64,
    pub(crate) queue: VecDeque<InputSnapshotSkinny>,
    ghost_count: u32,
    tracer: NetworkTracer,
    target_queue_depth: f32,
    master_speed: f32,
    last_sent_speed_percent: i8,
    state_notify_accum: f32,
    known_peers: Vec<PeerId>,
    disabled_puppets: Vec<PeerId>,
    active_puppets: Vec<PeerId>,
}

impl ServerController {
    pub(crate) fn new(master_peer: PeerId, config: &ControllerConfig) -> Self {
        Self {
            master_peer,
            current_id: NEVER_CONSUMED,
            queue: VecDeque::new(),
            ghost_count: 0,
            tracer: NetworkTracer::new(config.network_traced_frames()),
            target_queue_depth: 0.0,
            master_speed: 0.0,
            last_sent_speed_percent: 0,
            state_notify_accum: 0.0,
            known_peers: Vec::new(),
            disabled_puppets: Vec::new(),
            active_puppets: Vec::new(),
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
        H: CharacterHost,
        T: Transport<H::State>,
    {
        let is_new_input = self.fetch_next_input(inputs, host);

        if self.current_id == NEVER_CONSUMED {
            // Nothing to simulate until the first input arrives.
            return;
        }

        host.step_player(inputs, dt);
        self.adjust_master_tick_rate(dt, config, net);
        self.check_peers_state(dt, is_new_input, config, host, net);
    }

    /// Decodes a received input packet and inserts the new snapshots into the
    /// ordered queue. Corrupted packets and already consumed ids are dropped
    /// without any other effect.
    pub(crate) fn receive_snapshots(&mut self, data: &[u8], inputs: &InputBuffer) {
        let reader = match PacketReader::parse(data, inputs.byte_size()) {
            Ok(reader) => reader,
            Err(err) => {
                log::debug!("dropping corrupted input packet: {err}");
                return;
            }
        };

        for (id, payload) in reader.snapshots() {
            if self.current_id != NEVER_CONSUMED && id <= self.current_id {
                continue;
            }

            match self.queue.binary_search_by_key(&id, |snap| snap.id) {
                Ok(_) => {}
                Err(position) => self.queue.insert(
                    position,
                    InputSnapshotSkinny {
                        id,
                        bytes: payload.to_vec(),
                    },
                ),
            }
        }
    }

    /// Binds the next input to simulate. Returns whether a new snapshot was
    /// bound; otherwise the previous buffer contents are reused.
    pub(crate) fn fetch_next_input<H: CharacterHost>(
        &mut self,
        inputs: &mut InputBuffer,
        host: &H,
    ) -> bool {
        if self.current_id == NEVER_CONSUMED {
            // As the initial input, anything is good.
            return if let Some(front) = self.queue.pop_front() {
                inputs.copy_bytes_from(&front.bytes);
                self.current_id = front.id;
                self.tracer.notify_packet_arrived();
                true
            } else {
                self.tracer.notify_missing_packet();
                false
            };
        }

        let next_id = self.current_id + 1;

        if self.queue.is_empty() {
            self.tracer.notify_missing_packet();
            self.ghost_count += 1;
            return false;
        }

        if self.queue.front().map(|snap| snap.id) == Some(next_id) {
            if let Some(front) = self.queue.pop_front() {
                inputs.copy_bytes_from(&front.bytes);
                self.current_id = front.id;
                self.ghost_count = 0;
                self.tracer.notify_packet_arrived();
            }
            return true;
        }

        // The expected input is not here: lost, late, or the client desynced.
        //
        // Don't lose hope immediately. Each tick the search pool widens by
        // one, so a flight of delayed packets arriving together can still be
        // caught. Those packets were simulated by guessing in the meanwhile,
        // so there is no room left to play them all back; instead of jumping
        // straight to the newest, restart from the next input that actually
        // changes something compared to the one currently bound.
        self.tracer.notify_missing_packet();
        self.ghost_count += 1;

        let pool = (self.ghost_count as usize).min(self.queue.len());
        let ghost_id = next_id + u64::from(self.ghost_count);

        let mut recovered: Option<InputSnapshotSkinny> = None;

        for _ in 0..pool {
            let front_id = match self.queue.front() {
                Some(snap) => snap.id,
                None => break,
            };
            if ghost_id < front_id {
                break;
            }
            let Some(snap) = self.queue.pop_front() else {
                break;
            };

            let meaningful =
                host.are_inputs_different(inputs.view(), inputs.view_of(&snap.bytes));
            recovered = Some(snap);
            if meaningful {
                break;
            }
        }

        if let Some(snap) = recovered {
            inputs.copy_bytes_from(&snap.bytes);
            self.current_id = snap.id;
            self.ghost_count = 0;
            true
        } else {
            false
        }
    }

    fn adjust_master_tick_rate<S, T: Transport<S>>(
        &mut self,
        dt: f32,
        config: &ControllerConfig,
        net: &mut T,
    ) {
        let missing_packets = self.tracer.missing_count() as f32;
        let queue_len = self.queue.len() as f32;

        // First establish the optimal queue depth. The depth moves through an
        // acceleration so any change spreads over a long period rather than a
        // short one; the internet can fluctuate a lot.
        let acceleration_level = ((missing_packets - queue_len)
            / config.missing_snapshots_max_tollerance() as f32)
            .clamp(-2.0, 2.0);
        self.target_queue_depth += acceleration_level * config.optimal_size_acceleration() * dt;
        self.target_queue_depth = self
            .target_queue_depth
            .clamp(MIN_SNAPSHOTS_SIZE, config.server_snapshot_storage_size() as f32);

        // The master speed also moves through an acceleration, to avoid
        // nervous changes.
        let acceleration_level = ((self.target_queue_depth - queue_len)
            / config.server_snapshot_storage_size() as f32)
            .clamp(-1.0, 1.0);
        let acc = acceleration_level * config.tick_acceleration() * dt;
        let damp = self.master_speed * -0.9;

        // The damping fully applies only when it points against `acc`: cut
        // the oscillation around a steady target, but move fast toward a new
        // one.
        self.master_speed += acc + damp * ((sign(acc) * sign(damp) + 1.0) / 2.0);
        self.master_speed = self
            .master_speed
            .clamp(-MAX_ADDITIONAL_TICK_SPEED, MAX_ADDITIONAL_TICK_SPEED);

        let new_speed = (100.0 * self.master_speed / MAX_ADDITIONAL_TICK_SPEED).round() as i8;

        if (i16::from(new_speed) - i16::from(self.last_sent_speed_percent)).abs()
            >= i16::from(TICK_SPEED_CHANGE_NOTIF_THRESHOLD)
        {
            self.last_sent_speed_percent = new_speed;
            net.send_tick_speed_to_master(new_speed);
        }
    }

    fn check_peers_state<H, T>(
        &mut self,
        dt: f32,
        is_new_input: bool,
        config: &ControllerConfig,
        host: &mut H,
        net: &mut T,
    ) where
        H: CharacterHost,
        T: Transport<H::State>,
    {
        if self.current_id == NEVER_CONSUMED {
            return;
        }

        self.state_notify_accum += dt;
        if self.state_notify_accum < config.state_notify_interval() || !is_new_input {
            return;
        }
        self.state_notify_accum = 0.0;

        let state = host.create_snapshot();

        for &peer in &self.active_puppets {
            net.send_state(peer, self.current_id, &state);
        }
        net.send_state(self.master_peer, self.current_id, &state);
    }

    pub(crate) fn set_peers(&mut self, peers: &[PeerId]) {
        self.known_peers = peers.to_vec();
        self.update_active_puppets();
    }

    pub(crate) fn set_puppet_active<S, T: Transport<S>>(
        &mut self,
        peer: PeerId,
        active: bool,
        net: &mut T,
    ) {
        if peer == self.master_peer {
            log::error!("the master peer cannot be toggled as a puppet");
            return;
        }

        if active {
            if let Some(position) = self.disabled_puppets.iter().position(|p| *p == peer) {
                self.disabled_puppets.remove(position);
                self.update_active_puppets();
                net.send_flow_status(peer, true);
            }
        } else if !self.disabled_puppets.contains(&peer) {
            self.disabled_puppets.push(peer);
            self.update_active_puppets();
            net.send_flow_status(peer, false);
        }
    }

    fn update_active_puppets(&mut self) {
        self.active_puppets.clear();
        for &peer in &self.known_peers {
            if peer != self.master_peer && !self.disabled_puppets.contains(&peer) {
                self.active_puppets.push(peer);
            }
        }
    }

    pub(crate) fn active_puppets(&self) -> &[PeerId] {
        &self.active_puppets
    }

    pub(crate) fn current_input_id(&self) -> Option<u64> {
        (self.current_id != NEVER_CONSUMED).then_some(self.current_id)
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn missing_packets(&self) -> usize {
        self.tracer.missing_count()
    }

    pub(crate) fn master_speed(&self) -> f32 {
        self.master_speed
    }
}
