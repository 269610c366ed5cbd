use crate::buffer::InputBuffer;

use super::config::ControllerConfig;
use super::host::{CharacterHost, ControllerEvent, PeerId};
use super::master::MasterController;
use super::server::ServerController;

/// Non-owning client side: plays back the master's inputs relayed by the
/// server through an inner [`ServerController`], and reconciles against
/// authoritative state through an inner [`MasterController`]. The server
/// gates the whole thing with an explicit flow switch.
pub struct PuppetController<S> {
    pub(crate) server: ServerController,
    pub(crate) master: MasterController<S>,
    comms_detected: bool,
    state_received: bool,
    flow_open: bool,
    events: Vec<ControllerEvent>,
}

impl<S: Clone> PuppetController<S> {
    pub(crate) fn new(master_peer: PeerId, config: &ControllerConfig) -> Self {
        Self {
            server: ServerController::new(master_peer, config),
            master: MasterController::new(),
            comms_detected: false,
            state_received: false,
            flow_open: true,
            events: Vec::new(),
        }
    }

    pub(crate) fn physics_process<H: CharacterHost<State = S>>(
        &mut self,
        dt: f32,
        inputs: &mut InputBuffer,
        host: &mut H,
    ) {
        // Hold still while the server is not updating this puppet.
        if self.flow_open && self.state_received {
            if !self.comms_detected {
                self.comms_detected = true;
                self.hard_reset_to_server_state();
                self.events.push(ControllerEvent::CommsOpened);
            }
        } else {
            return;
        }

        let is_new_input = self.server.fetch_next_input(inputs, host);
        host.step_player(inputs, dt);
        if is_new_input {
            self.master
                .record_snapshot(self.server.current_id, inputs, host);
        }
        self.master.process_recovery(dt, inputs, host);
    }

    pub(crate) fn receive_snapshots(&mut self, data: &[u8], inputs: &InputBuffer) {
        if !self.flow_open {
            return;
        }
        self.server.receive_snapshots(data, inputs);
    }

    pub(crate) fn player_state_check(&mut self, id: u64, state: S) {
        if !self.flow_open {
            return;
        }
        self.master.player_state_check(id, state);
        self.state_received = true;
    }

    pub(crate) fn open_flow(&mut self) {
        if self.flow_open {
            return;
        }
        self.flow_open = true;
        self.comms_detected = false;
        self.state_received = false;
    }

    pub(crate) fn close_flow(&mut self) {
        if !self.flow_open {
            return;
        }
        self.flow_open = false;
        self.events.push(ControllerEvent::CommsClosed);
    }

    /// Aligns the input playback with the first authoritative state: inputs
    /// older than the state are no longer worth simulating.
    fn hard_reset_to_server_state(&mut self) {
        self.server.current_id = self.master.recover_id.wrapping_sub(1);
        while self
            .server
            .queue
            .front()
            .is_some_and(|snap| self.master.recover_id > snap.id)
        {
            self.server.queue.pop_front();
        }
    }

    pub(crate) fn drain_events(&mut self) -> Vec<ControllerEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn is_flow_open(&self) -> bool {
        self.flow_open
    }
}
