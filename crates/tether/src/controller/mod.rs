mod config;
mod host;
mod master;
mod puppet;
mod server;

pub use config::{ConfigError, ControllerConfig};
pub use host::{CharacterHost, ControllerEvent, PeerId, Recovery, Transport};
pub use master::MasterController;
pub use puppet::PuppetController;
pub use server::ServerController;

use crate::buffer::InputBuffer;

/// Never target a queue depth below this, to take internet latency into
/// account.
pub const MIN_SNAPSHOTS_SIZE: f32 = 2.0;

/// Hard bound on the signed tick rate bias, in ticks per second.
pub const MAX_ADDITIONAL_TICK_SPEED: f32 = 2.0;

/// Minimum change of the compressed speed, in percent of the maximum bias,
/// worth notifying the master about.
pub(crate) const TICK_SPEED_CHANGE_NOTIF_THRESHOLD: i8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Master,
    Puppet,
}

impl Role {
    /// Resolves the controller role from the process capabilities: the
    /// authoritative host is the server, the owning client the master,
    /// everyone else a puppet.
    pub fn from_capabilities(is_server: bool, owns_character: bool) -> Self {
        if is_server {
            Role::Server
        } else if owns_character {
            Role::Master
        } else {
            Role::Puppet
        }
    }
}

enum Kind<S> {
    Master(MasterController<S>),
    Server(ServerController),
    Puppet(PuppetController<S>),
}

/// One networked character's controller. The role is fixed for the whole
/// lifetime; every queue, ring and cache dies with the controller.
///
/// The controller owns the input buffer. The host only touches it inside
/// [`CharacterHost::collect_inputs`] and, read only, inside
/// [`CharacterHost::are_inputs_different`].
pub struct CharacterController<H: CharacterHost> {
    config: ControllerConfig,
    inputs: InputBuffer,
    kind: Kind<H::State>,
}

impl<H: CharacterHost> CharacterController<H> {
    /// Builds the role-specialised controller. `inputs` must already carry
    /// the declared field schema; the layout freezes here. `master_peer` is
    /// the peer id of the client owning the character.
    pub fn new(
        role: Role,
        master_peer: PeerId,
        config: ControllerConfig,
        mut inputs: InputBuffer,
    ) -> Self {
        inputs.freeze();

        let kind = match role {
            Role::Master => Kind::Master(MasterController::new()),
            Role::Server => Kind::Server(ServerController::new(master_peer, &config)),
            Role::Puppet => Kind::Puppet(PuppetController::new(master_peer, &config)),
        };

        Self {
            config,
            inputs,
            kind,
        }
    }

    pub fn role(&self) -> Role {
        match self.kind {
            Kind::Master(_) => Role::Master,
            Kind::Server(_) => Role::Server,
            Kind::Puppet(_) => Role::Puppet,
        }
    }

    /// Advances the controller by one physics tick.
    pub fn physics_process<T: Transport<H::State>>(&mut self, dt: f32, host: &mut H, net: &mut T) {
        match &mut self.kind {
            Kind::Master(master) => {
                master.physics_process(dt, &self.config, &mut self.inputs, host, net);
            }
            Kind::Server(server) => {
                server.physics_process(dt, &self.config, &mut self.inputs, host, net);
            }
            Kind::Puppet(puppet) => puppet.physics_process(dt, &mut self.inputs, host),
        }
    }

    /// Input snapshot packet delivery (master to server, server to puppet).
    /// On the server the packet is relayed to every active puppet before
    /// being consumed locally.
    pub fn receive_snapshots<T: Transport<H::State>>(&mut self, data: &[u8], net: &mut T) {
        match &mut self.kind {
            Kind::Server(server) => {
                for &peer in server.active_puppets() {
                    net.send_inputs_to_puppet(peer, data);
                }
                server.receive_snapshots(data, &self.inputs);
            }
            Kind::Puppet(puppet) => puppet.receive_snapshots(data, &self.inputs),
            Kind::Master(_) => {
                log::error!("the master is not supposed to receive input snapshots");
            }
        }
    }

    /// Authoritative state delivery (server to master and puppets).
    pub fn receive_state(&mut self, id: u64, state: H::State) {
        match &mut self.kind {
            Kind::Master(master) => master.player_state_check(id, state),
            Kind::Puppet(puppet) => puppet.player_state_check(id, state),
            Kind::Server(_) => {
                log::error!("player state must not be delivered to the server");
            }
        }
    }

    /// Tick speed feedback delivery (server to master), in percent of
    /// [`MAX_ADDITIONAL_TICK_SPEED`].
    pub fn receive_tick_speed(&mut self, percent: i8) {
        match &mut self.kind {
            Kind::Master(master) => master.receive_tick_additional_speed(percent),
            _ => log::error!("tick speed feedback is only meaningful on the master"),
        }
    }

    /// Flow gate delivery (server to puppet).
    pub fn receive_flow_status(&mut self, open: bool) {
        match &mut self.kind {
            Kind::Puppet(puppet) => {
                if open {
                    puppet.open_flow();
                } else {
                    puppet.close_flow();
                }
            }
            _ => log::error!("flow status is only meaningful on a puppet"),
        }
    }

    /// Re-rolls the predicted snapshots from the current simulation state.
    pub fn replay_snapshots(&mut self, dt: f32, host: &mut H) {
        match &mut self.kind {
            Kind::Master(master) => master.replay_snapshots(dt, &mut self.inputs, host),
            Kind::Puppet(puppet) => {
                puppet.master.replay_snapshots(dt, &mut self.inputs, host);
            }
            Kind::Server(_) => {
                log::error!("replay_snapshots must not be called on the server");
            }
        }
    }

    /// Server only: enables or disables all traffic toward a puppet. The
    /// affected peer is notified with a one-shot flow notice.
    pub fn set_puppet_active<T: Transport<H::State>>(
        &mut self,
        peer: PeerId,
        active: bool,
        net: &mut T,
    ) {
        match &mut self.kind {
            Kind::Server(server) => server.set_puppet_active(peer, active, net),
            _ => log::error!("puppet activation can only be changed on the server"),
        }
    }

    /// Server only: rebuilds the active puppet set after a peer connected or
    /// disconnected. `peers` is the full list of currently connected peers.
    pub fn on_peer_connection_change(&mut self, peers: &[PeerId]) {
        match &mut self.kind {
            Kind::Server(server) => server.set_peers(peers),
            _ => log::error!("peer connectivity is only tracked on the server"),
        }
    }

    /// Outward notifications accumulated since the last drain.
    pub fn drain_events(&mut self) -> Vec<ControllerEvent> {
        match &mut self.kind {
            Kind::Puppet(puppet) => puppet.drain_events(),
            _ => Vec::new(),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ControllerConfig {
        &mut self.config
    }

    pub fn inputs(&self) -> &InputBuffer {
        &self.inputs
    }

    /// Id of the input currently bound to the simulation, on the roles that
    /// play inputs back.
    pub fn current_input_id(&self) -> Option<u64> {
        match &self.kind {
            Kind::Server(server) => server.current_input_id(),
            Kind::Puppet(puppet) => puppet.server.current_input_id(),
            Kind::Master(_) => None,
        }
    }

    /// Receive queue depth, on the roles that play inputs back.
    pub fn input_queue_len(&self) -> Option<usize> {
        match &self.kind {
            Kind::Server(server) => Some(server.queue_len()),
            Kind::Puppet(puppet) => Some(puppet.server.queue_len()),
            Kind::Master(_) => None,
        }
    }

    /// Snapshots waiting for reconciliation, on the roles that predict.
    pub fn pending_snapshots(&self) -> Option<usize> {
        match &self.kind {
            Kind::Master(master) => Some(master.pending_len()),
            Kind::Puppet(puppet) => Some(puppet.master.pending_len()),
            Kind::Server(_) => None,
        }
    }

    /// Missing packets in the tracing window (server only).
    pub fn missing_packets(&self) -> Option<usize> {
        match &self.kind {
            Kind::Server(server) => Some(server.missing_packets()),
            _ => None,
        }
    }

    /// Current signed tick rate bias (master only).
    pub fn tick_additional_speed(&self) -> Option<f32> {
        match &self.kind {
            Kind::Master(master) => Some(master.tick_additional_speed()),
            _ => None,
        }
    }

    /// Highest reconciled snapshot id, on the roles that predict.
    pub fn reconciled_id(&self) -> Option<u64> {
        match &self.kind {
            Kind::Master(master) => Some(master.reconciled_id()),
            Kind::Puppet(puppet) => Some(puppet.master.reconciled_id()),
            Kind::Server(_) => None,
        }
    }

    /// Whether the server currently lets traffic through (puppet only).
    pub fn is_flow_open(&self) -> Option<bool> {
        match &self.kind {
            Kind::Puppet(puppet) => Some(puppet.is_flow_open()),
            _ => None,
        }
    }

    /// Next snapshot id to be collected (master only).
    pub fn next_input_id(&self) -> Option<u64> {
        match &self.kind {
            Kind::Master(master) => Some(master.next_id()),
            _ => None,
        }
    }
}
