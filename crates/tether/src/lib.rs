//! Deterministic client prediction and server reconciliation for a networked
//! character.
//!
//! The owning client (master) collects inputs each physics tick and ships a
//! redundancy-padded stream of bit-packed input snapshots; the authoritative
//! server replays them in strict order at an adaptively paced rate and
//! broadcasts its state back; non-owning clients (puppets) simulate the
//! character from the relayed inputs and reconcile against the same state.
//!
//! Simulation and transport stay on the host's side of the fence, behind
//! [`CharacterHost`] and [`Transport`].

pub mod buffer;
pub mod controller;
pub mod net;
pub mod protocol;

pub use buffer::{BitArray, CompressionLevel, FieldKind, InputBuffer, InputView};
pub use controller::{
    CharacterController, CharacterHost, ConfigError, ControllerConfig, ControllerEvent,
    MAX_ADDITIONAL_TICK_SPEED, PeerId, Recovery, Role, Transport,
};
pub use net::NetworkTracer;
pub use protocol::{
    IdRejected, LocalIdGenerator, MAX_SNAPSHOTS_PER_PACKET, PacketError, PacketReader,
    RemoteIdReceptor,
};
