use crate::buffer::{InputBuffer, InputView};

/// Network peer handle, as assigned by the host's transport layer.
pub type PeerId = u32;

/// What the host wants done after a reconciliation callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The divergence was absorbed (or ignored); keep the predicted ring.
    Accept,
    /// Re-step every stored snapshot from the corrected state and refresh
    /// the stored client snapshots.
    Replay,
}

/// The simulation seam. The controller never steps physics itself; it drives
/// the character through these five callbacks.
///
/// All five are mandatory, which is what makes a partially wired host
/// unrepresentable: constructing a controller requires a complete
/// implementation.
pub trait CharacterHost {
    /// Opaque simulation state snapshot. The controller only stores, ships
    /// and hands it back; the host owns its meaning and serialisation.
    type State: Clone;

    /// Fill the input buffer with this tick's player inputs.
    fn collect_inputs(&mut self, inputs: &mut InputBuffer);

    /// Advance the simulation by one tick using the currently bound inputs.
    fn step_player(&mut self, inputs: &InputBuffer, dt: f32);

    /// Whether two input payloads differ in a way worth simulating twice.
    /// Must be pure and deterministic.
    fn are_inputs_different(&self, a: InputView<'_>, b: InputView<'_>) -> bool;

    /// Capture the current simulation state.
    fn create_snapshot(&mut self) -> Self::State;

    /// Act on a divergence between the authoritative and the predicted state
    /// for the same snapshot id.
    fn process_recovery(&mut self, id: u64, server: &Self::State, client: &Self::State)
    -> Recovery;
}

/// Outbound side of the RPC seam. Sends are fire and forget; input traffic
/// is expected to ride an unreliable channel, everything else a reliable one.
pub trait Transport<S> {
    fn send_inputs_to_server(&mut self, data: &[u8]);
    fn send_inputs_to_puppet(&mut self, peer: PeerId, data: &[u8]);
    fn send_tick_speed_to_master(&mut self, percent: i8);
    fn send_state(&mut self, peer: PeerId, id: u64, state: &S);
    fn send_flow_status(&mut self, peer: PeerId, open: bool);
}

/// Outward notifications, drained by the host once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerEvent {
    /// A puppet started receiving server traffic (again).
    CommsOpened,
    /// The server explicitly closed this puppet's flow.
    CommsClosed,
}
