use tether::{
    CharacterController, CharacterHost, CompressionLevel, ControllerConfig, ControllerEvent,
    FieldKind, InputBuffer, InputView, PacketReader, PeerId, Recovery, Role, Transport,
};

const DT: f32 = 1.0 / 60.0;
const MASTER_PEER: PeerId = 2;
const PUPPET_PEER: PeerId = 3;

/// Deterministic character: one 8 bit int field, position accumulates the
/// bound input every step.
struct TestHost {
    script: Vec<i64>,
    collected: usize,
    position: i64,
    steps: u32,
    recoveries: Vec<(u64, i64, i64)>,
    directive: Recovery,
}

impl TestHost {
    fn new(script: Vec<i64>) -> Self {
        Self {
            script,
            collected: 0,
            position: 0,
            steps: 0,
            recoveries: Vec::new(),
            directive: Recovery::Accept,
        }
    }
}

impl CharacterHost for TestHost {
    type State = i64;

    fn collect_inputs(&mut self, inputs: &mut InputBuffer) {
        let value = self.script.get(self.collected).copied().unwrap_or(0);
        self.collected += 1;
        inputs.set_int(0, value);
    }

    fn step_player(&mut self, inputs: &InputBuffer, _dt: f32) {
        self.position += inputs.get_int(0);
        self.steps += 1;
    }

    fn are_inputs_different(&self, a: InputView<'_>, b: InputView<'_>) -> bool {
        a.get_int(0) != b.get_int(0)
    }

    fn create_snapshot(&mut self) -> i64 {
        self.position
    }

    fn process_recovery(&mut self, id: u64, server: &i64, client: &i64) -> Recovery {
        self.recoveries.push((id, *server, *client));
        self.directive
    }
}

#[derive(Default)]
struct RecordingNet {
    to_server: Vec<Vec<u8>>,
    to_puppets: Vec<(PeerId, Vec<u8>)>,
    tick_speeds: Vec<i8>,
    states: Vec<(PeerId, u64, i64)>,
    flow: Vec<(PeerId, bool)>,
}

impl Transport<i64> for RecordingNet {
    fn send_inputs_to_server(&mut self, data: &[u8]) {
        self.to_server.push(data.to_vec());
    }

    fn send_inputs_to_puppet(&mut self, peer: PeerId, data: &[u8]) {
        self.to_puppets.push((peer, data.to_vec()));
    }

    fn send_tick_speed_to_master(&mut self, percent: i8) {
        self.tick_speeds.push(percent);
    }

    fn send_state(&mut self, peer: PeerId, id: u64, state: &i64) {
        self.states.push((peer, id, *state));
    }

    fn send_flow_status(&mut self, peer: PeerId, open: bool) {
        self.flow.push((peer, open));
    }
}

impl RecordingNet {
    fn take_to_server(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.to_server)
    }

    fn take_to_puppets(&mut self) -> Vec<(PeerId, Vec<u8>)> {
        std::mem::take(&mut self.to_puppets)
    }

    fn take_states(&mut self) -> Vec<(PeerId, u64, i64)> {
        std::mem::take(&mut self.states)
    }
}

fn input_schema() -> InputBuffer {
    let mut inputs = InputBuffer::new();
    inputs.add_field(FieldKind::Int, CompressionLevel::Level3);
    inputs
}

fn controller(role: Role, config: &ControllerConfig) -> CharacterController<TestHost> {
    CharacterController::new(role, MASTER_PEER, config.clone(), input_schema())
}

/// Master, server and one puppet wired together through recording
/// transports, with per-tick delivery of everything that was sent.
struct Harness {
    master: CharacterController<TestHost>,
    server: CharacterController<TestHost>,
    puppet: CharacterController<TestHost>,
    master_host: TestHost,
    server_host: TestHost,
    puppet_host: TestHost,
    master_net: RecordingNet,
    server_net: RecordingNet,
    puppet_net: RecordingNet,
    broadcasts: Vec<(u64, i64)>,
}

impl Harness {
    fn new(config: &ControllerConfig, script: Vec<i64>) -> Self {
        let mut server = controller(Role::Server, config);
        server.on_peer_connection_change(&[MASTER_PEER, PUPPET_PEER]);

        Self {
            master: controller(Role::Master, config),
            server,
            puppet: controller(Role::Puppet, config),
            master_host: TestHost::new(script),
            server_host: TestHost::new(Vec::new()),
            puppet_host: TestHost::new(Vec::new()),
            master_net: RecordingNet::default(),
            server_net: RecordingNet::default(),
            puppet_net: RecordingNet::default(),
            broadcasts: Vec::new(),
        }
    }

    fn run(&mut self, ticks: usize) -> Vec<ControllerEvent> {
        let mut events = Vec::new();

        for _ in 0..ticks {
            self.master
                .physics_process(DT, &mut self.master_host, &mut self.master_net);
            for packet in self.master_net.take_to_server() {
                self.server.receive_snapshots(&packet, &mut self.server_net);
            }
            self.server
                .physics_process(DT, &mut self.server_host, &mut self.server_net);

            for (_, packet) in self.server_net.take_to_puppets() {
                self.puppet.receive_snapshots(&packet, &mut self.puppet_net);
            }
            for (peer, id, state) in self.server_net.take_states() {
                if peer == MASTER_PEER {
                    self.master.receive_state(id, state);
                } else {
                    self.broadcasts.push((id, state));
                    self.puppet.receive_state(id, state);
                }
            }
            for (_, open) in std::mem::take(&mut self.server_net.flow) {
                self.puppet.receive_flow_status(open);
            }

            self.puppet
                .physics_process(DT, &mut self.puppet_host, &mut self.puppet_net);
            events.extend(self.puppet.drain_events());
        }

        events
    }
}

#[test]
fn lossless_straight_line() {
    let mut config = ControllerConfig::default();
    config.set_max_redundant_inputs(3);

    let mut master = controller(Role::Master, &config);
    let mut server = controller(Role::Server, &config);
    let mut master_host = TestHost::new((0..21).collect());
    let mut server_host = TestHost::new(Vec::new());
    let mut master_net = RecordingNet::default();
    let mut server_net = RecordingNet::default();

    for tick in 0..21u64 {
        master.physics_process(DT, &mut master_host, &mut master_net);
        for packet in master_net.take_to_server() {
            server.receive_snapshots(&packet, &mut server_net);
        }
        server.physics_process(DT, &mut server_host, &mut server_net);

        assert_eq!(server.current_input_id(), Some(tick));
    }

    assert_eq!(server.missing_packets(), Some(0));
    assert!(server_net.tick_speeds.is_empty());
    // Both simulations stepped the exact same inputs.
    assert_eq!(server_host.position, master_host.position);
}

#[test]
fn single_packet_loss_healed_by_redundancy() {
    let mut config = ControllerConfig::default();
    config.set_max_redundant_inputs(3);

    let mut master = controller(Role::Master, &config);
    let mut server = controller(Role::Server, &config);
    let mut master_host = TestHost::new((0..21).collect());
    let mut server_host = TestHost::new(Vec::new());
    let mut master_net = RecordingNet::default();
    let mut server_net = RecordingNet::default();

    for tick in 0..21 {
        master.physics_process(DT, &mut master_host, &mut master_net);
        for packet in master_net.take_to_server() {
            // The packet whose newest id is 5 never arrives.
            if tick == 5 {
                continue;
            }
            server.receive_snapshots(&packet, &mut server_net);
        }
        server.physics_process(DT, &mut server_host, &mut server_net);
    }

    // Id 5 was missing for one tick, then rode in with the packet that also
    // carried id 6; the server ran one input behind but skipped none.
    assert_eq!(server.current_input_id(), Some(19));
    assert_eq!(server.missing_packets(), Some(1));
    assert_eq!(server.input_queue_len(), Some(1));

    server.physics_process(DT, &mut server_host, &mut server_net);
    assert_eq!(server.current_input_id(), Some(20));
}

#[test]
fn wide_gap_recovers_at_first_meaningful_input() {
    let mut config = ControllerConfig::default();
    config.set_max_redundant_inputs(0);

    // Ids 4..=12 share one payload; id 13 changes again.
    let mut script = vec![10, 11, 12, 13];
    script.extend(std::iter::repeat_n(50, 9));
    script.extend([60, 61, 62, 63, 64, 65, 66]);

    let mut master = controller(Role::Master, &config);
    let mut server = controller(Role::Server, &config);
    let mut master_host = TestHost::new(script);
    let mut server_host = TestHost::new(Vec::new());
    let mut master_net = RecordingNet::default();
    let mut server_net = RecordingNet::default();

    let mut current_after_13 = None;

    for tick in 0..21 {
        master.physics_process(DT, &mut master_host, &mut master_net);
        for packet in master_net.take_to_server() {
            // Each packet carries a single id; the flight 5..=12 is lost and,
            // with zero redundancy, never retransmitted.
            if (5..=12).contains(&tick) {
                continue;
            }
            server.receive_snapshots(&packet, &mut server_net);
        }
        server.physics_process(DT, &mut server_host, &mut server_net);

        if tick == 13 {
            current_after_13 = server.current_input_id();
        }
    }

    // Inputs 5..=12 matched the bound payload, so when id 13 landed the
    // server jumped straight onto it.
    assert_eq!(current_after_13, Some(13));
    assert_eq!(server.current_input_id(), Some(20));
    // Eight empty ticks plus the tick that triggered the recovery scan.
    assert_eq!(server.missing_packets(), Some(9));
    // The ghost steps replayed the same payload the lost inputs carried.
    assert_eq!(server_host.position, master_host.position);
}

#[test]
fn packet_encoding_collapses_identical_inputs() {
    let mut config = ControllerConfig::default();
    config.set_max_redundant_inputs(50);

    let mut master = controller(Role::Master, &config);
    let mut master_host = TestHost::new(vec![7; 10]);
    let mut master_net = RecordingNet::default();

    for _ in 0..10 {
        master.physics_process(DT, &mut master_host, &mut master_net);
    }

    let packets = master_net.take_to_server();
    assert_eq!(packets.len(), 10);

    // Ten identical payloads collapse into a single entry.
    let last = packets.last().unwrap();
    assert_eq!(last.len(), 5 + (1 + 1));

    let reader = PacketReader::parse(last, 1).unwrap();
    assert_eq!(reader.entry_count(), 1);
    let snapshots: Vec<_> = reader.snapshots().collect();
    assert_eq!(snapshots.len(), 10);
    for (expected_id, (id, payload)) in (0..10u64).zip(&snapshots) {
        assert_eq!(*id, expected_id);
        assert_eq!(*payload, snapshots[0].1);
    }
}

#[test]
fn reconciliation_fires_once_for_the_newest_state() {
    let config = ControllerConfig::default();

    let mut master = controller(Role::Master, &config);
    let mut master_host = TestHost::new(vec![1; 64]);
    let mut master_net = RecordingNet::default();

    for _ in 0..50 {
        master.physics_process(DT, &mut master_host, &mut master_net);
    }
    assert_eq!(master.next_input_id(), Some(50));

    // Three authoritative states in rapid succession: only the newest is
    // retained.
    master.receive_state(30, 1111);
    master.receive_state(35, 2222);
    master.receive_state(40, 3333);

    master.physics_process(DT, &mut master_host, &mut master_net);

    // The predicted position right after stepping input id 40 was 41.
    assert_eq!(master_host.recoveries, vec![(40, 3333, 41)]);
    assert_eq!(master.reconciled_id(), Some(40));
    // Ids 41..=50 remain predicted.
    assert_eq!(master.pending_snapshots(), Some(10));

    // Replays of the same or older states change nothing.
    master.receive_state(40, 3333);
    master.receive_state(38, 9999);
    master.physics_process(DT, &mut master_host, &mut master_net);

    assert_eq!(master_host.recoveries.len(), 1);
}

#[test]
fn recovery_replay_resteps_pending_snapshots() {
    let config = ControllerConfig::default();

    let mut master = controller(Role::Master, &config);
    let mut master_host = TestHost::new(vec![1; 32]);
    master_host.directive = Recovery::Replay;
    let mut master_net = RecordingNet::default();

    for _ in 0..10 {
        master.physics_process(DT, &mut master_host, &mut master_net);
    }
    assert_eq!(master_host.steps, 10);

    master.receive_state(5, 99);
    master.physics_process(DT, &mut master_host, &mut master_net);

    assert_eq!(master_host.recoveries.len(), 1);
    // One regular substep plus the replay of the five still pending inputs.
    assert_eq!(master_host.steps, 10 + 1 + 5);
    assert_eq!(master.pending_snapshots(), Some(5));
}

#[test]
fn full_master_ring_stops_accepting_inputs() {
    let mut config = ControllerConfig::default();
    config.set_master_snapshot_storage_size(100);

    let mut master = controller(Role::Master, &config);
    let mut master_host = TestHost::new(vec![3; 200]);
    let mut master_net = RecordingNet::default();

    for _ in 0..150 {
        master.physics_process(DT, &mut master_host, &mut master_net);
    }

    // Backpressure: collection capped at the ring size, but the simulation
    // kept stepping with zeroed inputs.
    assert_eq!(master.next_input_id(), Some(100));
    assert_eq!(master.pending_snapshots(), Some(100));
    assert_eq!(master_net.to_server.len(), 100);
    assert_eq!(master_host.steps, 150);
    assert_eq!(master_host.position, 300);
}

#[test]
fn tick_speed_feedback_changes_the_collection_rate() {
    let config = ControllerConfig::default();
    let mut net = RecordingNet::default();

    let mut fast = controller(Role::Master, &config);
    let mut fast_host = TestHost::new(vec![0; 700]);

    fast.receive_tick_speed(100);
    assert_eq!(fast.tick_additional_speed(), Some(2.0));

    for _ in 0..600 {
        fast.physics_process(DT, &mut fast_host, &mut net);
    }
    // Ten seconds at 62 collections per second.
    let collected = fast.next_input_id().unwrap();
    assert!((619..=621).contains(&collected), "collected {collected}");

    let mut slow = controller(Role::Master, &config);
    let mut slow_host = TestHost::new(vec![0; 700]);

    slow.receive_tick_speed(-100);
    for _ in 0..600 {
        slow.physics_process(DT, &mut slow_host, &mut net);
    }
    let collected = slow.next_input_id().unwrap();
    assert!((579..=581).contains(&collected), "collected {collected}");

    // Out of range wire values clamp instead of being rejected.
    fast.receive_tick_speed(127);
    assert_eq!(fast.tick_additional_speed(), Some(2.0));
}

#[test]
fn state_broadcast_reaches_master_and_active_puppets() {
    let mut config = ControllerConfig::default();
    config.set_state_notify_interval(0.001);

    let mut master = controller(Role::Master, &config);
    let mut server = controller(Role::Server, &config);
    let mut master_host = TestHost::new((0..40).collect());
    let mut server_host = TestHost::new(Vec::new());
    let mut master_net = RecordingNet::default();
    let mut server_net = RecordingNet::default();

    server.on_peer_connection_change(&[MASTER_PEER, PUPPET_PEER]);

    for _ in 0..5 {
        master.physics_process(DT, &mut master_host, &mut master_net);
        for packet in master_net.take_to_server() {
            server.receive_snapshots(&packet, &mut server_net);
        }
        server.physics_process(DT, &mut server_host, &mut server_net);
    }

    // Input packets were relayed to the puppet verbatim.
    let relayed = server_net.take_to_puppets();
    assert!(!relayed.is_empty());
    assert!(relayed.iter().all(|(peer, _)| *peer == PUPPET_PEER));

    // Every broadcast went to both peers, same id and same payload.
    let states = server_net.take_states();
    assert!(!states.is_empty());
    let mut by_id = std::collections::HashMap::new();
    for (peer, id, state) in states {
        by_id.entry(id).or_insert_with(Vec::new).push((peer, state));
    }
    for deliveries in by_id.values() {
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].1, deliveries[1].1);
        let peers: Vec<PeerId> = deliveries.iter().map(|(peer, _)| *peer).collect();
        assert!(peers.contains(&MASTER_PEER));
        assert!(peers.contains(&PUPPET_PEER));
    }
}

#[test]
fn puppet_follows_and_reconciles() {
    let mut config = ControllerConfig::default();
    config.set_state_notify_interval(0.001);
    config.set_max_redundant_inputs(3);

    let mut harness = Harness::new(&config, (0..60).collect());
    let events = harness.run(30);

    // The first accepted authoritative state opened the communication once.
    assert_eq!(events, vec![ControllerEvent::CommsOpened]);

    // The puppet is playing inputs back and reconciling against the same
    // states the server broadcast.
    assert!(harness.puppet.current_input_id().is_some());
    assert!(!harness.puppet_host.recoveries.is_empty());
    for (id, server_state, _) in &harness.puppet_host.recoveries {
        assert!(harness.broadcasts.contains(&(*id, *server_state)));
    }
}

#[test]
fn puppet_flow_close_and_reopen() {
    let mut config = ControllerConfig::default();
    config.set_state_notify_interval(0.001);

    let mut harness = Harness::new(&config, (0..80).collect());

    let events = harness.run(10);
    assert_eq!(events, vec![ControllerEvent::CommsOpened]);

    // Server closes the flow: the puppet freezes.
    harness
        .server
        .set_puppet_active(PUPPET_PEER, false, &mut harness.server_net);
    let events = harness.run(10);
    assert_eq!(events, vec![ControllerEvent::CommsClosed]);
    assert_eq!(harness.puppet.is_flow_open(), Some(false));

    let frozen_id = harness.puppet.current_input_id();
    let events = harness.run(10);
    assert!(events.is_empty());
    assert_eq!(harness.puppet.current_input_id(), frozen_id);

    // Reopening re-arms the hard reset; the next state revives the puppet.
    harness
        .server
        .set_puppet_active(PUPPET_PEER, true, &mut harness.server_net);
    let events = harness.run(10);
    assert_eq!(events, vec![ControllerEvent::CommsOpened]);
    assert!(harness.puppet.current_input_id() > frozen_id);
}

#[test]
fn misrouted_calls_have_no_side_effects() {
    let config = ControllerConfig::default();

    let mut master = controller(Role::Master, &config);
    let mut server = controller(Role::Server, &config);
    let mut net = RecordingNet::default();

    // None of these belong to the role they are delivered to.
    master.receive_snapshots(&[1, 2, 3], &mut net);
    server.receive_state(7, 42);
    server.receive_tick_speed(50);
    master.receive_flow_status(false);

    let mut server_host = TestHost::new(Vec::new());
    let mut master_host = TestHost::new(vec![1; 4]);
    server.replay_snapshots(DT, &mut server_host);

    server.physics_process(DT, &mut server_host, &mut net);
    master.physics_process(DT, &mut master_host, &mut net);

    assert_eq!(server.current_input_id(), None);
    assert_eq!(server_host.steps, 0);
    assert!(server_host.recoveries.is_empty());
    assert_eq!(master.tick_additional_speed(), Some(0.0));
}
