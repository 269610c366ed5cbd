mod character;
mod link;

use anyhow::Result;
use clap::Parser;

use tether::{CharacterController, ControllerConfig, PeerId, Role, Transport};

use character::{CharacterState, DemoCharacter, build_inputs};
use link::{LinkCondition, LinkMessage, LossyLink};

const SERVER_PEER: PeerId = 1;
const MASTER_PEER: PeerId = 2;
const PUPPET_PEER: PeerId = 3;

#[derive(Parser)]
#[command(name = "tether-demo")]
#[command(about = "Master, server and puppet over a lossy loopback link")]
struct Args {
    #[arg(long, default_value_t = 1800, help = "Simulated ticks to run")]
    ticks: u64,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(long, default_value_t = 10.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value_t = 1, help = "Minimum latency in ticks")]
    min_latency: u32,

    #[arg(long, default_value_t = 4, help = "Maximum latency in ticks")]
    max_latency: u32,

    #[arg(long, default_value_t = 2, help = "Jitter in ticks")]
    jitter: u32,

    #[arg(long, default_value_t = 0x5EED)]
    seed: u64,

    #[arg(long, default_value_t = 0.25, help = "State broadcast interval in seconds")]
    state_interval: f32,
}

/// Routes a controller's outbound traffic onto the link.
struct Port<'a> {
    link: &'a mut LossyLink,
    now: u64,
}

impl Transport<CharacterState> for Port<'_> {
    fn send_inputs_to_server(&mut self, data: &[u8]) {
        self.link
            .post(self.now, SERVER_PEER, &LinkMessage::Inputs(data.to_vec()));
    }

    fn send_inputs_to_puppet(&mut self, peer: PeerId, data: &[u8]) {
        self.link
            .post(self.now, peer, &LinkMessage::Inputs(data.to_vec()));
    }

    fn send_tick_speed_to_master(&mut self, percent: i8) {
        self.link
            .post(self.now, MASTER_PEER, &LinkMessage::TickSpeed(percent));
    }

    fn send_state(&mut self, peer: PeerId, id: u64, state: &CharacterState) {
        self.link.post(
            self.now,
            peer,
            &LinkMessage::State {
                id,
                state: state.clone(),
            },
        );
    }

    fn send_flow_status(&mut self, peer: PeerId, open: bool) {
        self.link.post(self.now, peer, &LinkMessage::Flow(open));
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = ControllerConfig::default();
    config.set_iterations_per_second(args.tick_rate);
    config.set_state_notify_interval(args.state_interval);
    config.validate()?;

    let dt = 1.0 / args.tick_rate as f32;

    let (master_inputs, schema) = build_inputs();
    let (server_inputs, _) = build_inputs();
    let (puppet_inputs, _) = build_inputs();

    let mut master: CharacterController<DemoCharacter> =
        CharacterController::new(Role::Master, MASTER_PEER, config.clone(), master_inputs);
    let mut server: CharacterController<DemoCharacter> =
        CharacterController::new(Role::Server, MASTER_PEER, config.clone(), server_inputs);
    let mut puppet: CharacterController<DemoCharacter> =
        CharacterController::new(Role::Puppet, MASTER_PEER, config, puppet_inputs);

    let mut master_character = DemoCharacter::new(schema);
    let mut server_character = DemoCharacter::new(schema);
    let mut puppet_character = DemoCharacter::new(schema);

    server.on_peer_connection_change(&[MASTER_PEER, PUPPET_PEER]);

    let mut link = LossyLink::new(
        LinkCondition {
            loss_percent: args.loss_percent,
            min_latency_ticks: args.min_latency,
            max_latency_ticks: args.max_latency,
            jitter_ticks: args.jitter,
        },
        args.seed,
    );

    log::info!(
        "running {} ticks at {} Hz, {:.0}% loss, {}..{} (+{}) ticks latency",
        args.ticks,
        args.tick_rate,
        args.loss_percent,
        args.min_latency,
        args.max_latency,
        args.jitter
    );

    for tick in 0..args.ticks {
        for (to, message) in link.take_due(tick) {
            let mut port = Port {
                link: &mut link,
                now: tick,
            };
            match (to, message) {
                (SERVER_PEER, LinkMessage::Inputs(data)) => {
                    server.receive_snapshots(&data, &mut port);
                }
                (MASTER_PEER, LinkMessage::State { id, state }) => {
                    master.receive_state(id, state);
                }
                (MASTER_PEER, LinkMessage::TickSpeed(percent)) => {
                    master.receive_tick_speed(percent);
                }
                (PUPPET_PEER, LinkMessage::Inputs(data)) => {
                    puppet.receive_snapshots(&data, &mut port);
                }
                (PUPPET_PEER, LinkMessage::State { id, state }) => {
                    puppet.receive_state(id, state);
                }
                (PUPPET_PEER, LinkMessage::Flow(open)) => {
                    puppet.receive_flow_status(open);
                }
                (to, message) => {
                    log::warn!("unroutable message {message:?} for peer {to}");
                }
            }
        }

        master.physics_process(
            dt,
            &mut master_character,
            &mut Port {
                link: &mut link,
                now: tick,
            },
        );
        server.physics_process(
            dt,
            &mut server_character,
            &mut Port {
                link: &mut link,
                now: tick,
            },
        );
        puppet.physics_process(
            dt,
            &mut puppet_character,
            &mut Port {
                link: &mut link,
                now: tick,
            },
        );

        for event in puppet.drain_events() {
            log::info!("puppet event at tick {tick}: {event:?}");
        }

        if tick % u64::from(args.tick_rate) == 0 {
            log::info!(
                "t={tick:>5} master=({:+7.2},{:+7.2}) server=({:+7.2},{:+7.2}) puppet=({:+7.2},{:+7.2}) queue={} missing={} bias={:+.2}",
                master_character.position.x,
                master_character.position.y,
                server_character.position.x,
                server_character.position.y,
                puppet_character.position.x,
                puppet_character.position.y,
                server.input_queue_len().unwrap_or(0),
                server.missing_packets().unwrap_or(0),
                master.tick_additional_speed().unwrap_or(0.0),
            );
        }
    }

    let master_server_gap = master_character.position.distance(server_character.position);
    let puppet_server_gap = puppet_character.position.distance(server_character.position);

    log::info!(
        "link: {} posted, {} dropped, {} delivered, {} still in flight",
        link.posted,
        link.dropped,
        link.delivered,
        link.in_flight()
    );
    log::info!(
        "master: {} recoveries, {} replays, max divergence {:.4}",
        master_character.recoveries,
        master_character.replays,
        master_character.max_divergence
    );
    log::info!(
        "puppet: {} recoveries, {} replays, max divergence {:.4}",
        puppet_character.recoveries,
        puppet_character.replays,
        puppet_character.max_divergence
    );
    log::info!(
        "final gap to server: master {master_server_gap:.3}, puppet {puppet_server_gap:.3}"
    );

    Ok(())
}
