use bitflags::bitflags;
use glam::Vec2;
use rkyv::{Archive, Deserialize, Serialize};

use tether::{
    CharacterHost, CompressionLevel, FieldKind, InputBuffer, InputView, Recovery,
};

const WALK_SPEED: f32 = 4.0;
const SPRINT_SPEED: f32 = 9.0;
const DASH_DISTANCE: f32 = 1.5;
const RECOVERY_EPSILON: f32 = 0.001;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Buttons: u8 {
        const SPRINT = 1 << 0;
        const DASH = 1 << 1;
    }
}

/// Field indices of the demo input schema.
#[derive(Debug, Clone, Copy)]
pub struct InputSchema {
    pub direction: usize,
    pub throttle: usize,
    pub sprint: usize,
    pub dash: usize,
}

/// Declares the demo input fields: one of every supported kind.
pub fn build_inputs() -> (InputBuffer, InputSchema) {
    let mut inputs = InputBuffer::new();
    let schema = InputSchema {
        direction: inputs
            .add_field(FieldKind::NormVec2, CompressionLevel::Level2)
            .expect("schema declared before freezing"),
        throttle: inputs
            .add_field(FieldKind::UnitReal, CompressionLevel::Level1)
            .expect("schema declared before freezing"),
        sprint: inputs
            .add_field(FieldKind::Bool, CompressionLevel::Level0)
            .expect("schema declared before freezing"),
        dash: inputs
            .add_field(FieldKind::Bool, CompressionLevel::Level0)
            .expect("schema declared before freezing"),
    };
    (inputs, schema)
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct CharacterState {
    pub position: [f32; 2],
    pub velocity: [f32; 2],
}

/// A wandering 2D character. Input generation is a pure function of the
/// collection counter, so every run with the same seed is identical.
pub struct DemoCharacter {
    schema: InputSchema,
    pub position: Vec2,
    pub velocity: Vec2,
    input_tick: u64,
    pub recoveries: u64,
    pub replays: u64,
    pub max_divergence: f32,
}

impl DemoCharacter {
    pub fn new(schema: InputSchema) -> Self {
        Self {
            schema,
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            input_tick: 0,
            recoveries: 0,
            replays: 0,
            max_divergence: 0.0,
        }
    }
}

impl CharacterHost for DemoCharacter {
    type State = CharacterState;

    fn collect_inputs(&mut self, inputs: &mut InputBuffer) {
        let t = self.input_tick;
        self.input_tick += 1;

        // A slowly turning heading, held for stretches so the dedup in the
        // packet encoder has something to collapse.
        let heading = ((t / 45) as f32 * 0.7).sin() * std::f32::consts::PI;
        let moving = (t / 240) % 4 != 3;

        let mut buttons = Buttons::default();
        buttons.set(Buttons::SPRINT, (t / 120) % 2 == 0);
        buttons.set(Buttons::DASH, t % 300 == 150);

        let direction = if moving {
            Vec2::new(heading.cos(), heading.sin())
        } else {
            Vec2::ZERO
        };

        inputs.set_normalized_vector(self.schema.direction, direction);
        inputs.set_unit_real(self.schema.throttle, if moving { 1.0 } else { 0.0 });
        inputs.set_bool(self.schema.sprint, buttons.contains(Buttons::SPRINT));
        inputs.set_bool(self.schema.dash, buttons.contains(Buttons::DASH));
    }

    fn step_player(&mut self, inputs: &InputBuffer, dt: f32) {
        let direction = inputs.get_normalized_vector(self.schema.direction);
        let throttle = inputs.get_unit_real(self.schema.throttle);
        let sprint = inputs.get_bool(self.schema.sprint);

        let speed = if sprint { SPRINT_SPEED } else { WALK_SPEED };
        self.velocity = direction * speed * throttle;
        self.position += self.velocity * dt;

        if inputs.get_bool(self.schema.dash) {
            self.position += direction * DASH_DISTANCE;
        }
    }

    fn are_inputs_different(&self, a: InputView<'_>, b: InputView<'_>) -> bool {
        a.get_normalized_vector(self.schema.direction)
            != b.get_normalized_vector(self.schema.direction)
            || a.get_unit_real(self.schema.throttle) != b.get_unit_real(self.schema.throttle)
            || a.get_bool(self.schema.sprint) != b.get_bool(self.schema.sprint)
            || a.get_bool(self.schema.dash) != b.get_bool(self.schema.dash)
    }

    fn create_snapshot(&mut self) -> CharacterState {
        CharacterState {
            position: self.position.to_array(),
            velocity: self.velocity.to_array(),
        }
    }

    fn process_recovery(
        &mut self,
        _id: u64,
        server: &CharacterState,
        client: &CharacterState,
    ) -> Recovery {
        let server_position = Vec2::from_array(server.position);
        let client_position = Vec2::from_array(client.position);
        let divergence = server_position.distance(client_position);

        self.recoveries += 1;
        self.max_divergence = self.max_divergence.max(divergence);

        if divergence > RECOVERY_EPSILON {
            self.position = server_position;
            self.velocity = Vec2::from_array(server.velocity);
            self.replays += 1;
            Recovery::Replay
        } else {
            Recovery::Accept
        }
    }
}
