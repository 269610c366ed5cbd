use glam::Vec2;

use super::bit_array::{self, BitArray};

const ZERO_EPSILON: f32 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Int,
    UnitReal,
    NormVec2,
}

/// Compression level for a declared input field.
///
/// The (kind, level) pair decides how many bits the field takes and how much
/// precision survives the trip:
///
/// Bool is always 1 bit.
/// Int: 64 / 32 / 16 / 8 bits, clamped to the signed range of the width.
/// UnitReal: 10 / 8 / 6 / 4 bits, max loss ~0.09% / ~0.3% / ~3.2% / ~6%.
/// NormVec2: 12 / 11 / 10 / 9 bits (one of which flags the zero vector),
/// max angle loss ~0.17 / ~0.35 / ~0.7 / ~1.1 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    Level0,
    Level1,
    #[default]
    Level2,
    Level3,
}

#[derive(Debug, Clone, Copy)]
struct FieldMeta {
    kind: FieldKind,
    level: CompressionLevel,
    bit_offset: usize,
}

fn bits_taken(kind: FieldKind, level: CompressionLevel) -> usize {
    match kind {
        FieldKind::Bool => 1,
        FieldKind::Int => match level {
            CompressionLevel::Level0 => 64,
            CompressionLevel::Level1 => 32,
            CompressionLevel::Level2 => 16,
            CompressionLevel::Level3 => 8,
        },
        FieldKind::UnitReal => match level {
            CompressionLevel::Level0 => 10,
            CompressionLevel::Level1 => 8,
            CompressionLevel::Level2 => 6,
            CompressionLevel::Level3 => 4,
        },
        // One extra bit flags whether the vector is zero or a direction.
        FieldKind::NormVec2 => match level {
            CompressionLevel::Level0 => 11 + 1,
            CompressionLevel::Level1 => 10 + 1,
            CompressionLevel::Level2 => 9 + 1,
            CompressionLevel::Level3 => 8 + 1,
        },
    }
}

fn compress_unit_float(value: f64, scale: f64) -> u64 {
    (value * scale).min(scale) as u64
}

fn decompress_unit_float(value: u64, scale: f64) -> f64 {
    value as f64 / scale
}

fn sign_extend(value: u64, bits: usize) -> i64 {
    match bits {
        8 => i64::from(value as u8 as i8),
        16 => i64::from(value as u16 as i16),
        32 => i64::from(value as u32 as i32),
        _ => value as i64,
    }
}

fn read_int(fields: &[FieldMeta], bytes: &[u8], index: usize) -> i64 {
    let meta = fields[index];
    let bits = bits_taken(meta.kind, meta.level);
    sign_extend(bit_array::read_bits(bytes, meta.bit_offset, bits), bits)
}

fn read_unit_real(fields: &[FieldMeta], bytes: &[u8], index: usize) -> f32 {
    let meta = fields[index];
    let bits = bits_taken(meta.kind, meta.level);
    let scale = ((1u64 << bits) - 1) as f64;
    decompress_unit_float(bit_array::read_bits(bytes, meta.bit_offset, bits), scale) as f32
}

fn read_normalized_vector(fields: &[FieldMeta], bytes: &[u8], index: usize) -> Vec2 {
    let meta = fields[index];
    let angle_bits = bits_taken(meta.kind, meta.level) - 1;
    let scale = ((1u64 << angle_bits) - 1) as f64;

    let is_not_zero = bit_array::read_bits(bytes, meta.bit_offset, 1);
    let compressed_angle = bit_array::read_bits(bytes, meta.bit_offset + 1, angle_bits);

    let angle =
        decompress_unit_float(compressed_angle, scale) * std::f64::consts::TAU - std::f64::consts::PI;
    Vec2::new(angle.cos() as f32, angle.sin() as f32) * is_not_zero as f32
}

/// Read-only access to a packed input payload through a borrowed layout.
///
/// Handed to the host's input-difference predicate so it can compare the
/// currently bound inputs against a candidate payload without copies.
#[derive(Clone, Copy)]
pub struct InputView<'a> {
    fields: &'a [FieldMeta],
    bytes: &'a [u8],
}

impl InputView<'_> {
    fn field(&self, index: usize, kind: FieldKind) -> bool {
        match self.fields.get(index) {
            Some(meta) if meta.kind == kind => true,
            Some(meta) => {
                log::error!(
                    "input field {index} is {:?}, accessed as {kind:?}",
                    meta.kind
                );
                false
            }
            None => {
                log::error!("input field index {index} out of range");
                false
            }
        }
    }

    pub fn get_bool(&self, index: usize) -> bool {
        if !self.field(index, FieldKind::Bool) {
            return false;
        }
        bit_array::read_bits(self.bytes, self.fields[index].bit_offset, 1) != 0
    }

    pub fn get_int(&self, index: usize) -> i64 {
        if !self.field(index, FieldKind::Int) {
            return 0;
        }
        read_int(self.fields, self.bytes, index)
    }

    pub fn get_unit_real(&self, index: usize) -> f32 {
        if !self.field(index, FieldKind::UnitReal) {
            return 0.0;
        }
        read_unit_real(self.fields, self.bytes, index)
    }

    pub fn get_normalized_vector(&self, index: usize) -> Vec2 {
        if !self.field(index, FieldKind::NormVec2) {
            return Vec2::ZERO;
        }
        read_normalized_vector(self.fields, self.bytes, index)
    }
}

/// Bit-packed store for one tick's worth of player inputs.
///
/// Fields are declared up front with [`InputBuffer::add_field`]; the first
/// write (or an explicit [`InputBuffer::freeze`]) compiles the declarations
/// into a fixed bit layout. After that the layout never changes and every
/// accessor is random access.
#[derive(Debug, Clone)]
pub struct InputBuffer {
    declaring: bool,
    fields: Vec<FieldMeta>,
    store: BitArray,
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl InputBuffer {
    pub fn new() -> Self {
        Self {
            declaring: true,
            fields: Vec::new(),
            store: BitArray::new(),
        }
    }

    /// Declares the next field. Returns its index, or `None` once the layout
    /// is frozen.
    pub fn add_field(&mut self, kind: FieldKind, level: CompressionLevel) -> Option<usize> {
        if !self.declaring {
            log::error!("cannot declare input fields after the layout is frozen");
            return None;
        }

        let index = self.fields.len();
        self.fields.push(FieldMeta {
            kind,
            level,
            bit_offset: 0,
        });
        Some(index)
    }

    /// Compiles the declared fields into bit offsets and sizes the store.
    /// Idempotent; implied by the first write.
    pub fn freeze(&mut self) {
        if !self.declaring {
            return;
        }
        self.declaring = false;

        let mut bits = 0;
        for meta in &mut self.fields {
            meta.bit_offset = bits;
            bits += bits_taken(meta.kind, meta.level);
        }

        self.store.resize_in_bits(bits);
    }

    pub fn is_frozen(&self) -> bool {
        !self.declaring
    }

    /// Packed payload size in bytes.
    pub fn byte_size(&self) -> usize {
        if self.declaring {
            log::error!("the input buffer must be frozen to know its size");
            return 0;
        }
        self.store.size_in_bytes()
    }

    pub fn bytes(&self) -> &[u8] {
        self.store.bytes()
    }

    /// Rebinds the buffer contents to a received payload of the same width.
    pub fn copy_bytes_from(&mut self, data: &[u8]) {
        if data.len() != self.store.size_in_bytes() {
            log::error!(
                "payload width {} does not match the input buffer width {}",
                data.len(),
                self.store.size_in_bytes()
            );
            return;
        }
        self.store.copy_from_slice(data);
    }

    pub fn zero(&mut self) {
        self.store.zero();
    }

    pub fn view(&self) -> InputView<'_> {
        InputView {
            fields: &self.fields,
            bytes: self.store.bytes(),
        }
    }

    /// A view over foreign payload bytes interpreted through this buffer's
    /// layout.
    pub fn view_of<'a>(&'a self, bytes: &'a [u8]) -> InputView<'a> {
        InputView {
            fields: &self.fields,
            bytes,
        }
    }

    fn writable_field(&mut self, index: usize, kind: FieldKind) -> Option<FieldMeta> {
        self.freeze();
        match self.fields.get(index) {
            Some(meta) if meta.kind == kind => Some(*meta),
            Some(meta) => {
                log::error!("input field {index} is {:?}, written as {kind:?}", meta.kind);
                None
            }
            None => {
                log::error!("input field index {index} out of range");
                None
            }
        }
    }

    /// Returns the same value.
    pub fn set_bool(&mut self, index: usize, input: bool) -> bool {
        let Some(meta) = self.writable_field(index, FieldKind::Bool) else {
            return false;
        };
        self.store.store_bits(meta.bit_offset, u64::from(input), 1);
        input
    }

    pub fn get_bool(&self, index: usize) -> bool {
        if self.declaring {
            log::error!("the input buffer must be frozen before reading");
            return false;
        }
        self.view().get_bool(index)
    }

    /// Stores the integer clamped to the signed range of the field width and
    /// returns the stored value.
    pub fn set_int(&mut self, index: usize, input: i64) -> i64 {
        let Some(meta) = self.writable_field(index, FieldKind::Int) else {
            return 0;
        };

        let bits = bits_taken(meta.kind, meta.level);
        let value = match bits {
            8 => input.clamp(i64::from(i8::MIN), i64::from(i8::MAX)) as u64 & 0xFF,
            16 => input.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as u64 & 0xFFFF,
            32 => input.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as u64 & 0xFFFF_FFFF,
            _ => input as u64,
        };

        self.store.store_bits(meta.bit_offset, value, bits);
        sign_extend(value, bits)
    }

    pub fn get_int(&self, index: usize) -> i64 {
        if self.declaring {
            log::error!("the input buffer must be frozen before reading");
            return 0;
        }
        self.view().get_int(index)
    }

    /// Stores a value conceptually in `[0, 1]` and returns the quantised
    /// value actually stored, so every peer works from the same number.
    pub fn set_unit_real(&mut self, index: usize, input: f32) -> f32 {
        let Some(meta) = self.writable_field(index, FieldKind::UnitReal) else {
            return 0.0;
        };

        let bits = bits_taken(meta.kind, meta.level);
        let scale = ((1u64 << bits) - 1) as f64;
        let compressed = compress_unit_float(f64::from(input), scale);
        self.store.store_bits(meta.bit_offset, compressed, bits);

        decompress_unit_float(compressed, scale) as f32
    }

    pub fn get_unit_real(&self, index: usize) -> f32 {
        if self.declaring {
            log::error!("the input buffer must be frozen before reading");
            return 0.0;
        }
        self.view().get_unit_real(index)
    }

    /// Stores a normalized direction (or the zero vector) and returns the
    /// decompressed vector. Non-normalized inputs give unexpected results.
    pub fn set_normalized_vector(&mut self, index: usize, input: Vec2) -> Vec2 {
        let Some(meta) = self.writable_field(index, FieldKind::NormVec2) else {
            return Vec2::ZERO;
        };

        let angle = f64::from(input.y.atan2(input.x));
        let is_not_zero = u64::from(input.length_squared() > ZERO_EPSILON);

        let angle_bits = bits_taken(meta.kind, meta.level) - 1;
        let scale = ((1u64 << angle_bits) - 1) as f64;
        let compressed_angle =
            compress_unit_float((angle + std::f64::consts::PI) / std::f64::consts::TAU, scale);

        self.store.store_bits(meta.bit_offset, is_not_zero, 1);
        self.store
            .store_bits(meta.bit_offset + 1, compressed_angle, angle_bits);

        let decompressed =
            decompress_unit_float(compressed_angle, scale) * std::f64::consts::TAU
                - std::f64::consts::PI;
        Vec2::new(decompressed.cos() as f32, decompressed.sin() as f32) * is_not_zero as f32
    }

    pub fn get_normalized_vector(&self, index: usize) -> Vec2 {
        if self.declaring {
            log::error!("the input buffer must be frozen before reading");
            return Vec2::ZERO;
        }
        self.view().get_normalized_vector(index)
    }
}
