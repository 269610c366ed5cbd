mod bit_array;
mod input_buffer;

pub use bit_array::{BitArray, read_bits, store_bits};
pub use input_buffer::{CompressionLevel, FieldKind, InputBuffer, InputView};
