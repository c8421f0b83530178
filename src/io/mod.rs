pub mod audio;
pub mod ring_buffer;
pub mod tcp;

pub use audio::{AudioInterface, CaptureGeometry, CaptureWindow, LoopbackChannel};
pub use ring_buffer::RingBuffer;
