pub mod buffer;
pub mod controller;
pub mod message;
pub mod timer;

pub use buffer::FifoBuffer;
pub use controller::{
    build_ack_messages, ArqChannels, ArqConfig, ArqController, ArqStats, CtlEvent, Measurements,
    RxFrame, TxJob,
};
pub use message::{
    ConnectionStatus, ControlCode, LinkStatus, Message, MessageStatus, MessageType, Role,
};
pub use timer::Timer;
