use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModemError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("audio boundary error: {0}")]
    Audio(String),

    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("LDPC code construction failed: {0}")]
    Ldpc(String),

    #[error("message too long: {length} bytes, limit {limit}")]
    MessageLength { length: usize, limit: usize },

    #[error("no free message slot available")]
    NoFreeSlot,

    #[error("message id {0} out of range")]
    MessageId(u8),

    #[error("settings file error: {0}")]
    Settings(String),
}
