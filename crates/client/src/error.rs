//! Client-side setup errors.
//!
//! Call outcomes travel as [`sb_protocol::Fault`]; this type only covers
//! construction — bad configuration and listener binding.

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("config: {0}")]
    Config(String),
    #[error("bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
