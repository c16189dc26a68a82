//! Registry daemon errors.

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
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
