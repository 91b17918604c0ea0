pub mod errors;
pub mod id;

pub use errors::{ConfigError, DecodeError, RegistryError, RelayError};
pub use id::{ConnectionId, ConnectionIdGenerator};

pub type Result<T> = std::result::Result<T, RelayError>;
