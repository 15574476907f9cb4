pub(crate) mod framing;
pub mod listener;
pub mod message;
pub mod transport;

pub use listener::{bind_factory_listener, serve_factory};
pub use message::{FactoryRequest, FactoryResponse, WireError};
pub use transport::{ClientError, FactoryClient};
