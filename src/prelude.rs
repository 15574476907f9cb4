//! tlsfactory prelude for test drivers.
//! Import with: `use tlsfactory::prelude::*;`

pub use crate::config::{Config, EndpointConfig};
pub use crate::endpoint::{
    EndpointHandle, EndpointInfo, EndpointRegistry, EndpointState, HandshakeOutcome,
    OutcomeResult,
};
pub use crate::error::{ErrorKind, FactoryError, FactoryResult};
pub use crate::factory::{CreatedServer, FactoryService};
pub use crate::network::{ClientError, FactoryClient};
pub use crate::security::{
    AfterHandshake, FailureKind, ProbeConfig, ProbeSession, SecurityConfigSpec, TlsVersion,
    VerificationMode,
};
