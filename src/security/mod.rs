pub mod failure;
pub mod identity;
pub mod pem;
pub mod pki;
pub mod probe;
pub mod settings;
pub mod verifier;

pub use failure::{FailureKind, HandshakeFailure};
pub use identity::{PeerIdentity, PeerIdentityMatcher};
pub use probe::{probe, ProbeConfig, ProbeReport, ProbeSession};
pub use settings::{
    AfterHandshake, IdentitySpec, SecurityConfigSpec, SecurityConfiguration, TlsVersion,
    VerificationMode,
};
