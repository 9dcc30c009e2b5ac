//! Key material owned by the gateway: session keys, device signing secrets
//! and the RSA keyring for legacy clients.

pub mod keyring;
pub mod secrets;
pub mod session;

pub use keyring::{generate_keypair, GeneratedKeyPair, RsaKeyring};
pub use secrets::DeviceSecrets;
pub use session::SessionKeyStore;
