//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports from the [`secrecy`] crate. Use these for the join-token
//! secret, the TURN shared secret, and the internal API secrets.
//!
//! `SecretString` implements `Debug` with redaction, so any struct that
//! derives `Debug` while holding one cannot leak it via `{:?}` or tracing.
//! Values are zeroized on drop. Access requires an explicit
//! [`ExposeSecret::expose_secret`] call.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
