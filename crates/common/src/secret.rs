//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types. Service principal secrets and bearer
//! tokens are always held as `SecretString`, whose `Debug` output is
//! redacted, so deriving `Debug` on a struct that carries one is safe.
//!
//! ```rust
//! use common::secret::SecretString;
//! use secrecy::ExposeSecret;
//!
//! let secret = SecretString::from("hunter2");
//! assert!(format!("{secret:?}").contains("REDACTED"));
//! assert_eq!(secret.expose_secret(), "hunter2");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
