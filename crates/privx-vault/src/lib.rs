//! privx-vault: secret store and encryption key bindings.

pub mod kms;
pub mod secret;

pub use kms::KmsKey;
pub use secret::{EXCLUDED_CHARACTERS, SECRET_KEY, Secret, SecretSpec, secret};
