//! HTTP Basic credentials backed by bcrypt hashes.

mod credentials;

pub use credentials::{Credentials, CredentialsError, Password};
