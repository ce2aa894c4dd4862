//! Credentials store consulted on every authenticated request.
//!
//! The store is a username → bcrypt-hash mapping loaded once at startup and
//! shared immutably across all workers. The on-disk format is one user per
//! line, `username:bcrypthash`. The running proxy never rewrites the file;
//! the `auth` subcommands do, with mode 0600.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use thiserror::Error;

/// Error type for credential parsing, hashing, and file access.
#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed credentials line {line}: missing ':' separator")]
    Malformed { line: usize },
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

/// A bcrypt password hash. The encoded form never contains `:` or newlines,
/// so it round-trips through the credentials file unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    /// Hash a plaintext password with bcrypt at the default cost.
    pub fn create(plaintext: &str) -> Result<Self, CredentialsError> {
        Ok(Self(bcrypt::hash(plaintext, bcrypt::DEFAULT_COST)?))
    }

    /// Constant-time verification. An undecodable hash counts as a mismatch.
    pub fn verify(&self, plaintext: &str) -> bool {
        bcrypt::verify(plaintext, &self.0).unwrap_or(false)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Password {
    fn from(hash: String) -> Self {
        Self(hash)
    }
}

/// Username → password-hash mapping. Keys are unique; a repeated username
/// in the source keeps the last entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    entries: HashMap<String, Password>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty store disables authentication entirely.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, username: &str) -> Option<&Password> {
        self.entries.get(username)
    }

    pub fn set(&mut self, username: impl Into<String>, password: Password) {
        self.entries.insert(username.into(), password);
    }

    pub fn remove(&mut self, username: &str) -> Option<Password> {
        self.entries.remove(username)
    }

    /// Parse a line-oriented `username:hash` stream. Empty lines are
    /// skipped; a non-empty line without `:` is a parse error. An empty
    /// source yields an empty map.
    pub fn read(reader: impl BufRead) -> Result<Self, CredentialsError> {
        let mut entries = HashMap::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let (username, hash) = line
                .split_once(':')
                .ok_or(CredentialsError::Malformed { line: idx + 1 })?;
            entries.insert(username.to_string(), Password(hash.to_string()));
        }
        Ok(Self { entries })
    }

    /// Emit `username:hash` lines, flushing before returning. Writer errors
    /// propagate to the caller.
    pub fn write(&self, writer: impl Write) -> io::Result<()> {
        let mut writer = BufWriter::new(writer);
        for (username, password) in &self.entries {
            writeln!(writer, "{}:{}", username, password.as_str())?;
        }
        writer.flush()
    }

    pub fn load(path: &Path) -> Result<Self, CredentialsError> {
        let file = File::open(path)?;
        Self::read(BufReader::new(file))
    }

    /// Rewrite the passwords file, creating it with mode 0600.
    pub fn store(&self, path: &Path) -> Result<(), CredentialsError> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(path)?;
        Ok(self.write(file)?)
    }
}
