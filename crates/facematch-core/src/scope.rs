//! Per-user storage scopes and where each scope lives on disk.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CACHE_FILE_NAME: &str = "face_encodings.json";
const USER_NAME_MIN: usize = 3;
const USER_NAME_MAX: usize = 50;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ScopeError {
    #[error("user name must be 3-50 characters, got {0}")]
    Length(usize),
    #[error("user name may only contain letters, digits and underscores: {0:?}")]
    InvalidCharacters(String),
}

/// Whose gallery an operation works on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Single shared gallery from before per-user storage.
    Global,
    User(String),
}

impl Scope {
    /// Validate a user name before it is used as a path component.
    pub fn user(name: &str) -> Result<Self, ScopeError> {
        let len = name.chars().count();
        if !(USER_NAME_MIN..=USER_NAME_MAX).contains(&len) {
            return Err(ScopeError::Length(len));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ScopeError::InvalidCharacters(name.to_string()));
        }
        Ok(Scope::User(name.to_string()))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => f.write_str("global"),
            Scope::User(name) => write!(f, "user:{name}"),
        }
    }
}

/// Resolved locations for one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopePaths {
    /// One subdirectory per label, images directly inside.
    pub people_dir: PathBuf,
    pub cache_path: PathBuf,
}

impl ScopePaths {
    /// Create the directories this scope writes into.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.people_dir)?;
        if let Some(parent) = self.cache_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

/// Directory layout under a data root.
///
/// ```text
/// <root>/people/                                 global scope
/// <root>/encodings/face_encodings.json
/// <root>/users/<name>/people/                    per-user scope
/// <root>/users/<name>/encodings/face_encodings.json
/// ```
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn paths(&self, scope: &Scope) -> ScopePaths {
        let base = match scope {
            Scope::Global => self.root.clone(),
            Scope::User(name) => self.root.join("users").join(name),
        };
        ScopePaths {
            people_dir: base.join("people"),
            cache_path: base.join("encodings").join(CACHE_FILE_NAME),
        }
    }
}
