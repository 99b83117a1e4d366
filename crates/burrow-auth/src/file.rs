//! TOML user file loading.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::AuthError;
use crate::memory::MemoryUserDb;

#[derive(Debug, Deserialize)]
struct UsersFile {
    #[serde(default)]
    users: Vec<UserEntry>,
}

#[derive(Debug, Deserialize)]
struct UserEntry {
    id: String,
    password: String,
}

/// Load a user database from a TOML file of `[[users]]` entries:
///
/// ```toml
/// [[users]]
/// id = "alice"
/// password = "s3cret"
/// ```
pub fn load_users(path: impl AsRef<Path>) -> Result<MemoryUserDb, AuthError> {
    let data = fs::read_to_string(path.as_ref()).map_err(AuthError::backend)?;
    let parsed: UsersFile = toml::from_str(&data).map_err(AuthError::backend)?;
    Ok(MemoryUserDb::from_users(
        parsed.users.into_iter().map(|u| (u.id, u.password)),
    ))
}
