use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::ClientError;
use crate::users::repo_types::{Role, User};

/// What the shell remembers between runs about the logged-in user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub token: String,
    pub profile_image: Option<String>,
}

impl Session {
    pub fn new(token: String, user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            role: user.role,
            token,
            profile_image: user.profile_image.clone(),
        }
    }

    pub fn needs_onboarding(&self) -> bool {
        self.role == Role::Pending
    }
}

/// JSON file holding at most one session: loaded on start, rewritten on every
/// change, removed on logout.
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    current: Option<Session>,
}

impl SessionStore {
    /// Reads `path` if it exists. An unreadable or corrupt file counts as
    /// logged out.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Session>(&bytes) {
                Ok(session) => {
                    debug!(user_id = %session.id, "session restored");
                    Some(session)
                }
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "discarding corrupt session file");
                    None
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "session file unreadable");
                None
            }
        };
        Self { path, current }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.current.as_ref().map(|s| s.token.as_str())
    }

    pub fn is_logged_in(&self) -> bool {
        self.current.is_some()
    }

    pub fn save(&mut self, session: Session) -> Result<(), ClientError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&session)?)?;
        fs::rename(&tmp, &self.path)?;
        self.current = Some(session);
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), ClientError> {
        self.current = None;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
