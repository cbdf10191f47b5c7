use std::path::PathBuf;

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};

use crate::api::{LoginResponse, Token, User};

/// Bearer token and profile of the logged-in back-office user. Loaded once
/// and handed to whatever needs it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub token: Token,
    pub user: User,
}
impl From<LoginResponse> for Session {
    fn from(response: LoginResponse) -> Self {
        Self {
            token: response.token,
            user: response.user,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}
impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
    pub async fn load(&self) -> Result<Option<Session>> {
        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("Couldn't open session file"),
        };
        let mut contents = vec![];
        file.read_to_end(&mut contents).await?;
        let session = serde_json::from_slice::<Session>(&contents)
            .with_context(|| format!("Corrupt session file {}", self.path.display()))?;
        Ok(Some(session))
    }
    pub async fn save(&self, session: &Session) -> Result<()> {
        let mut file = File::create(&self.path).await?;
        file.write_all(&serde_json::to_vec_pretty(session)?).await?;
        debug!("Stored session of {} in {}", session.user.username, self.path.display());
        Ok(())
    }
    pub async fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
