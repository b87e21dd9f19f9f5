use std::path::{Path, PathBuf};

use strongbox_common::error::{Result, StrongboxError};
use tokio::fs;
use uuid::Uuid;

use crate::types::{Session, User};

#[derive(Debug, Clone)]
pub struct IdentityStore {
    users_dir: PathBuf,
    sessions_dir: PathBuf,
}

impl IdentityStore {
    pub async fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let base = data_dir.as_ref();
        let users_dir = base.join("users");
        let sessions_dir = base.join("sessions");
        fs::create_dir_all(&users_dir).await?;
        fs::create_dir_all(&sessions_dir).await?;

        Ok(Self {
            users_dir,
            sessions_dir,
        })
    }

    pub async fn save_user(&self, user: &User) -> Result<()> {
        let data = serde_json::to_vec_pretty(user).map_err(|err| {
            StrongboxError::InternalError(format!("failed to serialize user {}: {err}", user.name))
        })?;
        fs::write(self.user_path(user.id), data).await?;
        Ok(())
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.read_all_json::<User>(&self.users_dir).await
    }

    pub async fn save_session(&self, session: &Session) -> Result<()> {
        let data = serde_json::to_vec_pretty(session).map_err(|err| {
            StrongboxError::InternalError(format!(
                "failed to serialize session {}: {err}",
                session.id
            ))
        })?;
        fs::write(self.session_path(session.id), data).await?;
        Ok(())
    }

    pub async fn delete_session(&self, id: Uuid) -> Result<()> {
        self.delete_if_exists(self.session_path(id)).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.read_all_json::<Session>(&self.sessions_dir).await
    }

    fn user_path(&self, id: Uuid) -> PathBuf {
        self.users_dir.join(format!("{id}.json"))
    }

    fn session_path(&self, id: Uuid) -> PathBuf {
        self.sessions_dir.join(format!("{id}.json"))
    }

    async fn delete_if_exists(&self, path: PathBuf) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn read_all_json<T: serde::de::DeserializeOwned>(&self, dir: &Path) -> Result<Vec<T>> {
        let mut values = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_json = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
            if !is_json {
                continue;
            }

            let bytes = fs::read(&path).await?;
            let value = serde_json::from_slice::<T>(&bytes).map_err(|err| {
                StrongboxError::InternalError(format!("failed to deserialize {:?}: {err}", path))
            })?;
            values.push(value);
        }
        Ok(values)
    }
}
