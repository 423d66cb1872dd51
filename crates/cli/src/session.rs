//! Signed-in session persisted between CLI invocations.

use std::path::Path;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use shelf_db::auth::Session;
use uuid::Uuid;

pub const DEFAULT_PATH: &str = ".shelf-session.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    pub user_id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

impl From<Session> for StoredSession {
    fn from(session: Session) -> Self {
        Self {
            access_token: session.access_token,
            user_id: session.user.id,
            email: session.user.email,
        }
    }
}

impl StoredSession {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                anyhow!("not signed in; run `shelf login` first")
            }
            _ => anyhow!(e).context(format!("failed to read {}", path.display())),
        })?;
        serde_json::from_str(&raw)
            .with_context(|| format!("corrupt session file {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw).with_context(|| format!("failed to write {}", path.display()))
    }

    /// Removes the file; a missing file is not an error.
    pub fn clear(path: &Path) -> anyhow::Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow!(e).context(format!("failed to remove {}", path.display()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("shelf-{}-{}.json", name, Uuid::new_v4()))
    }

    #[test]
    fn save_then_load() {
        let path = temp_path("session");
        let session = StoredSession {
            access_token: "jwt".into(),
            user_id: Uuid::new_v4(),
            email: Some("reader@example.com".into()),
        };

        session.save(&path).unwrap();
        assert_eq!(StoredSession::load(&path).unwrap(), session);

        StoredSession::clear(&path).unwrap();
        StoredSession::clear(&path).unwrap();
    }

    #[test]
    fn missing_file_asks_for_login() {
        let err = StoredSession::load(&temp_path("missing")).unwrap_err();
        assert!(err.to_string().contains("shelf login"));
    }
}
