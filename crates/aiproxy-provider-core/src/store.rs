use std::path::{Path, PathBuf};

use crate::credential::CredentialRecord;
use crate::errors::{ProviderError, ProviderResult};
use crate::provider::ProviderType;

/// Persists one provider's credential file under the user's home directory.
/// Directory mode 0700, file mode 0600, write-then-rename.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn for_provider(provider: ProviderType) -> ProviderResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| ProviderError::InvalidConfig("home directory not found".to_string()))?;
        let path = match provider {
            ProviderType::Qwen => home.join(".qwen").join("oauth_creds.json"),
            ProviderType::GeminiCli => home.join(".gemini").join("oauth_creds.json"),
            ProviderType::Antigravity => home.join(".antigravity").join("oauth_creds.json"),
            ProviderType::Iflow => home.join(".iflow").join("oauth_creds.json"),
            ProviderType::Kiro => home
                .join(".aws")
                .join("sso")
                .join("cache")
                .join("kiro-auth-token.json"),
        };
        Ok(Self { path })
    }

    pub fn at_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn load(&self) -> ProviderResult<Option<CredentialRecord>> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(ProviderError::Other(format!(
                    "read {}: {err}",
                    self.path.display()
                )));
            }
        };
        let record = serde_json::from_slice(&raw).map_err(|err| {
            ProviderError::MalformedResponse(format!("parse {}: {err}", self.path.display()))
        })?;
        Ok(Some(record))
    }

    pub fn save(&self, record: &CredentialRecord) -> ProviderResult<()> {
        let dir = self.path.parent().ok_or_else(|| {
            ProviderError::InvalidConfig(format!("no parent dir for {}", self.path.display()))
        })?;
        std::fs::create_dir_all(dir)
            .map_err(|err| ProviderError::Other(format!("mkdir {}: {err}", dir.display())))?;
        set_mode(dir, 0o700);

        let body = serde_json::to_vec_pretty(record)
            .map_err(|err| ProviderError::Other(err.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &body)
            .map_err(|err| ProviderError::Other(format!("write {}: {err}", tmp.display())))?;
        set_mode(&tmp, 0o600);
        std::fs::rename(&tmp, &self.path)
            .map_err(|err| ProviderError::Other(format!("rename {}: {err}", self.path.display())))?;
        Ok(())
    }

    pub fn clear(&self) -> ProviderResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ProviderError::Other(format!(
                "remove {}: {err}",
                self.path.display()
            ))),
        }
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode));
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> CredentialStore {
        let dir = std::env::temp_dir().join(format!("aiproxy-store-{name}-{}", std::process::id()));
        CredentialStore::at_path(dir.join("oauth_creds.json"))
    }

    #[test]
    fn save_load_clear_round_trip() {
        let store = temp_store("roundtrip");
        let record = CredentialRecord {
            access_token: "tok".to_string(),
            refresh_token: Some("ref".to_string()),
            expires_at_ms: Some(1_893_456_000_000),
            ..Default::default()
        };
        store.save(&record).expect("save");
        let loaded = store.load().expect("load").expect("record exists");
        assert_eq!(loaded, record);
        store.clear().expect("clear");
        assert!(store.load().expect("load").is_none());
        let _ = std::fs::remove_dir_all(store.path().parent().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn file_and_directory_modes_are_restricted() {
        use std::os::unix::fs::PermissionsExt;
        let store = temp_store("modes");
        store
            .save(&CredentialRecord {
                access_token: "tok".to_string(),
                ..Default::default()
            })
            .expect("save");
        let file_mode = std::fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
        let dir_mode = std::fs::metadata(store.path().parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(file_mode, 0o600);
        assert_eq!(dir_mode, 0o700);
        let _ = std::fs::remove_dir_all(store.path().parent().unwrap());
    }
}
