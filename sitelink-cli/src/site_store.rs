//! Local persistence for the joining site.
//!
//! [`DirStore`] keeps one JSON file per received object:
//!
//! ```text
//! <root>/site.toml            this site's identity
//! <root>/links/<name>.json    received links
//! <root>/secrets/<name>.json  received TLS credentials
//! <root>/claims/<name>.json   claims and their redemption status
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sitelink_core::{ClaimDescriptor, LinkDescriptor, TlsCredential};

/// Name and uid of the local site. Received objects are owned by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteIdentity {
    pub name: String,
    pub uid: String,
}

impl SiteIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SiteStoreError {
    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: &'static str, name: String },
    #[error("{path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error("{path}: {reason}")]
    Identity { path: String, reason: String },
    #[error("invalid object name {0:?}")]
    InvalidName(String),
}

/// Where redeemed objects go.
pub trait SiteStore: Send + Sync {
    /// Create a link. Fails if one with the same name exists.
    fn create_link(&self, link: &LinkDescriptor) -> Result<(), SiteStoreError>;

    /// Create a TLS credential. Fails if one with the same name exists.
    fn create_credential(&self, credential: &TlsCredential) -> Result<(), SiteStoreError>;

    /// Record a claim's current status.
    fn update_claim(&self, claim: &ClaimDescriptor) -> Result<(), SiteStoreError>;

    /// Remove a TLS credential. Removing a missing one is not an error.
    fn remove_credential(&self, name: &str) -> Result<(), SiteStoreError>;
}

/// Directory-backed [`SiteStore`].
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open the store, creating its directories.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SiteStoreError> {
        let root = root.into();
        for sub in ["links", "secrets", "claims"] {
            let dir = root.join(sub);
            std::fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the site identity, creating one named `default_name` if absent.
    pub fn load_or_create_identity(&self, default_name: &str) -> Result<SiteIdentity, SiteStoreError> {
        let path = self.root.join("site.toml");

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
            return toml::from_str(&content).map_err(|e| SiteStoreError::Identity {
                path: path.display().to_string(),
                reason: e.to_string(),
            });
        }

        let identity = SiteIdentity::new(default_name);
        let content = toml::to_string_pretty(&identity).map_err(|e| SiteStoreError::Identity {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        std::fs::write(&path, content).map_err(|e| io_error(&path, e))?;
        Ok(identity)
    }

    pub fn links(&self) -> Result<Vec<LinkDescriptor>, SiteStoreError> {
        self.read_all("links")
    }

    pub fn link(&self, name: &str) -> Result<Option<LinkDescriptor>, SiteStoreError> {
        self.read_one("links", name)
    }

    pub fn credential(&self, name: &str) -> Result<Option<TlsCredential>, SiteStoreError> {
        self.read_one("secrets", name)
    }

    pub fn claim(&self, name: &str) -> Result<Option<ClaimDescriptor>, SiteStoreError> {
        self.read_one("claims", name)
    }

    /// File holding `name` under `dir`. Names must stay inside `dir`.
    fn path(&self, dir: &str, name: &str) -> Result<PathBuf, SiteStoreError> {
        let valid = !name.is_empty()
            && name != "."
            && !name.contains("..")
            && !name.contains(['/', '\\', '\0']);
        if !valid {
            return Err(SiteStoreError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(dir).join(format!("{}.json", name)))
    }

    /// Write `value` to a new file. Private files are only readable by
    /// the owner from the moment they exist.
    fn create<T: Serialize>(
        &self,
        dir: &str,
        kind: &'static str,
        name: &str,
        value: &T,
        private: bool,
    ) -> Result<(), SiteStoreError> {
        let path = self.path(dir, name)?;
        let content = serde_json::to_vec_pretty(value).map_err(|e| json_error(&path, e))?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            if private {
                options.mode(0o600);
            }
        }
        #[cfg(not(unix))]
        let _ = private;

        let mut file = match options.open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(SiteStoreError::AlreadyExists {
                    kind,
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(io_error(&path, e)),
        };
        std::io::Write::write_all(&mut file, &content).map_err(|e| io_error(&path, e))
    }

    fn read_one<T: serde::de::DeserializeOwned>(
        &self,
        dir: &str,
        name: &str,
    ) -> Result<Option<T>, SiteStoreError> {
        let path = self.path(dir, name)?;
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| json_error(&path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    fn read_all<T: serde::de::DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>, SiteStoreError> {
        let dir_path = self.root.join(dir);
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&dir_path).map_err(|e| io_error(&dir_path, e))? {
            let path = entry.map_err(|e| io_error(&dir_path, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        paths
            .into_iter()
            .map(|path| {
                let bytes = std::fs::read(&path).map_err(|e| io_error(&path, e))?;
                serde_json::from_slice(&bytes).map_err(|e| json_error(&path, e))
            })
            .collect()
    }
}

impl SiteStore for DirStore {
    fn create_link(&self, link: &LinkDescriptor) -> Result<(), SiteStoreError> {
        self.create("links", "link", &link.meta.name, link, false)
    }

    fn create_credential(&self, credential: &TlsCredential) -> Result<(), SiteStoreError> {
        self.create("secrets", "secret", &credential.meta.name, credential, true)
    }

    fn update_claim(&self, claim: &ClaimDescriptor) -> Result<(), SiteStoreError> {
        let path = self.path("claims", &claim.name)?;
        let content = serde_json::to_vec_pretty(claim).map_err(|e| json_error(&path, e))?;
        std::fs::write(&path, content).map_err(|e| io_error(&path, e))
    }

    fn remove_credential(&self, name: &str) -> Result<(), SiteStoreError> {
        let path = self.path("secrets", name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> SiteStoreError {
    SiteStoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn json_error(path: &Path, source: serde_json::Error) -> SiteStoreError {
    SiteStoreError::Json {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitelink_core::{Endpoint, ObjectMeta};

    fn link(name: &str) -> LinkDescriptor {
        LinkDescriptor {
            meta: ObjectMeta::new("east", name),
            endpoints: vec![Endpoint {
                name: "inter-router".to_string(),
                host: "west.example.com".to_string(),
                port: 55671,
            }],
            cost: 1,
            tls_credentials: name.to_string(),
        }
    }

    #[test]
    fn second_link_with_same_name_collides() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::open(dir.path()).unwrap();

        store.create_link(&link("to-west")).unwrap();
        let err = store.create_link(&link("to-west")).unwrap_err();
        assert_eq!(err.to_string(), r#"link "to-west" already exists"#);
        assert_eq!(store.links().unwrap().len(), 1);
        assert_eq!(store.link("to-west").unwrap(), Some(link("to-west")));
    }

    #[test]
    fn identity_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::open(dir.path()).unwrap();

        let first = store.load_or_create_identity("east").unwrap();
        let second = store.load_or_create_identity("ignored").unwrap();
        assert_eq!(first, second);
        assert_eq!(second.name, "east");
    }

    #[test]
    fn names_cannot_leave_their_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("site");
        let store = DirStore::open(&root).unwrap();

        for name in ["../../escaped", "a/b", "..", ".", ""] {
            let err = store.create_link(&link(name)).unwrap_err();
            assert!(matches!(err, SiteStoreError::InvalidName(_)), "{name:?}");
        }
        assert!(!dir.path().join("escaped.json").exists());
        assert!(store.links().unwrap().is_empty());
        assert!(matches!(
            store.credential("../site.toml"),
            Err(SiteStoreError::InvalidName(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn credentials_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::open(dir.path()).unwrap();
        let credential = TlsCredential {
            meta: ObjectMeta::new("east", "to-west"),
            ca_crt: "CA".to_string(),
            tls_crt: "CERT".to_string(),
            tls_key: "KEY".to_string(),
        };
        store.create_credential(&credential).unwrap();

        let mode = std::fs::metadata(dir.path().join("secrets").join("to-west.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn removed_credential_can_be_created_again() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::open(dir.path()).unwrap();
        let credential = TlsCredential {
            meta: ObjectMeta::new("east", "to-west"),
            ca_crt: "CA".to_string(),
            tls_crt: "CERT".to_string(),
            tls_key: "KEY".to_string(),
        };

        store.create_credential(&credential).unwrap();
        store.remove_credential("to-west").unwrap();
        store.remove_credential("to-west").unwrap();
        assert!(store.credential("to-west").unwrap().is_none());
        store.create_credential(&credential).unwrap();
    }

    #[test]
    fn missing_objects_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::open(dir.path()).unwrap();

        assert!(store.credential("nope").unwrap().is_none());
        assert!(store.claim("nope").unwrap().is_none());
        assert!(store.links().unwrap().is_empty());
    }
}
