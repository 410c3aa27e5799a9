//! Persisted station credentials.
//!
//! The settings store is an INI file owned by the provisioning flow. This
//! crate only reads it: the `wifi` section holds the network identifier
//! (`ssid`) and the secret (`pass`).

use anyhow::{Context, Result};
use ini::Ini;
use log::{debug, info};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::{io::ErrorKind, path::Path};

pub const WIFI_SCOPE: &str = "wifi";
pub const SSID_KEY: &str = "ssid";
pub const PASSPHRASE_KEY: &str = "pass";

#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait CredentialStore {
    /// Value stored under `key`, or `default` when absent.
    fn get(&self, key: &str, default: &str) -> String;
}

/// Network identifier and secret used for station mode.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredCredentials {
    pub ssid: String,
    pub passphrase: String,
}

impl StoredCredentials {
    /// Read the credentials, returning `None` when no network was ever
    /// configured (empty identifier).
    pub fn load<S: CredentialStore>(store: &S) -> Option<Self> {
        let ssid = store.get(SSID_KEY, "");
        if ssid.is_empty() {
            return None;
        }

        Some(Self {
            ssid,
            passphrase: store.get(PASSPHRASE_KEY, ""),
        })
    }
}

impl std::fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCredentials")
            .field("ssid", &self.ssid)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// INI-file backed credential store, read once when opened.
pub struct IniCredentialStore {
    ini: Ini,
    scope: String,
}

impl IniCredentialStore {
    /// Open the store at `path`, scoped to the given INI section.
    ///
    /// A missing file is not an error: it is the "never configured" state.
    pub fn open(path: &Path, scope: &str) -> Result<Self> {
        let ini = match Ini::load_from_file(path) {
            Ok(ini) => {
                info!("loaded credential store {path:?}");
                ini
            }
            Err(ini::Error::Io(e)) if e.kind() == ErrorKind::NotFound => {
                debug!("credential store {path:?} not found, treating as empty");
                Ini::new()
            }
            Err(e) => {
                return Err(e).context(format!("failed to load credential store: {path:?}"));
            }
        };

        Ok(Self {
            ini,
            scope: scope.to_string(),
        })
    }

    /// An empty store, used when the file cannot be read.
    pub fn empty(scope: &str) -> Self {
        Self {
            ini: Ini::new(),
            scope: scope.to_string(),
        }
    }
}

impl CredentialStore for IniCredentialStore {
    fn get(&self, key: &str, default: &str) -> String {
        self.ini
            .get_from(Some(self.scope.as_str()), key)
            .unwrap_or(default)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_store(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("should create temp file");
        file.write_all(content.as_bytes())
            .expect("should write temp file");
        file
    }

    mod ini_store {
        use super::*;

        #[test]
        fn reads_keys_from_scope() {
            let file = write_store("[wifi]\nssid=home\npass=secret123\n");
            let store = IniCredentialStore::open(file.path(), WIFI_SCOPE).unwrap();

            assert_eq!(store.get(SSID_KEY, ""), "home");
            assert_eq!(store.get(PASSPHRASE_KEY, ""), "secret123");
        }

        #[test]
        fn ignores_keys_outside_scope() {
            let file = write_store("[other]\nssid=elsewhere\n");
            let store = IniCredentialStore::open(file.path(), WIFI_SCOPE).unwrap();

            assert_eq!(store.get(SSID_KEY, "fallback"), "fallback");
        }

        #[test]
        fn missing_file_is_empty_store() {
            let dir = tempfile::tempdir().unwrap();
            let store =
                IniCredentialStore::open(&dir.path().join("absent.ini"), WIFI_SCOPE).unwrap();

            assert_eq!(store.get(SSID_KEY, ""), "");
        }

        #[test]
        fn malformed_file_is_error() {
            let file = write_store("[wifi\nssid=broken\n");
            assert!(IniCredentialStore::open(file.path(), WIFI_SCOPE).is_err());
        }
    }

    mod stored_credentials {
        use super::*;

        #[test]
        fn empty_identifier_means_never_configured() {
            let mut store = MockCredentialStore::new();
            store
                .expect_get()
                .with(eq(SSID_KEY), eq(""))
                .return_const(String::new());

            assert!(StoredCredentials::load(&store).is_none());
        }

        #[test]
        fn loads_identifier_and_secret() {
            let mut store = MockCredentialStore::new();
            store
                .expect_get()
                .with(eq(SSID_KEY), eq(""))
                .return_const("office".to_string());
            store
                .expect_get()
                .with(eq(PASSPHRASE_KEY), eq(""))
                .return_const("hunter22".to_string());

            let credentials = StoredCredentials::load(&store).unwrap();
            assert_eq!(credentials.ssid, "office");
            assert_eq!(credentials.passphrase, "hunter22");
        }

        #[test]
        fn open_network_has_empty_secret() {
            let file = write_store("[wifi]\nssid=cafe\n");
            let store = IniCredentialStore::open(file.path(), WIFI_SCOPE).unwrap();

            let credentials = StoredCredentials::load(&store).unwrap();
            assert_eq!(credentials.passphrase, "");
        }

        #[test]
        fn debug_output_redacts_secret() {
            let credentials = StoredCredentials {
                ssid: "office".to_string(),
                passphrase: "hunter22".to_string(),
            };
            let output = format!("{credentials:?}");
            assert!(output.contains("office"));
            assert!(!output.contains("hunter22"));
        }
    }
}
