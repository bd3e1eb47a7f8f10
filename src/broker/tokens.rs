/// Per-account session token cache with write-through persistence
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;

/// Kite access tokens are valid until early next morning; stay a little under a day
pub const DEFAULT_TOKEN_TTL: Duration = Duration::minutes(23 * 60 + 50);

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expiry: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }
}

/// On-disk shape of one record; expiry kept as text so naive values can be repaired on read
#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    expiry: String,
}

/// Session store keyed by account name
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
    cache_file: PathBuf,
    /// Held across snapshot, write and rename so saves land on disk in order
    save_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(cache_file: impl Into<PathBuf>) -> Self {
        SessionStore {
            sessions: RwLock::new(HashMap::new()),
            cache_file: cache_file.into(),
            save_lock: Mutex::new(()),
        }
    }

    /// Create a store and load whatever is cached on disk
    pub fn open(cache_file: impl Into<PathBuf>) -> Self {
        let store = Self::new(cache_file);
        store.load();
        store
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    /// Load cached sessions. Missing or corrupt storage means "no sessions".
    pub fn load(&self) {
        let content = match std::fs::read_to_string(&self.cache_file) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No session cache at {}", self.cache_file.display());
                return;
            }
            Err(e) => {
                warn!("Error reading session cache {}: {}", self.cache_file.display(), e);
                return;
            }
        };

        let stored: HashMap<String, StoredSession> = match serde_json::from_str(&content) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Ignoring corrupt session cache {}: {}", self.cache_file.display(), e);
                return;
            }
        };

        let mut loaded = HashMap::new();
        for (account, session) in stored {
            match parse_expiry(&session.expiry) {
                Some(expiry) => {
                    loaded.insert(
                        account,
                        SessionRecord {
                            access_token: session.access_token,
                            refresh_token: session.refresh_token,
                            expiry,
                        },
                    );
                }
                None => warn!("Skipping cached session for {}: bad expiry {:?}", account, session.expiry),
            }
        }

        let mut names: Vec<&String> = loaded.keys().collect();
        names.sort();
        info!("Loaded cached sessions for: {}", names.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", "));

        *self.sessions.write() = loaded;
    }

    /// Persist all sessions to disk (write to a temp file, then rename)
    pub fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock();
        let stored: BTreeMap<String, StoredSession> = self
            .sessions
            .read()
            .iter()
            .map(|(name, record)| {
                (
                    name.clone(),
                    StoredSession {
                        access_token: record.access_token.clone(),
                        refresh_token: record.refresh_token.clone(),
                        expiry: record.expiry.to_rfc3339(),
                    },
                )
            })
            .collect();

        let json = serde_json::to_string_pretty(&stored)?;
        if let Some(dir) = self.cache_file.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let tmp = self
            .cache_file
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        if let Err(e) = std::fs::write(&tmp, json).and_then(|_| std::fs::rename(&tmp, &self.cache_file)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!("Saved session cache for {} accounts", stored.len());
        Ok(())
    }

    pub fn is_valid(&self, account: &str) -> bool {
        self.is_valid_at(account, Utc::now())
    }

    pub fn is_valid_at(&self, account: &str, now: DateTime<Utc>) -> bool {
        self.sessions
            .read()
            .get(account)
            .map(|s| !s.is_expired_at(now))
            .unwrap_or(false)
    }

    pub fn get_token(&self, account: &str) -> Option<String> {
        self.sessions.read().get(account).map(|s| s.access_token.clone())
    }

    pub fn get_refresh_token(&self, account: &str) -> Option<String> {
        self.sessions.read().get(account).and_then(|s| s.refresh_token.clone())
    }

    pub fn get(&self, account: &str) -> Option<SessionRecord> {
        self.sessions.read().get(account).cloned()
    }

    /// Store a fresh token with `expiry = now + ttl` and persist immediately
    pub fn set_token(
        &self,
        account: &str,
        access_token: &str,
        refresh_token: Option<String>,
        ttl: Duration,
    ) -> Result<()> {
        self.set_record(
            account,
            SessionRecord {
                access_token: access_token.to_string(),
                refresh_token,
                expiry: Utc::now() + ttl,
            },
        )
    }

    /// Overwrite the whole record for an account and persist immediately
    pub fn set_record(&self, account: &str, record: SessionRecord) -> Result<()> {
        self.sessions.write().insert(account.to_string(), record);
        self.save()
    }

    pub fn remove(&self, account: &str) -> Result<()> {
        let removed = self.sessions.write().remove(account).is_some();
        if removed {
            self.save()?;
        }
        Ok(())
    }

    /// Validity for every requested account; unknown accounts are reported invalid
    pub fn get_validity<S: AsRef<str>>(&self, accounts: &[S]) -> BTreeMap<String, bool> {
        let now = Utc::now();
        accounts
            .iter()
            .map(|a| (a.as_ref().to_string(), self.is_valid_at(a.as_ref(), now)))
            .collect()
    }

    pub fn all_valid<S: AsRef<str>>(&self, accounts: &[S]) -> bool {
        let now = Utc::now();
        accounts.iter().all(|a| self.is_valid_at(a.as_ref(), now))
    }
}

/// RFC 3339 first; naive ISO timestamps are assumed to be UTC
fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> SessionStore {
        SessionStore::new(dir.path().join(".session_cache.json"))
    }

    #[test]
    fn test_get_token_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.get_token("Acc1"), None);
        assert!(!store.is_valid("Acc1"));
    }

    #[test]
    fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .set_token("Acc1", "token-abc", Some("refresh-1".into()), DEFAULT_TOKEN_TTL)
            .unwrap();

        let reloaded = SessionStore::open(dir.path().join(".session_cache.json"));
        assert_eq!(reloaded.get_token("Acc1").as_deref(), Some("token-abc"));
        assert_eq!(reloaded.get_refresh_token("Acc1").as_deref(), Some("refresh-1"));
        assert!(reloaded.is_valid("Acc1"));
        assert_eq!(reloaded.get("Acc1").unwrap().expiry, store.get("Acc1").unwrap().expiry);
    }

    #[test]
    fn test_concurrent_writes_all_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(store_in(&dir));

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    for round in 0..200 {
                        let token = format!("t{}-{}", i, round);
                        store
                            .set_token(&format!("Acc{}", i), &token, None, DEFAULT_TOKEN_TTL)
                            .unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let reloaded = SessionStore::open(dir.path().join(".session_cache.json"));
        for i in 0..4 {
            let expected = format!("t{}-199", i);
            assert_eq!(reloaded.get_token(&format!("Acc{}", i)), Some(expected));
        }
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_token_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .set_record(
                "Acc1",
                SessionRecord {
                    access_token: "old".into(),
                    refresh_token: None,
                    expiry: Utc::now() - Duration::minutes(1),
                },
            )
            .unwrap();

        assert_eq!(store.get_token("Acc1").as_deref(), Some("old"));
        assert!(!store.is_valid("Acc1"));
    }

    #[test]
    fn test_expiry_boundary_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let expiry = Utc::now() + Duration::hours(1);
        store
            .set_record(
                "Acc1",
                SessionRecord {
                    access_token: "t".into(),
                    refresh_token: None,
                    expiry,
                },
            )
            .unwrap();
        assert!(store.is_valid_at("Acc1", expiry - Duration::seconds(1)));
        assert!(!store.is_valid_at("Acc1", expiry));
    }

    #[test]
    fn test_get_validity_includes_every_requested_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.set_token("Acc1", "t1", None, DEFAULT_TOKEN_TTL).unwrap();

        let validity = store.get_validity(&["Acc1", "Acc2", "Acc3"]);
        assert_eq!(validity.len(), 3);
        assert_eq!(validity["Acc1"], true);
        assert_eq!(validity["Acc2"], false);
        assert_eq!(validity["Acc3"], false);

        let empty: [&str; 0] = [];
        assert!(store.get_validity(&empty).is_empty());
    }

    #[test]
    fn test_corrupted_cache_file_means_no_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".session_cache.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = SessionStore::open(&path);
        assert!(!store.is_valid("Acc1"));
        assert_eq!(store.get_token("Acc1"), None);
    }

    #[test]
    fn test_naive_expiry_is_read_as_utc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".session_cache.json");
        std::fs::write(
            &path,
            r#"{
                "Acc1": {"access_token": "t1", "expiry": "2999-01-01T10:00:00"},
                "Acc2": {"access_token": "t2", "expiry": "garbage"}
            }"#,
        )
        .unwrap();

        let store = SessionStore::open(&path);
        let record = store.get("Acc1").unwrap();
        assert_eq!(record.expiry.to_rfc3339(), "2999-01-01T10:00:00+00:00");
        assert!(store.is_valid("Acc1"));
        assert!(store.get("Acc2").is_none());
    }

    #[test]
    fn test_set_token_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.set_token("Acc1", "first", Some("r".into()), DEFAULT_TOKEN_TTL).unwrap();
        store.set_token("Acc1", "second", None, DEFAULT_TOKEN_TTL).unwrap();
        assert_eq!(store.get_token("Acc1").as_deref(), Some("second"));
        assert_eq!(store.get_refresh_token("Acc1"), None);
    }

    #[test]
    fn test_remove_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.set_token("Acc1", "t", None, DEFAULT_TOKEN_TTL).unwrap();
        store.remove("Acc1").unwrap();

        let reloaded = SessionStore::open(dir.path().join(".session_cache.json"));
        assert_eq!(reloaded.get_token("Acc1"), None);
    }
}
