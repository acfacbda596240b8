//! Persistence collaborator: the key uniqueness ledger and registered players.
//!
//! Session keys never reach the ledger in clear: each token is sealed with
//! HMAC-SHA256 under the configured secret and compared in sealed form.
//! Origins are stored in clear.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use waypoint_core::identity::{KeyPair, generate_token};

use crate::config::StoreConfig;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug)]
pub enum StoreError {
    Unavailable(String),
    Corrupt(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(m) => write!(f, "store unavailable: {m}"),
            Self::Corrupt(m) => write!(f, "store corrupt: {m}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// A player as handed to the store for registration.
#[derive(Debug, Clone)]
pub struct PlayerRecord {
    pub origin: IpAddr,
    pub keys: KeyPair,
    pub name: String,
    pub x: f64,
    pub y: f64,
}

/// Narrow interface the core needs from persistent storage.
///
/// Implementations must be safe for concurrent use.
pub trait PlayerStore: Send + Sync {
    /// True if either half of `keys` was already issued.
    fn key_pair_in_use(&self, keys: &KeyPair) -> Result<bool, StoreError>;

    /// True if `keys` were registered to `origin`.
    fn player_exists(&self, origin: IpAddr, keys: &KeyPair) -> Result<bool, StoreError>;

    fn register_player(&self, record: &PlayerRecord) -> Result<(), StoreError>;

    fn update_position(&self, keys: &KeyPair, x: f64, y: f64) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn PlayerStore>;

/// Seals session tokens with a keyed digest.
#[derive(Clone)]
pub struct KeySealer {
    mac: HmacSha256,
}

impl KeySealer {
    pub fn new(secret: &[u8]) -> Result<Self, StoreError> {
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| StoreError::Unavailable(format!("invalid secret: {e}")))?;
        Ok(Self { mac })
    }

    pub fn seal(&self, token: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(token.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn seal_pair(&self, keys: &KeyPair) -> SealedKeys {
        SealedKeys {
            public: self.seal(&keys.public),
            private: self.seal(&keys.private),
        }
    }
}

struct SealedKeys {
    public: String,
    private: String,
}

/// One ledger row, as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LedgerRow {
    ip: String,
    private_key: String,
    public_key: String,
    name: String,
    x: f64,
    y: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Ledger {
    players: Vec<LedgerRow>,
}

impl Ledger {
    fn in_use(&self, sealed: &SealedKeys) -> bool {
        self.players
            .iter()
            .any(|row| row.private_key == sealed.private || row.public_key == sealed.public)
    }

    fn exists(&self, ip: &str, sealed: &SealedKeys) -> bool {
        self.players.iter().any(|row| {
            row.ip == ip && row.private_key == sealed.private && row.public_key == sealed.public
        })
    }

    fn insert(&mut self, record: &PlayerRecord, sealed: SealedKeys) {
        self.players.push(LedgerRow {
            ip: record.origin.to_string(),
            private_key: sealed.private,
            public_key: sealed.public,
            name: record.name.clone(),
            x: record.x,
            y: record.y,
        });
    }

    /// Returns false if no row carries the sealed public key.
    fn update_position(&mut self, sealed_public: &str, x: f64, y: f64) -> bool {
        let mut found = false;
        for row in self
            .players
            .iter_mut()
            .filter(|row| row.public_key == sealed_public)
        {
            row.x = x;
            row.y = y;
            found = true;
        }
        found
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("ledger lock poisoned".to_string())
}

/// In-process ledger. Contents are lost on restart.
pub struct MemoryStore {
    sealer: KeySealer,
    ledger: Mutex<Ledger>,
}

impl MemoryStore {
    pub fn new(secret: &[u8]) -> Result<Self, StoreError> {
        Ok(Self {
            sealer: KeySealer::new(secret)?,
            ledger: Mutex::new(Ledger::default()),
        })
    }

    pub fn len(&self) -> usize {
        self.ledger.lock().map(|l| l.players.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PlayerStore for MemoryStore {
    fn key_pair_in_use(&self, keys: &KeyPair) -> Result<bool, StoreError> {
        let sealed = self.sealer.seal_pair(keys);
        Ok(self.ledger.lock().map_err(poisoned)?.in_use(&sealed))
    }

    fn player_exists(&self, origin: IpAddr, keys: &KeyPair) -> Result<bool, StoreError> {
        let sealed = self.sealer.seal_pair(keys);
        Ok(self
            .ledger
            .lock()
            .map_err(poisoned)?
            .exists(&origin.to_string(), &sealed))
    }

    fn register_player(&self, record: &PlayerRecord) -> Result<(), StoreError> {
        let sealed = self.sealer.seal_pair(&record.keys);
        self.ledger.lock().map_err(poisoned)?.insert(record, sealed);
        Ok(())
    }

    fn update_position(&self, keys: &KeyPair, x: f64, y: f64) -> Result<(), StoreError> {
        let sealed = self.sealer.seal(&keys.public);
        self.ledger
            .lock()
            .map_err(poisoned)?
            .update_position(&sealed, x, y);
        Ok(())
    }
}

/// Ledger persisted as a JSON document. Every write rewrites the file
/// through a temporary sibling and a rename, so readers never see a torn
/// ledger.
pub struct FileStore {
    sealer: KeySealer,
    path: PathBuf,
    ledger: Mutex<Ledger>,
}

impl FileStore {
    /// Open the ledger at `path`, creating an empty one if it does not exist.
    pub fn open(path: impl Into<PathBuf>, secret: &[u8]) -> Result<Self, StoreError> {
        let path = path.into();
        let ledger = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Ledger::default(),
            Ok(content) => serde_json::from_str::<Ledger>(&content)
                .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ledger::default(),
            Err(e) => {
                return Err(StoreError::Unavailable(format!("{}: {e}", path.display())));
            },
        };
        tracing::info!(
            path = %path.display(),
            players = ledger.players.len(),
            "Opened player ledger"
        );
        Ok(Self {
            sealer: KeySealer::new(secret)?,
            path,
            ledger: Mutex::new(ledger),
        })
    }

    fn persist(&self, ledger: &Ledger) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(ledger)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .and_then(|()| std::fs::rename(&tmp, &self.path))
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", self.path.display())))
    }

    /// Apply `change` to a copy of the ledger and keep it only if it was
    /// written to disk.
    fn write_with(&self, change: impl FnOnce(&mut Ledger)) -> Result<(), StoreError> {
        let mut ledger = self.ledger.lock().map_err(poisoned)?;
        let mut next = ledger.clone();
        change(&mut next);
        self.persist(&next)?;
        *ledger = next;
        Ok(())
    }
}

impl PlayerStore for FileStore {
    fn key_pair_in_use(&self, keys: &KeyPair) -> Result<bool, StoreError> {
        let sealed = self.sealer.seal_pair(keys);
        Ok(self.ledger.lock().map_err(poisoned)?.in_use(&sealed))
    }

    fn player_exists(&self, origin: IpAddr, keys: &KeyPair) -> Result<bool, StoreError> {
        let sealed = self.sealer.seal_pair(keys);
        Ok(self
            .ledger
            .lock()
            .map_err(poisoned)?
            .exists(&origin.to_string(), &sealed))
    }

    fn register_player(&self, record: &PlayerRecord) -> Result<(), StoreError> {
        let sealed = self.sealer.seal_pair(&record.keys);
        self.write_with(|ledger| ledger.insert(record, sealed))
    }

    fn update_position(&self, keys: &KeyPair, x: f64, y: f64) -> Result<(), StoreError> {
        let sealed = self.sealer.seal(&keys.public);
        self.write_with(|ledger| {
            ledger.update_position(&sealed, x, y);
        })
    }
}

/// Build the store described by the config. Without a path the ledger lives
/// in memory; without a secret a random one is drawn for this process.
pub fn open_store(config: &StoreConfig) -> Result<SharedStore, StoreError> {
    let secret = match config.secret {
        Some(ref s) => s.clone(),
        None => {
            tracing::warn!("No store secret configured, using an ephemeral one");
            generate_token()
        },
    };
    match config.path {
        Some(ref path) => Ok(Arc::new(FileStore::open(path, secret.as_bytes())?)),
        None => Ok(Arc::new(MemoryStore::new(secret.as_bytes())?)),
    }
}
