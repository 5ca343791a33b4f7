//! # VaultDB: Persistent Ledger Storage
//!
//! The durable side of the vault ledger, on sled's embedded key-value store.
//!
//! ## Tree Layout
//!
//! | Tree       | Key                     | Value                       |
//! |------------|-------------------------|-----------------------------|
//! | `vaults`   | `vault_id` (8B BE)      | `bincode(Vault)`            |
//! | `consumed` | proof digest (32B)      | consumed-at, expires-at ms, epoch (3 × 8B BE) |
//! | `metadata` | key (UTF-8)             | value (bytes)               |
//!
//! Vault ids are big-endian so iteration order is numeric order.
//!
//! ## Atomicity
//!
//! A committed transition writes the new vault record, the digest of the
//! proof that authorised it and, for a new vault, the next free vault id in
//! one sled transaction across `vaults`, `consumed` and `metadata`. After a
//! crash either all of it is on disk or none is, so a proof can't be burned
//! without its effect, nor replayed after it.

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Batch, Db, Transactional, Tree};

use crate::crypto::hash::Digest;
use crate::proof::registry::ConsumedEntry;
use crate::ledger::vault::Vault;
use crate::types::VaultId;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("transaction aborted: {0}")]
    Transaction(String),
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// Metadata Keys
// ---------------------------------------------------------------------------

const META_NEXT_VAULT_ID: &[u8] = b"next_vault_id";
const META_EPOCH: &[u8] = b"binding_epoch";

// ---------------------------------------------------------------------------
// VaultDB
// ---------------------------------------------------------------------------

/// Handle to the on-disk ledger. Cheap to clone; sled trees are shared.
#[derive(Debug, Clone)]
pub struct VaultDB {
    db: Db,
    vaults: Tree,
    consumed: Tree,
    metadata: Tree,
}

impl VaultDB {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// An in-memory database removed on drop. For tests.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let vaults = db.open_tree("vaults")?;
        let consumed = db.open_tree("consumed")?;
        let metadata = db.open_tree("metadata")?;
        Ok(Self { db, vaults, consumed, metadata })
    }

    // -- Vaults -------------------------------------------------------------

    pub fn put_vault(&self, vault: &Vault) -> DbResult<()> {
        self.vaults.insert(vault.id.to_key(), encode(vault)?)?;
        Ok(())
    }

    pub fn get_vault(&self, id: VaultId) -> DbResult<Option<Vault>> {
        match self.vaults.get(id.to_key())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every stored vault, in id order.
    pub fn load_vaults(&self) -> DbResult<Vec<Vault>> {
        self.vaults
            .iter()
            .values()
            .map(|value| decode(&value?))
            .collect()
    }

    pub fn vault_count(&self) -> usize {
        self.vaults.len()
    }

    /// Atomically persist `vault` together with the digest of the proof
    /// that authorised the change and, when a vault was created, the next
    /// vault id.
    pub fn commit_transition(
        &self,
        vault: &Vault,
        consumed: Option<(&Digest, &ConsumedEntry)>,
        next_vault_id: Option<u64>,
    ) -> DbResult<()> {
        let key = vault.id.to_key();
        let value = encode(vault)?;
        let consumed = consumed.map(|(digest, entry)| (*digest.as_bytes(), encode_consumed(entry)));
        let next_vault_id = next_vault_id.map(u64::to_be_bytes);

        (&self.vaults, &self.consumed, &self.metadata)
            .transaction(|(vaults, consumed_tree, metadata)| {
                vaults.insert(&key[..], value.as_slice())?;
                if let Some((digest, entry)) = &consumed {
                    consumed_tree.insert(&digest[..], &entry[..])?;
                }
                if let Some(next) = &next_vault_id {
                    metadata.insert(META_NEXT_VAULT_ID, &next[..])?;
                }
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e: TransactionError<()>| DbError::Transaction(format!("{e:?}")))
    }

    // -- Consumed proofs ----------------------------------------------------

    pub fn record_consumed(&self, digest: &Digest, entry: &ConsumedEntry) -> DbResult<()> {
        self.consumed
            .insert(digest.as_bytes(), &encode_consumed(entry)[..])?;
        Ok(())
    }

    /// Delete `digests` from the consumed tree in one batch.
    pub fn remove_consumed(&self, digests: &[Digest]) -> DbResult<()> {
        let mut batch = Batch::default();
        for digest in digests {
            batch.remove(&digest.as_bytes()[..]);
        }
        self.consumed.apply_batch(batch)?;
        Ok(())
    }

    pub fn is_consumed(&self, digest: &Digest) -> DbResult<bool> {
        Ok(self.consumed.contains_key(digest.as_bytes())?)
    }

    pub fn consumed_proofs(&self) -> DbResult<Vec<(Digest, ConsumedEntry)>> {
        self.consumed
            .iter()
            .map(|entry| {
                let (key, value) = entry?;
                let digest: [u8; 32] = key
                    .as_ref()
                    .try_into()
                    .map_err(|_| DbError::Serialization("invalid digest key".into()))?;
                Ok((Digest::from_bytes(digest), decode_consumed(&value)?))
            })
            .collect()
    }

    // -- Metadata -----------------------------------------------------------

    /// The next id to hand out, if one was ever recorded.
    pub fn next_vault_id(&self) -> DbResult<Option<u64>> {
        self.get_u64(META_NEXT_VAULT_ID)
    }

    pub fn set_next_vault_id(&self, next: u64) -> DbResult<()> {
        self.set_u64(META_NEXT_VAULT_ID, next)
    }

    pub fn epoch(&self) -> DbResult<u64> {
        Ok(self.get_u64(META_EPOCH)?.unwrap_or(0))
    }

    pub fn set_epoch(&self, epoch: u64) -> DbResult<()> {
        self.set_u64(META_EPOCH, epoch)
    }

    /// Block until every pending write is durable.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn get_u64(&self, key: &[u8]) -> DbResult<Option<u64>> {
        match self.metadata.get(key)? {
            Some(bytes) => {
                let value = u64::from_be_bytes(
                    bytes
                        .as_ref()
                        .try_into()
                        .map_err(|_| DbError::Serialization("invalid u64 bytes".into()))?,
                );
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn set_u64(&self, key: &[u8], value: u64) -> DbResult<()> {
        self.metadata.insert(key, &value.to_be_bytes()[..])?;
        Ok(())
    }
}

fn encode(vault: &Vault) -> DbResult<Vec<u8>> {
    bincode::serialize(vault).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> DbResult<Vault> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

fn encode_consumed(entry: &ConsumedEntry) -> [u8; 24] {
    let mut out = [0u8; 24];
    out[..8].copy_from_slice(&entry.consumed_at.timestamp_millis().to_be_bytes());
    out[8..16].copy_from_slice(&entry.expires_at.timestamp_millis().to_be_bytes());
    out[16..].copy_from_slice(&entry.epoch.to_be_bytes());
    out
}

fn decode_consumed(bytes: &[u8]) -> DbResult<ConsumedEntry> {
    let bytes: &[u8; 24] = bytes
        .try_into()
        .map_err(|_| DbError::Serialization("invalid consumed-proof record".into()))?;
    let millis = |range: std::ops::Range<usize>| -> DbResult<DateTime<Utc>> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[range]);
        Utc.timestamp_millis_opt(i64::from_be_bytes(raw))
            .single()
            .ok_or_else(|| DbError::Serialization("timestamp out of range".into()))
    };
    let mut epoch = [0u8; 8];
    epoch.copy_from_slice(&bytes[16..]);
    Ok(ConsumedEntry {
        consumed_at: millis(0..8)?,
        expires_at: millis(8..16)?,
        epoch: u64::from_be_bytes(epoch),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{EncryptedValue, SchemeTag};
    use crate::crypto::hash::domain_digest;
    use crate::ledger::state::VaultState;
    use crate::types::{AssetId, OwnerId};

    fn vault(id: u64) -> Vault {
        let now = Utc::now();
        let ct = |b: u8| EncryptedValue::new(SchemeTag::new("test"), 1, 10, vec![b; 28]);
        Vault {
            id: VaultId(id),
            owner: OwnerId::new("alice"),
            asset: AssetId::default(),
            collateral: ct(1),
            debt: ct(2),
            state: VaultState::Active,
            created_at: now,
            last_updated_at: now,
        }
    }

    #[test]
    fn open_temporary_database() {
        let db = VaultDB::open_temporary().expect("should create temp db");
        assert_eq!(db.vault_count(), 0);
        assert_eq!(db.epoch().unwrap(), 0);
        assert_eq!(db.next_vault_id().unwrap(), None);
    }

    #[test]
    fn vaults_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let db = VaultDB::open(dir.path()).unwrap();
            db.put_vault(&vault(2)).unwrap();
            db.put_vault(&vault(10)).unwrap();
            db.set_next_vault_id(11).unwrap();
            db.flush().unwrap();
        }
        let db = VaultDB::open(dir.path()).unwrap();
        let ids: Vec<_> = db.load_vaults().unwrap().into_iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![VaultId(2), VaultId(10)]);
        assert_eq!(db.next_vault_id().unwrap(), Some(11));
    }

    fn entry() -> ConsumedEntry {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).single().unwrap();
        ConsumedEntry {
            consumed_at: now,
            expires_at: now + chrono::Duration::minutes(10),
            epoch: 3,
        }
    }

    #[test]
    fn commit_writes_vault_and_digest_together() {
        let db = VaultDB::open_temporary().unwrap();
        let digest = domain_digest("db test", &[b"proof"]);
        let mut v = vault(1);
        v.state = VaultState::Liquidating { since: Utc::now() };
        db.commit_transition(&v, Some((&digest, &entry())), None).unwrap();

        assert_eq!(db.get_vault(VaultId(1)).unwrap(), Some(v));
        assert!(db.is_consumed(&digest).unwrap());
        let consumed = db.consumed_proofs().unwrap();
        assert_eq!(consumed, vec![(digest, entry())]);
        assert_eq!(db.next_vault_id().unwrap(), None);
    }

    #[test]
    fn creation_commit_records_next_vault_id() {
        let db = VaultDB::open_temporary().unwrap();
        let digest = domain_digest("db test", &[b"create"]);
        db.commit_transition(&vault(7), Some((&digest, &entry())), Some(8)).unwrap();
        assert!(db.get_vault(VaultId(7)).unwrap().is_some());
        assert_eq!(db.next_vault_id().unwrap(), Some(8));
    }

    #[test]
    fn removed_digests_leave_the_rest() {
        let db = VaultDB::open_temporary().unwrap();
        let keep = domain_digest("db test", &[b"keep"]);
        let gone = domain_digest("db test", &[b"gone"]);
        db.record_consumed(&keep, &entry()).unwrap();
        db.record_consumed(&gone, &entry()).unwrap();
        db.remove_consumed(&[gone]).unwrap();
        assert!(db.is_consumed(&keep).unwrap());
        assert!(!db.is_consumed(&gone).unwrap());
    }

    #[test]
    fn commit_without_proof() {
        let db = VaultDB::open_temporary().unwrap();
        db.commit_transition(&vault(4), None, None).unwrap();
        assert!(db.consumed_proofs().unwrap().is_empty());
        assert!(db.get_vault(VaultId(4)).unwrap().is_some());
    }

    #[test]
    fn missing_vault_is_none() {
        let db = VaultDB::open_temporary().unwrap();
        assert_eq!(db.get_vault(VaultId(99)).unwrap(), None);
    }
}
