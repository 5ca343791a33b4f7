//! # Consumed-Proof Registry
//!
//! Every proof authorises at most one committed transition. The registry is
//! the set of proof digests that already have, plus the current binding
//! epoch.
//!
//! Claiming is an atomic insert into a `DashMap` entry: of two concurrent
//! redemptions of the same proof exactly one sees a vacant entry. A claim is
//! held by a [`Redemption`] guard; if the transition fails after claiming
//! (say the write to disk fails) dropping the guard releases the digest so
//! the caller can retry with the same proof. Only [`Redemption::commit`]
//! makes the claim permanent.
//!
//! Durability comes from the ledger writing the digest in the same sled
//! transaction as the vault record. On open the registry is rebuilt from
//! that tree, so a replay after restart is still refused.
//!
//! ## Pruning
//!
//! Each entry remembers the expiry and epoch of the binding it consumed.
//! Once the binding has expired or its epoch is behind the current one, the
//! proof can no longer pass verification or redemption, so
//! [`ConsumedProofs::prune`] drops the entry from memory and disk. A claim
//! is only ever granted for a live binding, and expiry and epoch only move
//! forward, so a pruned digest can never be claimed again.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::crypto::hash::Digest;
use crate::error::ProofError;
use crate::storage::{DbResult, VaultDB};

/// What the registry keeps per consumed proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumedEntry {
    pub consumed_at: DateTime<Utc>,
    /// Expiry of the consumed binding.
    pub expires_at: DateTime<Utc>,
    /// Epoch the consumed binding was issued in.
    pub epoch: u64,
}

impl ConsumedEntry {
    /// Whether the binding this entry guards is dead at `now` / `epoch`.
    pub fn is_prunable(&self, now: DateTime<Utc>, epoch: u64) -> bool {
        self.expires_at <= now || self.epoch < epoch
    }
}

#[derive(Debug, Default)]
pub struct ConsumedProofs {
    consumed: DashMap<Digest, ConsumedEntry>,
    epoch: AtomicU64,
    db: Option<VaultDB>,
}

impl ConsumedProofs {
    /// Registry with no persistence. Tests and ephemeral devnets.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Registry backed by `db`, preloaded with every digest and the epoch
    /// it has recorded.
    pub fn restore(db: VaultDB) -> DbResult<Self> {
        let consumed = DashMap::new();
        for (digest, entry) in db.consumed_proofs()? {
            consumed.insert(digest, entry);
        }
        let epoch = db.epoch()?;
        info!(consumed = consumed.len(), epoch, "restored consumed-proof registry");
        Ok(Self {
            consumed,
            epoch: AtomicU64::new(epoch),
            db: Some(db),
        })
    }

    pub fn is_consumed(&self, digest: &Digest) -> bool {
        self.consumed.contains_key(digest)
    }

    pub fn len(&self) -> usize {
        self.consumed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumed.is_empty()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Move to the next binding epoch. Every outstanding proof bound to an
    /// older epoch stops verifying, and every entry from an older epoch is
    /// pruned.
    pub fn advance_epoch(&self, now: DateTime<Utc>) -> DbResult<u64> {
        let next = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(db) = &self.db {
            if let Err(e) = db.set_epoch(next) {
                self.epoch.fetch_sub(1, Ordering::SeqCst);
                return Err(e);
            }
        }
        warn!(epoch = next, "binding epoch advanced; outstanding proofs invalidated");
        self.prune(now)?;
        Ok(next)
    }

    /// Drop every entry whose binding is expired at `now` or from an older
    /// epoch. Returns how many were dropped.
    pub fn prune(&self, now: DateTime<Utc>) -> DbResult<usize> {
        let epoch = self.epoch();
        let dead: Vec<Digest> = self
            .consumed
            .iter()
            .filter(|entry| entry.value().is_prunable(now, epoch))
            .map(|entry| *entry.key())
            .collect();
        if dead.is_empty() {
            return Ok(0);
        }
        if let Some(db) = &self.db {
            db.remove_consumed(&dead)?;
        }
        for digest in &dead {
            self.consumed.remove_if(digest, |_, entry| entry.is_prunable(now, epoch));
        }
        debug!(pruned = dead.len(), remaining = self.consumed.len(), "pruned consumed proofs");
        Ok(dead.len())
    }

    /// Atomically claim `digest`. Fails if anyone (including a concurrent
    /// caller) already has.
    pub(crate) fn claim(&self, digest: Digest, entry: ConsumedEntry) -> Result<Redemption<'_>, ProofError> {
        match self.consumed.entry(digest) {
            Entry::Occupied(_) => Err(ProofError::AlreadyConsumed { digest: digest.to_hex() }),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(Redemption {
                    registry: self,
                    digest,
                    entry,
                    committed: false,
                })
            }
        }
    }

    fn release(&self, digest: &Digest) {
        self.consumed.remove(digest);
    }
}

/// A claimed, not yet committed, proof digest.
#[must_use = "an uncommitted redemption is released when dropped"]
#[derive(Debug)]
pub struct Redemption<'a> {
    registry: &'a ConsumedProofs,
    digest: Digest,
    entry: ConsumedEntry,
    committed: bool,
}

impl Redemption<'_> {
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn entry(&self) -> &ConsumedEntry {
        &self.entry
    }

    pub fn consumed_at(&self) -> DateTime<Utc> {
        self.entry.consumed_at
    }

    /// Make the claim permanent.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Redemption<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.release(&self.digest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::crypto::hash::domain_digest;

    fn digest(tag: &[u8]) -> Digest {
        domain_digest("registry test", &[tag])
    }

    fn live(epoch: u64) -> ConsumedEntry {
        let now = Utc::now();
        ConsumedEntry {
            consumed_at: now,
            expires_at: now + Duration::minutes(5),
            epoch,
        }
    }

    #[test]
    fn second_claim_fails() {
        let registry = ConsumedProofs::in_memory();
        registry.claim(digest(b"a"), live(0)).unwrap().commit();
        assert!(matches!(
            registry.claim(digest(b"a"), live(0)),
            Err(ProofError::AlreadyConsumed { .. })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dropped_claim_is_released() {
        let registry = ConsumedProofs::in_memory();
        {
            let _claim = registry.claim(digest(b"a"), live(0)).unwrap();
            assert!(registry.is_consumed(&digest(b"a")));
        }
        assert!(!registry.is_consumed(&digest(b"a")));
        registry.claim(digest(b"a"), live(0)).unwrap().commit();
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        let registry = std::sync::Arc::new(ConsumedProofs::in_memory());
        let d = digest(b"race");
        let winners: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let registry = registry.clone();
                    s.spawn(move || match registry.claim(d, live(0)) {
                        Ok(r) => {
                            r.commit();
                            1
                        }
                        Err(_) => 0,
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(winners, 1);
    }

    #[test]
    fn epoch_advances() {
        let registry = ConsumedProofs::in_memory();
        assert_eq!(registry.epoch(), 0);
        assert_eq!(registry.advance_epoch(Utc::now()).unwrap(), 1);
        assert_eq!(registry.epoch(), 1);
    }

    #[test]
    fn restore_reads_persisted_state() {
        let db = VaultDB::open_temporary().unwrap();
        db.record_consumed(&digest(b"old"), &live(4)).unwrap();
        db.set_epoch(4).unwrap();
        let registry = ConsumedProofs::restore(db).unwrap();
        assert!(registry.is_consumed(&digest(b"old")));
        assert_eq!(registry.epoch(), 4);
    }

    #[test]
    fn prune_drops_expired_entries_from_memory_and_disk() {
        let db = VaultDB::open_temporary().unwrap();
        let registry = ConsumedProofs::restore(db.clone()).unwrap();
        let now = Utc::now();
        let short = ConsumedEntry {
            consumed_at: now,
            expires_at: now + Duration::seconds(30),
            epoch: 0,
        };
        for (tag, entry) in [(&b"short"[..], short), (&b"long"[..], live(0))] {
            let claim = registry.claim(digest(tag), entry).unwrap();
            db.record_consumed(claim.digest(), claim.entry()).unwrap();
            claim.commit();
        }

        assert_eq!(registry.prune(now).unwrap(), 0);
        assert_eq!(registry.prune(now + Duration::minutes(1)).unwrap(), 1);
        assert!(!registry.is_consumed(&digest(b"short")));
        assert!(registry.is_consumed(&digest(b"long")));

        let on_disk: Vec<Digest> = db.consumed_proofs().unwrap().into_iter().map(|(d, _)| d).collect();
        assert_eq!(on_disk, vec![digest(b"long")]);
    }

    #[test]
    fn advancing_the_epoch_prunes_older_entries() {
        let registry = ConsumedProofs::in_memory();
        registry.claim(digest(b"e0"), live(0)).unwrap().commit();
        registry.advance_epoch(Utc::now()).unwrap();
        registry.claim(digest(b"e1"), live(1)).unwrap().commit();
        assert!(!registry.is_consumed(&digest(b"e0")));
        assert!(registry.is_consumed(&digest(b"e1")));
        assert_eq!(registry.len(), 1);
    }
}
