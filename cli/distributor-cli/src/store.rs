//! Persistence for distribution documents.
//!
//! Stores allocate ids, refuse to publish the same id twice, and apply
//! redemptions as an atomic read-modify-write so concurrent events for one
//! account serialize.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::codec;
use crate::common::{write_file_atomic, Address};
use crate::document::{self, DistributionDocument, DistributionId, Metadata};
use crate::error::{DistributorError, Result};
use crate::leaf::Claim;
use crate::reconcile::{self, RedemptionEvent, RedemptionOutcome};

/// Mutation applied to a stored document under the store's lock.
pub type Update<'a> = &'a mut dyn FnMut(&mut DistributionDocument) -> Result<RedemptionOutcome>;

pub trait DistributionStore: Send + Sync {
    /// Reserves the next unused id. Ids are never handed out twice.
    fn next_id(&self) -> Result<DistributionId>;

    /// Stores a freshly published document.
    ///
    /// # Errors
    /// [`DistributorError::AlreadyPublished`] if the id is taken.
    fn insert(&self, document: &DistributionDocument) -> Result<()>;

    fn get(&self, id: DistributionId) -> Result<DistributionDocument>;

    fn list_ids(&self) -> Result<Vec<DistributionId>>;

    /// Runs `update` against document `id` atomically and persists the result.
    fn modify(&self, id: DistributionId, update: Update<'_>) -> Result<RedemptionOutcome>;

    fn record_redemption(
        &self,
        id: DistributionId,
        account: &Address,
        redeemed_at: DateTime<Utc>,
    ) -> Result<RedemptionOutcome> {
        self.modify(id, &mut |document: &mut DistributionDocument| {
            reconcile::apply_redemption(document, account, redeemed_at)
        })
    }

    fn record_event(&self, event: &RedemptionEvent) -> Result<RedemptionOutcome> {
        self.modify(event.distribution_id, &mut |document: &mut DistributionDocument| {
            reconcile::apply_event(document, event)
        })
    }
}

/// Allocates an id, publishes `claims` under it, and stores the result.
pub fn publish_new(
    store: &dyn DistributionStore,
    claims: Vec<Claim>,
    metadata: Metadata,
    created_at: DateTime<Utc>,
) -> Result<DistributionDocument> {
    let id = store.next_id()?;
    let document = document::publish(id, claims, metadata, created_at)?;
    store.insert(&document)?;
    Ok(document)
}

/// Retries an idempotent store operation while it fails retryably.
///
/// Only use this for operations that are safe to repeat, such as recording a
/// redemption. Publication is not.
pub fn with_retries<T>(attempts: u32, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(err) if err.is_retryable() && attempt < attempts => {
                warn!(attempt, error = %err, "retrying store operation");
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// In-process store. Each document has its own lock, so redemptions against
/// different distributions proceed in parallel.
#[derive(Default)]
pub struct MemoryStore {
    last_id: AtomicU64,
    documents: RwLock<BTreeMap<DistributionId, Arc<Mutex<DistributionDocument>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: DistributionId) -> Result<Arc<Mutex<DistributionDocument>>> {
        self.documents
            .read()
            .get(&id)
            .cloned()
            .ok_or(DistributorError::NotFound(id))
    }
}

impl DistributionStore for MemoryStore {
    fn next_id(&self) -> Result<DistributionId> {
        Ok(self.last_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn insert(&self, document: &DistributionDocument) -> Result<()> {
        let mut documents = self.documents.write();
        if documents.contains_key(&document.id()) {
            return Err(DistributorError::AlreadyPublished(document.id()));
        }
        self.last_id.fetch_max(document.id(), Ordering::SeqCst);
        documents.insert(document.id(), Arc::new(Mutex::new(document.clone())));
        Ok(())
    }

    fn get(&self, id: DistributionId) -> Result<DistributionDocument> {
        Ok(self.entry(id)?.lock().clone())
    }

    fn list_ids(&self) -> Result<Vec<DistributionId>> {
        Ok(self.documents.read().keys().copied().collect())
    }

    fn modify(&self, id: DistributionId, update: Update<'_>) -> Result<RedemptionOutcome> {
        let entry = self.entry(id)?;
        let mut document = entry.lock();
        update(&mut *document)
    }
}

/// One pretty-printed JSON file per distribution under a directory.
///
/// Writes go through [`write_file_atomic`] and are serialized by a store-wide
/// lock. Only one process should open a directory at a time.
pub struct FileStore {
    dir: PathBuf,
    last_id: Mutex<DistributionId>,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let last_id = scan_ids(&dir)?.into_iter().max().unwrap_or(0);
        info!(dir = %dir.display(), last_id, "opened distribution store");
        Ok(Self {
            dir,
            last_id: Mutex::new(last_id),
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: DistributionId) -> PathBuf {
        self.dir.join(file_name(id))
    }

    fn read(&self, id: DistributionId) -> Result<DistributionDocument> {
        let path = self.path_for(id);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(DistributorError::NotFound(id))
            }
            Err(err) => return Err(err.into()),
        };
        let document = codec::from_json(&text)?;
        if document.id() != id {
            return Err(DistributorError::corrupt(format!(
                "{} holds distribution {}",
                path.display(),
                document.id()
            )));
        }
        Ok(document)
    }

    fn write(&self, document: &DistributionDocument) -> Result<()> {
        let json = codec::to_json(document)?;
        write_file_atomic(&self.path_for(document.id()), &json)
    }
}

impl DistributionStore for FileStore {
    fn next_id(&self) -> Result<DistributionId> {
        let mut last_id = self.last_id.lock();
        *last_id += 1;
        Ok(*last_id)
    }

    fn insert(&self, document: &DistributionDocument) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.path_for(document.id()).exists() {
            return Err(DistributorError::AlreadyPublished(document.id()));
        }
        self.write(document)?;
        let mut last_id = self.last_id.lock();
        *last_id = (*last_id).max(document.id());
        debug!(distribution_id = document.id(), "stored distribution");
        Ok(())
    }

    fn get(&self, id: DistributionId) -> Result<DistributionDocument> {
        self.read(id)
    }

    fn list_ids(&self) -> Result<Vec<DistributionId>> {
        let mut ids = scan_ids(&self.dir)?;
        ids.sort_unstable();
        Ok(ids)
    }

    fn modify(&self, id: DistributionId, update: Update<'_>) -> Result<RedemptionOutcome> {
        let _guard = self.write_lock.lock();
        let mut document = self.read(id)?;
        let outcome = update(&mut document)?;
        if outcome == RedemptionOutcome::Applied {
            self.write(&document)?;
        }
        Ok(outcome)
    }
}

fn file_name(id: DistributionId) -> String {
    format!("distribution-{id:08}.json")
}

fn scan_ids(dir: &Path) -> Result<Vec<DistributionId>> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name();
        let id = name
            .to_str()
            .and_then(|n| n.strip_prefix("distribution-"))
            .and_then(|n| n.strip_suffix(".json"))
            .and_then(|n| n.parse().ok());
        if let Some(id) = id {
            ids.push(id);
        }
    }
    Ok(ids)
}
