//! RocksDB-backed implementation of the store contract.
//!
//! All tables live in one column family; logical separation comes from the
//! one-byte table tags. A transaction is a write buffer overlaid on the
//! database: reads inside the transaction observe buffered writes first, and
//! commit flushes the whole buffer as a single atomic `WriteBatch`. The
//! resume cursor therefore either carries a fully applied event or none of
//! it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::{Bound, Range};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use itertools::{EitherOrBoth, Itertools};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, ReadOptions, WriteBatch,
};
use tracing::{debug, info, warn};

use crate::script::ScriptType;
use crate::store::encdec::{Decode, Encode};
use crate::store::table::{Table, TableIterator};
use crate::store::tables::{
    ResumePointKV, SchemaVersionKV, ScriptIndexKey, ScriptIndexKV, SpentByHeightKV, SpentKey,
    TxByIdKV, TxHeightKey, TxIdByHashKV, TxIdByHeightKV, TxRow, TxSequenceKV, UtxoKey, UtxoKV,
    UtxoRow,
};
use crate::store::{
    Balance, BlockHeight, OutPoint, ResumePoint, Store, StoreError, StoreTx, Utxo, UtxoRecord,
};

static CF_NAME: &str = "utxo_index";

/// Current schema version, persisted on first open.
const SCHEMA_VERSION: u32 = 1;

/// Ordered migrations applied inside one transaction when an older database
/// is opened. Each entry upgrades to its version.
const MIGRATIONS: &[(u32, fn(&mut WriteTask<'_>) -> Result<(), StoreError>)] = &[];

// bounded retry for transient engine conflicts, mirroring the single-writer
// busy/locked discipline of the SQL engines this contract also targets
const TX_RETRY_LIMIT: u32 = 120;
const TX_RETRY_PAUSE: Duration = Duration::from_millis(250);

#[derive(Clone)]
pub struct RocksStore {
    db: Arc<DB>,
    read_only: bool,
}

impl RocksStore {
    /// Opens (or creates) the database. Read-only handles open a secondary
    /// instance which can catch up with the primary on demand; writer
    /// handles apply pending schema migrations before returning.
    pub fn open(path: PathBuf, read_only: bool) -> Result<Self, StoreError> {
        info!("opening db at '{}'...", path.display());

        let mut db_opts = Options::default();
        db_opts.create_missing_column_families(true);
        db_opts.create_if_missing(true);

        let cfs = vec![ColumnFamilyDescriptor::new(CF_NAME, Options::default())];

        let db = if read_only {
            let mut secondary_path = path.clone();
            secondary_path.push("secondary");
            DB::open_cf_descriptors_as_secondary(&db_opts, path, secondary_path, cfs)?
        } else {
            DB::open_cf_descriptors(&db_opts, path, cfs)?
        };

        let store = Self {
            db: Arc::new(db),
            read_only,
        };

        if !read_only {
            store.apply_migrations()?;
        }

        Ok(store)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Makes a read-only secondary instance catch up with the primary's
    /// latest committed state.
    pub fn try_refresh(&self) -> Result<(), StoreError> {
        if self.read_only {
            self.db.try_catch_up_with_primary()?;
        }

        Ok(())
    }

    fn cf(&self) -> &ColumnFamily {
        self.db.cf_handle(CF_NAME).expect("cf missing")
    }

    /// Checks the persisted schema version and applies any pending
    /// migrations, all inside one transaction.
    fn apply_migrations(&self) -> Result<(), StoreError> {
        let mut task = WriteTask::new(&self.db, self.cf());
        Self::migrate_task(&mut task)?;
        task.commit()
    }

    fn migrate_task(task: &mut WriteTask) -> Result<(), StoreError> {
        let stored = task.get::<SchemaVersionKV>(&())?;

        let mut version = match stored {
            Some(version) => version,
            None => {
                // first-time init: stamp the current version
                task.set::<SchemaVersionKV>((), SCHEMA_VERSION);
                info!("initialised schema at version {SCHEMA_VERSION}");
                return Ok(());
            }
        };

        let initial = version;
        for (target, migrate) in MIGRATIONS {
            if version < *target {
                migrate(task)?;
                version = *target;
            }
        }

        if version != initial {
            task.set::<SchemaVersionKV>((), version);
            info!("migrated schema from version {initial} to {version}");
        }

        Ok(())
    }

    fn read_get<T: Table>(
        &self,
        snapshot: &rocksdb::Snapshot,
        key: &T::Key,
    ) -> Result<Option<T::Value>, StoreError> {
        snapshot
            .get_cf(self.cf(), T::encode_key(key))?
            .map(|bytes| T::Value::decode_all(&bytes).map_err(Into::into))
            .transpose()
    }

    fn read_iter<'a, T: Table>(
        &'a self,
        snapshot: &'a rocksdb::Snapshot<'a>,
        range: Range<Vec<u8>>,
    ) -> TableIterator<'a, T> {
        let mut read_opts = ReadOptions::default();
        set_range(&mut read_opts, &range);

        TableIterator::new(snapshot.iterator_cf_opt(self.cf(), read_opts, IteratorMode::Start))
    }

    /// Walks the script index for `(kind, script)` and materialises each hit,
    /// handing rows to `visit` along with the height of the producing
    /// transaction.
    fn for_each_indexed_row(
        &self,
        snapshot: &rocksdb::Snapshot,
        kind: ScriptType,
        script: &[u8],
        visit: &mut dyn FnMut(&UtxoKey, &UtxoRow, &TxRow),
    ) -> Result<(), StoreError> {
        let range = ScriptIndexKV::encode_prefix_range(&(kind, script.to_vec()));

        for entry in self.read_iter::<ScriptIndexKV>(snapshot, range) {
            let (index_key, ()) = entry?;

            let utxo_key = UtxoKey {
                tx_id: index_key.tx_id,
                vout: index_key.vout,
            };

            let Some(row) = self.read_get::<UtxoKV>(snapshot, &utxo_key)? else {
                warn!("script index entry without utxo row: {utxo_key:?}");
                continue;
            };
            let Some(tx_row) = self.read_get::<TxByIdKV>(snapshot, &index_key.tx_id)? else {
                warn!("utxo row without tx row: {utxo_key:?}");
                continue;
            };

            visit(&utxo_key, &row, &tx_row);
        }

        Ok(())
    }
}

impl Store for RocksStore {
    fn get_resume_point(&self) -> Result<Option<ResumePoint>, StoreError> {
        let snapshot = self.db.snapshot();
        self.read_get::<ResumePointKV>(&snapshot, &())
    }

    fn get_current_height(&self) -> Result<BlockHeight, StoreError> {
        Ok(self.get_resume_point()?.map(|p| p.height).unwrap_or(0))
    }

    fn find_utxos(&self, kind: ScriptType, script: &[u8]) -> Result<Vec<UtxoRecord>, StoreError> {
        let snapshot = self.db.snapshot();
        let mut records = Vec::new();

        self.for_each_indexed_row(&snapshot, kind, script, &mut |key, row, tx_row| {
            if row.spent_height.is_none() {
                records.push(UtxoRecord {
                    tx_hash: tx_row.hash,
                    vout: key.vout,
                    value: row.value,
                    kind: row.kind,
                    script: row.script.clone(),
                    height: tx_row.height,
                });
            }
        })?;

        Ok(records)
    }

    fn get_balance(
        &self,
        kind: ScriptType,
        script: &[u8],
        confirmations: u64,
    ) -> Result<Balance, StoreError> {
        let snapshot = self.db.snapshot();

        let head = self
            .read_get::<ResumePointKV>(&snapshot, &())?
            .map(|p| p.height)
            .unwrap_or(0);
        let threshold = head.saturating_sub(confirmations);

        let mut balance = Balance::default();

        self.for_each_indexed_row(&snapshot, kind, script, &mut |_, row, tx_row| {
            match row.spent_height {
                None => {
                    if tx_row.height < threshold {
                        balance.available += row.value;
                    } else {
                        balance.incoming += row.value;
                    }
                }
                Some(spent_height) => {
                    if spent_height >= threshold {
                        balance.outgoing += row.value;
                    }
                }
            }
        })?;

        Ok(balance)
    }

    fn transact(
        &self,
        work: &mut dyn FnMut(&mut dyn StoreTx) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::Other("store handle is read-only".into()));
        }

        let mut attempts = TX_RETRY_LIMIT;

        loop {
            let mut task = WriteTask::new(&self.db, self.cf());

            let result = match work(&mut task) {
                Ok(()) => task.commit(),
                Err(err) => Err(err),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(err) if err.is_conflict() && attempts > 1 => {
                    attempts -= 1;
                    debug!("transaction conflict, retrying: {err}");
                    std::thread::sleep(TX_RETRY_PAUSE);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

enum Action {
    Set(Vec<u8>),
    Delete,
}

/// One in-flight transaction: buffered writes keyed by raw key, applied to
/// the database as a single atomic batch on commit. Reads and scans observe
/// the buffer first so a transaction sees its own effects.
pub struct WriteTask<'a> {
    db: &'a DB,
    cf: &'a ColumnFamily,
    buffer: BTreeMap<Vec<u8>, Action>,
}

impl<'a> WriteTask<'a> {
    fn new(db: &'a DB, cf: &'a ColumnFamily) -> Self {
        Self {
            db,
            cf,
            buffer: BTreeMap::new(),
        }
    }

    pub fn get<T: Table>(&self, key: &T::Key) -> Result<Option<T::Value>, StoreError> {
        let encoded = T::encode_key(key);

        if let Some(action) = self.buffer.get(&encoded) {
            return match action {
                Action::Set(value) => Ok(Some(T::Value::decode_all(value)?)),
                Action::Delete => Ok(None),
            };
        }

        self.db
            .get_cf(self.cf, &encoded)?
            .map(|bytes| T::Value::decode_all(&bytes).map_err(Into::into))
            .transpose()
    }

    pub fn set<T: Table>(&mut self, key: T::Key, value: T::Value) {
        self.buffer
            .insert(T::encode_key(&key), Action::Set(value.encode()));
    }

    pub fn delete<T: Table>(&mut self, key: &T::Key) {
        self.buffer.insert(T::encode_key(key), Action::Delete);
    }

    /// Collects all live entries of a table within `range`, merging buffered
    /// writes over the persisted state.
    pub fn scan<T: Table>(
        &self,
        range: Range<Vec<u8>>,
    ) -> Result<Vec<(T::Key, T::Value)>, StoreError> {
        let mut read_opts = ReadOptions::default();
        set_range(&mut read_opts, &range);

        let mut persisted = Vec::new();
        for item in self
            .db
            .iterator_cf_opt(self.cf, read_opts, IteratorMode::Start)
        {
            let (key, value) = item?;
            persisted.push((key.to_vec(), value.to_vec()));
        }

        let upper: Bound<Vec<u8>> = if range.end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(range.end.clone())
        };
        let buffered = self
            .buffer
            .range((Bound::Included(range.start.clone()), upper));

        let mut out = Vec::new();

        for entry in persisted
            .iter()
            .merge_join_by(buffered, |(pk, _), (bk, _)| pk.cmp(bk))
        {
            let (raw_key, raw_value): (&[u8], &[u8]) = match entry {
                EitherOrBoth::Left((key, value)) => (key, value),
                EitherOrBoth::Right((key, action)) | EitherOrBoth::Both(_, (key, action)) => {
                    match action {
                        Action::Set(value) => (key, value),
                        Action::Delete => continue,
                    }
                }
            };

            out.push((
                T::Key::decode_all(&raw_key[T::PREFIX_LEN..])?,
                T::Value::decode_all(raw_value)?,
            ));
        }

        Ok(out)
    }

    fn commit(self) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();

        for (key, action) in self.buffer {
            match action {
                Action::Set(value) => batch.put_cf(self.cf, key, value),
                Action::Delete => batch.delete_cf(self.cf, key),
            }
        }

        self.db.write(batch)?;

        Ok(())
    }

    /// Resolves the surrogate id for `hash`, allocating a fresh one (and the
    /// tx rows) when the hash is new. `cache` spans the current batch so each
    /// hash is resolved once.
    fn tx_id_for_hash(
        &mut self,
        cache: &mut HashMap<[u8; 32], u64>,
        hash: [u8; 32],
        height: BlockHeight,
    ) -> Result<u64, StoreError> {
        if let Some(id) = cache.get(&hash) {
            return Ok(*id);
        }

        let tx_id = match self.get::<TxIdByHashKV>(&hash)? {
            Some(existing) => existing,
            None => {
                let tx_id = self.get::<TxSequenceKV>(&())?.unwrap_or(0);
                self.set::<TxSequenceKV>((), tx_id + 1);

                self.set::<TxByIdKV>(tx_id, TxRow { height, hash });
                self.set::<TxIdByHashKV>(hash, tx_id);
                self.set::<TxIdByHeightKV>(TxHeightKey { height, tx_id }, ());

                tx_id
            }
        };

        cache.insert(hash, tx_id);
        Ok(tx_id)
    }

    /// Deletes a UTXO row together with its secondary index entries.
    fn purge_utxo_row(&mut self, key: &UtxoKey, row: &UtxoRow) {
        self.delete::<UtxoKV>(key);

        if row.kind.address_indexed() {
            self.delete::<ScriptIndexKV>(&ScriptIndexKey {
                kind: row.kind,
                script: row.script.clone(),
                tx_id: key.tx_id,
                vout: key.vout,
            });
        }

        if let Some(spent_height) = row.spent_height {
            self.delete::<SpentByHeightKV>(&SpentKey {
                height: spent_height,
                tx_id: key.tx_id,
                vout: key.vout,
            });
        }
    }

    /// Drops the tx row and its indices once no UTXO rows reference it.
    fn drop_tx_if_orphaned(&mut self, tx_id: u64) -> Result<(), StoreError> {
        let children = self.scan::<UtxoKV>(UtxoKV::encode_prefix_range(&tx_id))?;
        if !children.is_empty() {
            return Ok(());
        }

        if let Some(tx_row) = self.get::<TxByIdKV>(&tx_id)? {
            self.delete::<TxByIdKV>(&tx_id);
            self.delete::<TxIdByHashKV>(&tx_row.hash);
            self.delete::<TxIdByHeightKV>(&TxHeightKey {
                height: tx_row.height,
                tx_id,
            });
        }

        Ok(())
    }
}

impl StoreTx for WriteTask<'_> {
    fn set_resume_point(&mut self, point: &ResumePoint) -> Result<(), StoreError> {
        self.set::<ResumePointKV>((), *point);
        Ok(())
    }

    fn create_utxos(&mut self, utxos: &[Utxo], height: BlockHeight) -> Result<(), StoreError> {
        // one tx row per unique hash in the batch
        let mut ids = HashMap::new();

        for utxo in utxos {
            let tx_id = self.tx_id_for_hash(&mut ids, utxo.tx_hash, height)?;

            let key = UtxoKey {
                tx_id,
                vout: utxo.vout,
            };

            self.set::<UtxoKV>(
                key,
                UtxoRow {
                    value: utxo.value,
                    kind: utxo.kind,
                    script: utxo.script.clone(),
                    spent_height: None,
                },
            );

            if utxo.kind.address_indexed() {
                self.set::<ScriptIndexKV>(
                    ScriptIndexKey {
                        kind: utxo.kind,
                        script: utxo.script.clone(),
                        tx_id,
                        vout: utxo.vout,
                    },
                    (),
                );
            }
        }

        Ok(())
    }

    fn remove_utxos(
        &mut self,
        outpoints: &[OutPoint],
        height: BlockHeight,
    ) -> Result<(), StoreError> {
        for outpoint in outpoints {
            // inputs may reference outputs we never indexed; that is not an
            // error for the transaction, just nothing to mark
            let Some(tx_id) = self.get::<TxIdByHashKV>(&outpoint.tx_hash)? else {
                debug!(
                    "spend of unindexed output {}",
                    hex::encode(outpoint.to_key())
                );
                continue;
            };

            let key = UtxoKey {
                tx_id,
                vout: outpoint.vout,
            };

            let Some(mut row) = self.get::<UtxoKV>(&key)? else {
                debug!(
                    "spend of unindexed output {}",
                    hex::encode(outpoint.to_key())
                );
                continue;
            };

            if let Some(already) = row.spent_height {
                warn!(
                    "output {} already spent at {already}, re-marking at {height}",
                    hex::encode(outpoint.to_key())
                );
                self.delete::<SpentByHeightKV>(&SpentKey {
                    height: already,
                    tx_id,
                    vout: outpoint.vout,
                });
            }

            row.spent_height = Some(height);
            self.set::<UtxoKV>(key, row);
            self.set::<SpentByHeightKV>(
                SpentKey {
                    height,
                    tx_id,
                    vout: outpoint.vout,
                },
                (),
            );
        }

        Ok(())
    }

    fn undo_above(&mut self, height: BlockHeight) -> Result<(), StoreError> {
        // (a) + (b): drop all UTXOs produced above the target height, then
        // their tx rows
        let produced = self.scan::<TxIdByHeightKV>(TxIdByHeightKV::encode_range(
            Some(&(height + 1)),
            None::<&()>,
        ))?;

        for (entry, ()) in produced {
            let rows = self.scan::<UtxoKV>(UtxoKV::encode_prefix_range(&entry.tx_id))?;
            for (key, row) in rows {
                self.purge_utxo_row(&key, &row);
            }

            if let Some(tx_row) = self.get::<TxByIdKV>(&entry.tx_id)? {
                self.delete::<TxIdByHashKV>(&tx_row.hash);
            }
            self.delete::<TxByIdKV>(&entry.tx_id);
            self.delete::<TxIdByHeightKV>(&entry);
        }

        // (c): re-activate anything spent above the target height
        let respent = self.scan::<SpentByHeightKV>(SpentByHeightKV::encode_range(
            Some(&(height + 1)),
            None::<&()>,
        ))?;

        for (spent, ()) in respent {
            let key = UtxoKey {
                tx_id: spent.tx_id,
                vout: spent.vout,
            };

            // rows produced above the height were purged in the first pass
            if let Some(mut row) = self.get::<UtxoKV>(&key)? {
                row.spent_height = None;
                self.set::<UtxoKV>(key, row);
            }

            self.delete::<SpentByHeightKV>(&spent);
        }

        Ok(())
    }

    fn trim_spent_utxos(&mut self, cutoff: BlockHeight) -> Result<(), StoreError> {
        let spent =
            self.scan::<SpentByHeightKV>(SpentByHeightKV::encode_range(None::<&()>, Some(&cutoff)))?;

        let mut touched = BTreeSet::new();

        for (entry, ()) in spent {
            let key = UtxoKey {
                tx_id: entry.tx_id,
                vout: entry.vout,
            };

            if let Some(row) = self.get::<UtxoKV>(&key)? {
                self.purge_utxo_row(&key, &row);
            } else {
                self.delete::<SpentByHeightKV>(&entry);
            }

            touched.insert(entry.tx_id);
        }

        // garbage-collect tx rows with no remaining outputs
        for tx_id in touched {
            self.drop_tx_if_orphaned(tx_id)?;
        }

        Ok(())
    }
}

fn set_range(read_opts: &mut ReadOptions, range: &Range<Vec<u8>>) {
    if range.end.is_empty() {
        read_opts.set_iterate_lower_bound(range.start.clone());
    } else {
        read_opts.set_iterate_range(range.clone());
    }
}
