//! Persistent store using RocksDB.
//!
//! Records are JSON values under prefixed keys. Numeric key parts are
//! zero-padded so prefix scans come back in id order. RocksDB has no unique
//! constraints, so slot claims and commission batches run under a write
//! mutex and commit as a single `WriteBatch`.

use super::{CommissionStore, InsertOutcome, ParticipantDirectory, PositionStore, PostingOutcome, RecordOutcome};
use crate::error::{Error, Result};
use crate::model::{
    CommissionKey, CommissionRecord, Investment, MatrixPosition, NewPosition, Participant,
    ReferrerBalance,
};
use rocksdb::{Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use trellis_matrix::{InvestmentId, PositionId, UserId};

const NEXT_POSITION_ID: &[u8] = b"meta:next_position_id";

fn position_key(id: PositionId) -> String {
    format!("pos:{:020}", id.value())
}

fn active_key(user: UserId) -> String {
    format!("user_active:{}", user.value())
}

fn latest_key(user: UserId) -> String {
    format!("user_latest:{}", user.value())
}

fn slot_key(sponsor: UserId, level: u32, position: u8) -> String {
    format!("slot:{}:{}:{}", sponsor.value(), level, position)
}

fn child_prefix(sponsor: UserId) -> String {
    format!("child:{:020}:", sponsor.value())
}

fn child_key(position: &MatrixPosition) -> String {
    format!(
        "{}{:03}:{:020}",
        child_prefix(position.sponsor_id),
        position.position,
        position.id.value()
    )
}

fn commission_prefix(investment: InvestmentId) -> String {
    format!("comm:{:020}:", investment.value())
}

fn commission_key(key: &CommissionKey) -> String {
    format!(
        "{}{:03}:{:020}",
        commission_prefix(key.investment_id),
        key.level,
        key.referrer_id.value()
    )
}

fn posted_key(investment: InvestmentId) -> String {
    format!("posted:{:020}", investment.value())
}

fn referrer_prefix(referrer: UserId) -> String {
    format!("comm_by_referrer:{:020}:", referrer.value())
}

fn referrer_key(key: &CommissionKey) -> String {
    format!(
        "{}{:020}:{:03}",
        referrer_prefix(key.referrer_id),
        key.investment_id.value(),
        key.level
    )
}

fn balance_key(user: UserId) -> String {
    format!("balance:{}", user.value())
}

fn participant_key(user: UserId) -> String {
    format!("participant:{}", user.value())
}

fn investment_key(id: InvestmentId) -> String {
    format!("investment:{:020}", id.value())
}

fn user_investment_prefix(user: UserId) -> String {
    format!("investment_by_user:{:020}:", user.value())
}

fn user_investment_key(user: UserId, id: InvestmentId) -> String {
    format!("{}{:020}", user_investment_prefix(user), id.value())
}

fn parse_id(bytes: &[u8]) -> Result<u64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Storage("Invalid stored id".into()))
}

/// RocksDB-backed store.
pub struct RocksStore {
    db: DB,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create storage at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.db.get(key.as_bytes())? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.db.put(key.as_bytes(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn get_id(&self, key: &str) -> Result<Option<u64>> {
        match self.db.get(key.as_bytes())? {
            Some(data) => Ok(Some(parse_id(&data)?)),
            None => Ok(None),
        }
    }

    /// Keys and values under a prefix, in key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let prefix = prefix.as_bytes();
        let mut items = Vec::new();
        for item in self.db.prefix_iterator(prefix) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            items.push((key, value));
        }
        Ok(items)
    }

    fn position_by_pointer(&self, pointer_key: &str) -> Result<Option<MatrixPosition>> {
        match self.get_id(pointer_key)? {
            Some(id) => self.get_json(&position_key(PositionId(id))),
            None => Ok(None),
        }
    }

    fn next_position_id(&self) -> Result<u64> {
        let current = match self.db.get(NEXT_POSITION_ID)? {
            Some(data) => parse_id(&data)?,
            None => 0,
        };
        Ok(current + 1)
    }
}

impl PositionStore for RocksStore {
    fn position_of(&self, user: UserId) -> Result<Option<MatrixPosition>> {
        self.position_by_pointer(&active_key(user))
    }

    fn latest_position_of(&self, user: UserId) -> Result<Option<MatrixPosition>> {
        self.position_by_pointer(&latest_key(user))
    }

    fn position(&self, id: PositionId) -> Result<Option<MatrixPosition>> {
        self.get_json(&position_key(id))
    }

    fn active_children(&self, sponsor: UserId) -> Result<Vec<MatrixPosition>> {
        let mut children = Vec::new();
        for (_, value) in self.scan_prefix(&child_prefix(sponsor))? {
            let id = parse_id(&value)?;
            if let Some(position) = self.position(PositionId(id))? {
                children.push(position);
            }
        }
        Ok(children)
    }

    fn insert_position(&self, new: NewPosition) -> Result<InsertOutcome> {
        let _guard = self.write_guard();

        if let Some(existing) = self.position_of(new.user_id)? {
            return Ok(InsertOutcome::UserAlreadyPlaced(existing));
        }
        let slot = slot_key(new.sponsor_id, new.level, new.position);
        if self.db.get(slot.as_bytes())?.is_some() {
            return Ok(InsertOutcome::SlotTaken);
        }

        let id = self.next_position_id()?;
        let position = new.into_position(PositionId(id));
        let id_bytes = id.to_string();

        let mut batch = WriteBatch::default();
        batch.put(NEXT_POSITION_ID, id_bytes.as_bytes());
        batch.put(position_key(position.id).as_bytes(), serde_json::to_vec(&position)?);
        batch.put(slot.as_bytes(), id_bytes.as_bytes());
        batch.put(active_key(position.user_id).as_bytes(), id_bytes.as_bytes());
        batch.put(latest_key(position.user_id).as_bytes(), id_bytes.as_bytes());
        batch.put(child_key(&position).as_bytes(), id_bytes.as_bytes());
        self.db.write(batch)?;

        Ok(InsertOutcome::Inserted(position))
    }

    fn deactivate_position(&self, user: UserId) -> Result<Option<MatrixPosition>> {
        let _guard = self.write_guard();

        let Some(mut position) = self.position_of(user)? else {
            return Ok(None);
        };
        position.is_active = false;

        let mut batch = WriteBatch::default();
        batch.put(position_key(position.id).as_bytes(), serde_json::to_vec(&position)?);
        batch.delete(active_key(user).as_bytes());
        batch.delete(slot_key(position.sponsor_id, position.level, position.position).as_bytes());
        batch.delete(child_key(&position).as_bytes());
        self.db.write(batch)?;

        Ok(Some(position))
    }
}

impl CommissionStore for RocksStore {
    fn record_commissions(&self, investment: InvestmentId, records: Vec<CommissionRecord>) -> Result<PostingOutcome> {
        let _guard = self.write_guard();

        let marker = posted_key(investment);
        if self.db.get(marker.as_bytes())?.is_some() {
            return Ok(PostingOutcome::AlreadyPosted);
        }

        let mut batch = WriteBatch::default();
        let mut outcomes = Vec::with_capacity(records.len());
        let mut balances: HashMap<UserId, ReferrerBalance> = HashMap::new();
        let mut written: HashMap<CommissionKey, CommissionRecord> = HashMap::new();

        for record in records {
            let key = record.key();
            let primary = commission_key(&key);

            if let Some(existing) = written.get(&key) {
                outcomes.push(RecordOutcome::Duplicate(existing.clone()));
                continue;
            }
            if let Some(existing) = self.get_json::<CommissionRecord>(&primary)? {
                outcomes.push(RecordOutcome::Duplicate(existing));
                continue;
            }

            if !balances.contains_key(&record.referrer_id) {
                let loaded = self.balance(record.referrer_id)?;
                balances.insert(record.referrer_id, loaded);
            }
            if let Some(balance) = balances.get_mut(&record.referrer_id) {
                balance.credit(record.amount);
            }

            batch.put(primary.as_bytes(), serde_json::to_vec(&record)?);
            batch.put(referrer_key(&key).as_bytes(), primary.as_bytes());
            written.insert(key, record.clone());
            outcomes.push(RecordOutcome::Inserted(record));
        }

        for (user, balance) in &balances {
            batch.put(balance_key(*user).as_bytes(), serde_json::to_vec(balance)?);
        }
        batch.put(marker.as_bytes(), outcomes.len().to_string().as_bytes());
        self.db.write(batch)?;

        Ok(PostingOutcome::Posted(outcomes))
    }

    fn is_posted(&self, investment: InvestmentId) -> Result<bool> {
        Ok(self.db.get(posted_key(investment).as_bytes())?.is_some())
    }

    fn commissions_for_investment(&self, investment: InvestmentId) -> Result<Vec<CommissionRecord>> {
        let mut records = Vec::new();
        for (_, value) in self.scan_prefix(&commission_prefix(investment))? {
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    fn commissions_for_referrer(&self, referrer: UserId) -> Result<Vec<CommissionRecord>> {
        let mut records = Vec::new();
        for (_, pointer) in self.scan_prefix(&referrer_prefix(referrer))? {
            let primary = String::from_utf8_lossy(&pointer);
            if let Some(record) = self.get_json(&primary)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn balance(&self, user: UserId) -> Result<ReferrerBalance> {
        Ok(self
            .get_json(&balance_key(user))?
            .unwrap_or_else(|| ReferrerBalance::empty(user)))
    }
}

impl ParticipantDirectory for RocksStore {
    fn participant(&self, id: UserId) -> Result<Option<Participant>> {
        self.get_json(&participant_key(id))
    }

    fn put_participant(&self, participant: &Participant) -> Result<()> {
        self.put_json(&participant_key(participant.id), participant)
    }

    fn investment(&self, id: InvestmentId) -> Result<Option<Investment>> {
        self.get_json(&investment_key(id))
    }

    fn investments_of(&self, user: UserId) -> Result<Vec<Investment>> {
        let mut investments = Vec::new();
        for (_, value) in self.scan_prefix(&user_investment_prefix(user))? {
            let id = InvestmentId(parse_id(&value)?);
            if let Some(investment) = self.investment(id)? {
                investments.push(investment);
            }
        }
        Ok(investments)
    }

    fn put_investment(&self, investment: &Investment) -> Result<()> {
        let _guard = self.write_guard();
        let id = investment.id.value().to_string();
        let index = user_investment_key(investment.user_id, investment.id);

        let mut batch = WriteBatch::default();
        if let Some(previous) = self.get_json::<Investment>(&investment_key(investment.id))? {
            if previous.user_id != investment.user_id {
                batch.delete(user_investment_key(previous.user_id, investment.id).as_bytes());
            }
        }
        batch.put(investment_key(investment.id).as_bytes(), serde_json::to_vec(investment)?);
        batch.put(index.as_bytes(), id.as_bytes());
        self.db.write(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommissionLineItem, InvestmentStatus, PlacementType};
    use tempfile::tempdir;
    use trellis_matrix::{Money, Rate};

    fn claim(user: u64, sponsor: u64, position: u8) -> NewPosition {
        NewPosition {
            user_id: UserId(user),
            sponsor_id: UserId(sponsor),
            level: 1,
            position,
            placement_type: PlacementType::Direct,
            spillover_from_id: None,
            placed_at: 42,
        }
    }

    fn record(investment: u64, referrer: u64, level: u8, minor: i64) -> CommissionRecord {
        CommissionRecord::pending(
            CommissionLineItem {
                referrer_id: UserId(referrer),
                referee_id: UserId(99),
                investment_id: InvestmentId(investment),
                level,
                amount: Money::from_minor(minor),
                percentage_applied: Rate::percent(10.0),
                matrix_position: PositionId(1),
            },
            7,
        )
    }

    #[test]
    fn positions_roundtrip() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();

        let placed = match store.insert_position(claim(2, 1, 1)).unwrap() {
            InsertOutcome::Inserted(p) => p,
            other => panic!("expected insert, got {:?}", other),
        };
        assert_eq!(placed.id, PositionId(1));
        assert_eq!(store.position_of(UserId(2)).unwrap(), Some(placed.clone()));
        assert_eq!(store.position(placed.id).unwrap(), Some(placed));
    }

    #[test]
    fn slot_and_user_conflicts() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();

        store.insert_position(claim(2, 1, 1)).unwrap();
        assert_eq!(store.insert_position(claim(3, 1, 1)).unwrap(), InsertOutcome::SlotTaken);
        assert!(matches!(
            store.insert_position(claim(2, 1, 2)).unwrap(),
            InsertOutcome::UserAlreadyPlaced(_)
        ));
    }

    #[test]
    fn children_in_slot_order() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();

        store.insert_position(claim(5, 1, 3)).unwrap();
        store.insert_position(claim(4, 1, 1)).unwrap();
        store.insert_position(claim(6, 2, 1)).unwrap();

        let users: Vec<UserId> = store.active_children(UserId(1)).unwrap().iter().map(|p| p.user_id).collect();
        assert_eq!(users, vec![UserId(4), UserId(5)]);
    }

    #[test]
    fn deactivation_frees_slot() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();

        store.insert_position(claim(2, 1, 1)).unwrap();
        store.deactivate_position(UserId(2)).unwrap();

        assert!(store.position_of(UserId(2)).unwrap().is_none());
        assert!(!store.latest_position_of(UserId(2)).unwrap().unwrap().is_active);
        assert!(store.active_children(UserId(1)).unwrap().is_empty());
        assert!(matches!(store.insert_position(claim(3, 1, 1)).unwrap(), InsertOutcome::Inserted(_)));
    }

    #[test]
    fn survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = RocksStore::open(dir.path()).unwrap();
            store.insert_position(claim(2, 1, 1)).unwrap();
            store.record_commissions(InvestmentId(1), vec![record(1, 1, 1, 250)]).unwrap();
        }

        let store = RocksStore::open(dir.path()).unwrap();
        assert!(store.position_of(UserId(2)).unwrap().is_some());
        assert_eq!(store.balance(UserId(1)).unwrap().pending, Money::from_minor(250));

        // Id counter continues after reopen.
        match store.insert_position(claim(3, 1, 2)).unwrap() {
            InsertOutcome::Inserted(p) => assert_eq!(p.id, PositionId(2)),
            other => panic!("expected insert, got {:?}", other),
        }
    }

    #[test]
    fn commission_batch_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();

        let batch = vec![record(9, 10, 1, 1_000), record(9, 11, 2, 800), record(9, 10, 1, 1_000)];
        match store.record_commissions(InvestmentId(9), batch.clone()).unwrap() {
            PostingOutcome::Posted(outcomes) => {
                assert_eq!(outcomes.iter().filter(|o| o.is_duplicate()).count(), 1)
            }
            other => panic!("expected first posting, got {:?}", other),
        }

        let mut changed = batch;
        changed.push(record(9, 12, 3, 600));
        assert_eq!(
            store.record_commissions(InvestmentId(9), changed).unwrap(),
            PostingOutcome::AlreadyPosted
        );

        assert_eq!(store.commissions_for_investment(InvestmentId(9)).unwrap().len(), 2);
        assert_eq!(store.commissions_for_referrer(UserId(10)).unwrap().len(), 1);
        assert_eq!(store.balance(UserId(10)).unwrap().total_earned, Money::from_minor(1_000));
        assert_eq!(store.balance(UserId(12)).unwrap().total_earned, Money::ZERO);
    }

    #[test]
    fn posted_marker_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = RocksStore::open(dir.path()).unwrap();
            store.record_commissions(InvestmentId(5), Vec::new()).unwrap();
        }

        let store = RocksStore::open(dir.path()).unwrap();
        assert!(store.is_posted(InvestmentId(5)).unwrap());
        assert!(!store.is_posted(InvestmentId(6)).unwrap());
        assert_eq!(
            store.record_commissions(InvestmentId(5), vec![record(5, 1, 1, 100)]).unwrap(),
            PostingOutcome::AlreadyPosted
        );
        assert!(store.commissions_for_investment(InvestmentId(5)).unwrap().is_empty());
    }

    #[test]
    fn moving_an_investment_reindexes_it() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();

        let mut investment = Investment::new(InvestmentId(8), UserId(1), Money::from_major(100), InvestmentStatus::Active);
        store.put_investment(&investment).unwrap();
        investment.user_id = UserId(2);
        store.put_investment(&investment).unwrap();

        assert!(store.investments_of(UserId(1)).unwrap().is_empty());
        assert_eq!(store.investments_of(UserId(2)).unwrap(), vec![investment]);
    }

    #[test]
    fn directory_roundtrip() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();

        let participant = Participant::new(UserId(3)).with_referrer(UserId(1)).with_tier("Gold");
        store.put_participant(&participant).unwrap();
        assert_eq!(store.participant(UserId(3)).unwrap(), Some(participant));

        let investment = Investment::new(InvestmentId(4), UserId(3), Money::from_major(700), InvestmentStatus::Active);
        store.put_investment(&investment).unwrap();
        store
            .put_investment(&Investment::new(InvestmentId(5), UserId(8), Money::from_major(1), InvestmentStatus::Pending))
            .unwrap();

        assert_eq!(store.investment(InvestmentId(4)).unwrap(), Some(investment.clone()));
        assert_eq!(store.investments_of(UserId(3)).unwrap(), vec![investment]);
    }
}
