//! In-process store backed by hash maps under a single mutex.

use super::{CommissionStore, InsertOutcome, ParticipantDirectory, PositionStore, PostingOutcome, RecordOutcome};
use crate::error::Result;
use crate::model::{
    CommissionKey, CommissionRecord, Investment, MatrixPosition, NewPosition, Participant,
    ReferrerBalance,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use trellis_matrix::{InvestmentId, PositionId, UserId};

#[derive(Debug, Default)]
struct Inner {
    positions: HashMap<PositionId, MatrixPosition>,
    next_position_id: u64,
    /// Active position per user.
    active_by_user: HashMap<UserId, PositionId>,
    /// Most recent position per user, active or not.
    latest_by_user: HashMap<UserId, PositionId>,
    /// Active slot index: (sponsor, level, position) → holder.
    slots: HashMap<(UserId, u32, u8), PositionId>,
    /// Active children per sponsor.
    children: HashMap<UserId, Vec<PositionId>>,

    commissions: BTreeMap<CommissionKey, CommissionRecord>,
    posted: HashSet<InvestmentId>,
    balances: HashMap<UserId, ReferrerBalance>,

    participants: HashMap<UserId, Participant>,
    investments: BTreeMap<InvestmentId, Investment>,
}

/// Store that lives in memory. Every operation holds one lock, so each call
/// is a serialisable transaction.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Critical sections validate before mutating, so a poisoned lock
        // still guards consistent data.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of position rows, active or not.
    pub fn position_count(&self) -> usize {
        self.lock().positions.len()
    }

    /// Number of commission rows.
    pub fn commission_count(&self) -> usize {
        self.lock().commissions.len()
    }
}

impl PositionStore for MemoryStore {
    fn position_of(&self, user: UserId) -> Result<Option<MatrixPosition>> {
        let inner = self.lock();
        Ok(inner
            .active_by_user
            .get(&user)
            .and_then(|id| inner.positions.get(id))
            .cloned())
    }

    fn latest_position_of(&self, user: UserId) -> Result<Option<MatrixPosition>> {
        let inner = self.lock();
        Ok(inner
            .latest_by_user
            .get(&user)
            .and_then(|id| inner.positions.get(id))
            .cloned())
    }

    fn position(&self, id: PositionId) -> Result<Option<MatrixPosition>> {
        Ok(self.lock().positions.get(&id).cloned())
    }

    fn active_children(&self, sponsor: UserId) -> Result<Vec<MatrixPosition>> {
        let inner = self.lock();
        let mut children: Vec<MatrixPosition> = inner
            .children
            .get(&sponsor)
            .map(|ids| ids.iter().filter_map(|id| inner.positions.get(id)).cloned().collect())
            .unwrap_or_default();
        children.sort_by_key(|p| (p.position, p.id));
        Ok(children)
    }

    fn insert_position(&self, new: NewPosition) -> Result<InsertOutcome> {
        let mut inner = self.lock();

        if let Some(existing) = inner.active_by_user.get(&new.user_id).and_then(|id| inner.positions.get(id)) {
            return Ok(InsertOutcome::UserAlreadyPlaced(existing.clone()));
        }
        let slot = (new.sponsor_id, new.level, new.position);
        if inner.slots.contains_key(&slot) {
            return Ok(InsertOutcome::SlotTaken);
        }

        inner.next_position_id += 1;
        let id = PositionId(inner.next_position_id);
        let position = new.into_position(id);

        inner.slots.insert(slot, id);
        inner.active_by_user.insert(position.user_id, id);
        inner.latest_by_user.insert(position.user_id, id);
        inner.children.entry(position.sponsor_id).or_default().push(id);
        inner.positions.insert(id, position.clone());

        Ok(InsertOutcome::Inserted(position))
    }

    fn deactivate_position(&self, user: UserId) -> Result<Option<MatrixPosition>> {
        let mut inner = self.lock();
        let Some(id) = inner.active_by_user.remove(&user) else {
            return Ok(None);
        };

        let Some(position) = inner.positions.get_mut(&id) else {
            return Ok(None);
        };
        position.is_active = false;
        let position = position.clone();

        inner.slots.remove(&(position.sponsor_id, position.level, position.position));
        if let Some(siblings) = inner.children.get_mut(&position.sponsor_id) {
            siblings.retain(|sibling| *sibling != id);
        }
        Ok(Some(position))
    }
}

impl CommissionStore for MemoryStore {
    fn record_commissions(&self, investment: InvestmentId, records: Vec<CommissionRecord>) -> Result<PostingOutcome> {
        let mut inner = self.lock();
        if !inner.posted.insert(investment) {
            return Ok(PostingOutcome::AlreadyPosted);
        }
        let mut outcomes = Vec::with_capacity(records.len());

        for record in records {
            let key = record.key();
            if let Some(existing) = inner.commissions.get(&key) {
                outcomes.push(RecordOutcome::Duplicate(existing.clone()));
                continue;
            }
            inner
                .balances
                .entry(record.referrer_id)
                .or_insert_with(|| ReferrerBalance::empty(record.referrer_id))
                .credit(record.amount);
            inner.commissions.insert(key, record.clone());
            outcomes.push(RecordOutcome::Inserted(record));
        }

        Ok(PostingOutcome::Posted(outcomes))
    }

    fn is_posted(&self, investment: InvestmentId) -> Result<bool> {
        Ok(self.lock().posted.contains(&investment))
    }

    fn commissions_for_investment(&self, investment: InvestmentId) -> Result<Vec<CommissionRecord>> {
        let inner = self.lock();
        let mut records: Vec<CommissionRecord> = inner
            .commissions
            .values()
            .filter(|r| r.investment_id == investment)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.level, r.referrer_id));
        Ok(records)
    }

    fn commissions_for_referrer(&self, referrer: UserId) -> Result<Vec<CommissionRecord>> {
        let inner = self.lock();
        Ok(inner
            .commissions
            .values()
            .filter(|r| r.referrer_id == referrer)
            .cloned()
            .collect())
    }

    fn balance(&self, user: UserId) -> Result<ReferrerBalance> {
        Ok(self
            .lock()
            .balances
            .get(&user)
            .copied()
            .unwrap_or_else(|| ReferrerBalance::empty(user)))
    }
}

impl ParticipantDirectory for MemoryStore {
    fn participant(&self, id: UserId) -> Result<Option<Participant>> {
        Ok(self.lock().participants.get(&id).cloned())
    }

    fn put_participant(&self, participant: &Participant) -> Result<()> {
        self.lock().participants.insert(participant.id, participant.clone());
        Ok(())
    }

    fn investment(&self, id: InvestmentId) -> Result<Option<Investment>> {
        Ok(self.lock().investments.get(&id).cloned())
    }

    fn investments_of(&self, user: UserId) -> Result<Vec<Investment>> {
        Ok(self
            .lock()
            .investments
            .values()
            .filter(|i| i.user_id == user)
            .cloned()
            .collect())
    }

    fn put_investment(&self, investment: &Investment) -> Result<()> {
        self.lock().investments.insert(investment.id, investment.clone());
        Ok(())
    }
}
