//! Multi-level commission calculation and exactly-once posting.
//!
//! From the investor's position the calculator climbs up to three sponsor
//! links. Each ancestor is evaluated against its own tier:
//!
//! - inactive, unknown, or tierless ancestors are skipped
//! - tiers that do not pay the current level are skipped
//! - everyone else earns `amount × rate × multiplier / 100`
//!
//! Skipping never stops the climb. The climb stops at the network root or
//! after level 3.
//!
//! Posting writes one record per `(investment, referrer, level)` and marks
//! the investment as posted in the same write. The store enforces both, so
//! replays and duplicate events post nothing new.

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::{CommissionLineItem, CommissionRecord, Investment, MatrixPosition};
use crate::store::{CommissionStore, ParticipantDirectory, PositionStore, PostingOutcome};
use std::collections::HashSet;
use trellis_matrix::{commission_amount, InvestmentId, TierRateTable, UserId, MATRIX_DEPTH};

/// Computes and posts matrix commissions.
pub struct CommissionCalculator<'a, S: ?Sized> {
    store: &'a S,
    tiers: &'a TierRateTable,
    clock: &'a dyn Clock,
}

impl<'a, S> CommissionCalculator<'a, S>
where
    S: PositionStore + CommissionStore + ParticipantDirectory + ?Sized,
{
    pub fn new(store: &'a S, tiers: &'a TierRateTable, clock: &'a dyn Clock) -> Self {
        Self { store, tiers, clock }
    }

    /// Line items owed for `investment` under the current tree. No writes.
    pub fn calculate_commissions(&self, investment: &Investment) -> Result<Vec<CommissionLineItem>> {
        if !investment.amount.is_positive() {
            return Ok(Vec::new());
        }
        let Some(origin) = self.store.position_of(investment.user_id)? else {
            tracing::debug!("{} has no position, no commissions for {}", investment.user_id, investment.id);
            return Ok(Vec::new());
        };

        let mut items = Vec::new();
        let mut visited = HashSet::from([investment.user_id]);
        let mut referrer = origin.sponsor_id;

        for level in 1..=MATRIX_DEPTH {
            if !visited.insert(referrer) {
                return Err(Error::CycleDetected(referrer));
            }

            let (active, latest) = self.positions_of(referrer)?;
            let placed_but_inactive = active.is_none() && latest.is_some();
            if !placed_but_inactive {
                if let Some(item) = self.line_item(investment, &origin, referrer, level)? {
                    items.push(item);
                }
            }

            match active.or(latest) {
                Some(position) => referrer = position.sponsor_id,
                None => break,
            }
        }

        Ok(items)
    }

    /// Calculate and record commissions for an eligible investment.
    ///
    /// The first call fixes the commission set of the investment. Later calls
    /// return that set without recalculating, even if tiers or the upline
    /// changed in between.
    pub fn post_commissions(&self, investment_id: InvestmentId) -> Result<Vec<CommissionRecord>> {
        let investment = self
            .store
            .investment(investment_id)?
            .ok_or(Error::UnknownInvestment(investment_id))?;
        if !investment.status.is_eligible() {
            return Err(Error::InvestmentNotEligible {
                investment: investment_id,
                status: investment.status,
            });
        }

        if self.store.is_posted(investment_id)? {
            tracing::debug!("Commissions for {} already posted", investment_id);
            return self.store.commissions_for_investment(investment_id);
        }

        let now = self.clock.now_millis();
        let records: Vec<CommissionRecord> = self
            .calculate_commissions(&investment)?
            .into_iter()
            .map(|item| CommissionRecord::pending(item, now))
            .collect();

        match self.store.record_commissions(investment_id, records)? {
            PostingOutcome::Posted(outcomes) => {
                let mut posted = 0;
                for outcome in &outcomes {
                    let record = outcome.record();
                    if outcome.is_duplicate() {
                        tracing::debug!(
                            "Commission for {} level {} to {} already posted",
                            investment_id,
                            record.level,
                            record.referrer_id
                        );
                    } else {
                        posted += 1;
                    }
                }
                tracing::info!("Posted {} commissions for {}", posted, investment_id);
            }
            // Lost a race with a concurrent posting of the same investment.
            PostingOutcome::AlreadyPosted => {
                tracing::debug!("Commissions for {} posted concurrently", investment_id);
            }
        }

        self.store.commissions_for_investment(investment_id)
    }

    /// Active position and, failing that, the most recent inactive one.
    fn positions_of(&self, user: UserId) -> Result<(Option<MatrixPosition>, Option<MatrixPosition>)> {
        let active = self.store.position_of(user)?;
        let latest = match active {
            Some(_) => None,
            None => self.store.latest_position_of(user)?,
        };
        Ok((active, latest))
    }

    fn line_item(
        &self,
        investment: &Investment,
        origin: &MatrixPosition,
        referrer: UserId,
        level: u8,
    ) -> Result<Option<CommissionLineItem>> {
        let Some(participant) = self.store.participant(referrer)? else {
            tracing::debug!("Skipping unknown referrer {} at level {}", referrer, level);
            return Ok(None);
        };
        if !participant.is_active {
            return Ok(None);
        }
        let Some(rate) = participant.tier.as_deref().and_then(|t| self.tiers.rate(t, level)) else {
            return Ok(None);
        };

        let amount = commission_amount(investment.amount, rate, level);
        if !amount.is_positive() {
            return Ok(None);
        }

        Ok(Some(CommissionLineItem {
            referrer_id: referrer,
            referee_id: investment.user_id,
            investment_id: investment.id,
            level,
            amount,
            percentage_applied: rate,
            matrix_position: origin.id,
        }))
    }
}
