//! The engine facade: one handle over store, tier table, clock, and config.

use crate::clock::{Clock, SystemClock};
use crate::commission::CommissionCalculator;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::model::{CommissionLineItem, CommissionRecord, Investment, MatrixPosition, Participant, ReferrerBalance};
use crate::placement::{MatrixPlacementEngine, Placement};
use crate::store::{CommissionStore, ParticipantDirectory, PositionStore, Store};
use crate::traversal::{MatrixStatistics, MatrixTree, NetworkTraversal};
use std::collections::BTreeMap;
use trellis_matrix::{InvestmentId, Money, TierRateTable, UserId};

/// What [`ReferralMatrix::process_investment`] did.
#[derive(Debug, Clone, PartialEq)]
pub struct InvestmentOutcome {
    /// Set when the investor had no active position and a referrer to place under.
    pub placement: Option<Placement>,
    /// Every commission record held for the investment.
    pub commissions: Vec<CommissionRecord>,
}

/// Matrix placement, traversal, and commissions over a single store.
///
/// `ReferralMatrix` is `Sync` when the store is, so one instance can be shared
/// across threads behind an `Arc`.
pub struct ReferralMatrix<S: Store> {
    store: S,
    tiers: TierRateTable,
    clock: Box<dyn Clock>,
    config: EngineConfig,
}

impl<S: Store> ReferralMatrix<S> {
    pub fn new(store: S, tiers: TierRateTable) -> Self {
        Self {
            store,
            tiers,
            clock: Box::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn tiers(&self) -> &TierRateTable {
        &self.tiers
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    fn placement(&self) -> MatrixPlacementEngine<'_, S> {
        MatrixPlacementEngine::new(&self.store, self.clock.as_ref(), self.config)
    }

    fn calculator(&self) -> CommissionCalculator<'_, S> {
        CommissionCalculator::new(&self.store, &self.tiers, self.clock.as_ref())
    }

    fn traversal(&self) -> NetworkTraversal<'_, S> {
        NetworkTraversal::new(&self.store, self.config)
    }

    /// Add or update a participant.
    ///
    /// A named tier must exist in the table and a named referrer must already
    /// be registered.
    pub fn register_participant(&self, participant: &Participant) -> Result<()> {
        if let Some(tier) = participant.tier.as_deref() {
            if self.tiers.get(tier).is_none() {
                return Err(Error::Config(format!("unknown tier {tier:?}")));
            }
        }
        if let Some(referrer) = participant.referrer_id {
            if referrer == participant.id {
                return Err(Error::InvalidSponsor {
                    sponsor: referrer,
                    reason: "a participant cannot refer themselves",
                });
            }
            if self.store.participant(referrer)?.is_none() {
                return Err(Error::UnknownParticipant(referrer));
            }
        }
        self.store.put_participant(participant)?;
        tracing::debug!("Registered {}", participant.id);
        Ok(())
    }

    /// Add or update an investment for a registered participant.
    pub fn record_investment(&self, investment: &Investment) -> Result<()> {
        if self.store.participant(investment.user_id)?.is_none() {
            return Err(Error::UnknownParticipant(investment.user_id));
        }
        if !investment.amount.is_positive() {
            return Err(trellis_matrix::Error::InvalidAmount(investment.amount.to_string()).into());
        }
        self.store.put_investment(investment)?;
        tracing::debug!("Recorded {} for {} ({:?})", investment.id, investment.user_id, investment.status);
        Ok(())
    }

    pub fn find_or_create_position(&self, sponsor: UserId, new_user: UserId) -> Result<Placement> {
        self.placement().find_or_create_position(sponsor, new_user)
    }

    pub fn deactivate_position(&self, user: UserId) -> Result<Option<MatrixPosition>> {
        self.placement().deactivate_position(user)
    }

    pub fn calculate_commissions(&self, investment: &Investment) -> Result<Vec<CommissionLineItem>> {
        self.calculator().calculate_commissions(investment)
    }

    pub fn post_commissions(&self, investment: InvestmentId) -> Result<Vec<CommissionRecord>> {
        self.calculator().post_commissions(investment)
    }

    /// Handle an investment event end to end.
    ///
    /// An investor who was never placed is first placed under their
    /// referrer, then commissions are posted. Deactivated investors are not
    /// placed again. Safe to replay.
    pub fn process_investment(&self, investment_id: InvestmentId) -> Result<InvestmentOutcome> {
        let investment = self
            .store
            .investment(investment_id)?
            .ok_or(Error::UnknownInvestment(investment_id))?;
        let investor = self
            .store
            .participant(investment.user_id)?
            .ok_or(Error::UnknownParticipant(investment.user_id))?;

        let placement = match investor.referrer_id {
            Some(referrer) if investor.is_active && self.store.latest_position_of(investor.id)?.is_none() => {
                Some(self.find_or_create_position(referrer, investor.id)?)
            }
            _ => None,
        };

        let commissions = self.post_commissions(investment_id)?;
        Ok(InvestmentOutcome { placement, commissions })
    }

    pub fn build_matrix_view(&self, root: UserId, max_level: u8) -> Result<MatrixTree> {
        self.traversal().build_matrix_view(root, max_level)
    }

    pub fn calculate_downline_counts(&self, user: UserId, max_level: u8) -> Result<BTreeMap<u8, usize>> {
        self.traversal().calculate_downline_counts(user, max_level)
    }

    pub fn matrix_statistics(&self, user: UserId) -> Result<MatrixStatistics> {
        self.traversal().matrix_statistics(user)
    }

    pub fn downline_volume(&self, user: UserId, max_level: u8) -> Result<Money> {
        self.traversal().downline_volume(user, max_level)
    }

    pub fn refresh_participant_caches(&self, user: UserId) -> Result<Participant> {
        self.traversal().refresh_participant_caches(user)
    }

    pub fn referrer_balance(&self, user: UserId) -> Result<ReferrerBalance> {
        self.store.balance(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{InvestmentStatus, PlacementType};
    use crate::store::{MemoryStore, RocksStore};
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn matrix_with(users: u64) -> ReferralMatrix<MemoryStore> {
        let matrix = ReferralMatrix::new(MemoryStore::new(), TierRateTable::standard()).with_clock(ManualClock::new(1));
        for id in 1..=users {
            matrix.register_participant(&Participant::new(UserId(id)).with_tier("Gold")).unwrap();
        }
        matrix
    }

    /// Slot uniqueness, width, level consistency, and one active position per user.
    fn assert_matrix_invariants<S: Store>(matrix: &ReferralMatrix<S>, users: impl IntoIterator<Item = u64>) {
        let store = matrix.store();
        let mut slots = HashSet::new();
        for id in users {
            let user = UserId(id);
            let Some(position) = store.position_of(user).unwrap() else { continue };
            assert_eq!(position.user_id, user);
            assert!(
                slots.insert((position.sponsor_id, position.level, position.position)),
                "slot {:?} held twice",
                (position.sponsor_id, position.level, position.position)
            );
            assert!((1..=3).contains(&position.position));

            // Children keep their level when the sponsor is deactivated.
            let sponsor_level = store.latest_position_of(position.sponsor_id).unwrap().map_or(0, |p| p.level);
            assert_eq!(position.level, sponsor_level + 1);

            let children = store.active_children(user).unwrap();
            assert!(children.len() <= 3, "{user} has {} children", children.len());
        }
    }

    #[test]
    fn process_investment_places_then_pays() {
        let matrix = matrix_with(1);
        matrix
            .register_participant(&Participant::new(UserId(2)).with_referrer(UserId(1)).with_tier("Basic"))
            .unwrap();
        let investment = Investment::new(InvestmentId(1), UserId(2), Money::from_major(1_000), InvestmentStatus::Active);
        matrix.record_investment(&investment).unwrap();

        let outcome = matrix.process_investment(InvestmentId(1)).unwrap();
        let placement = outcome.placement.unwrap();
        assert!(placement.is_created());
        assert_eq!(placement.position().sponsor_id, UserId(1));
        assert_eq!(outcome.commissions.len(), 1);
        // Gold level 1: 12% of 1,000
        assert_eq!(outcome.commissions[0].amount, Money::from_major(120));

        let replay = matrix.process_investment(InvestmentId(1)).unwrap();
        assert!(replay.placement.is_none());
        assert_eq!(replay.commissions, outcome.commissions);
        assert_eq!(matrix.referrer_balance(UserId(1)).unwrap().pending, Money::from_major(120));
    }

    #[test]
    fn process_investment_leaves_deactivated_investor_out() {
        let matrix = matrix_with(1);
        matrix
            .register_participant(&Participant::new(UserId(2)).with_referrer(UserId(1)).with_tier("Basic"))
            .unwrap();
        matrix.find_or_create_position(UserId(1), UserId(2)).unwrap();
        matrix.deactivate_position(UserId(2)).unwrap();

        let investment = Investment::new(InvestmentId(3), UserId(2), Money::from_major(1_000), InvestmentStatus::Active);
        matrix.record_investment(&investment).unwrap();
        let outcome = matrix.process_investment(InvestmentId(3)).unwrap();

        assert!(outcome.placement.is_none());
        assert!(matrix.store().position_of(UserId(2)).unwrap().is_none());
        assert_eq!(matrix.store().active_children(UserId(1)).unwrap(), Vec::new());
    }

    #[test]
    fn process_investment_without_referrer_posts_nothing() {
        let matrix = matrix_with(1);
        let investment = Investment::new(InvestmentId(7), UserId(1), Money::from_major(500), InvestmentStatus::Paid);
        matrix.record_investment(&investment).unwrap();

        let outcome = matrix.process_investment(InvestmentId(7)).unwrap();
        assert!(outcome.placement.is_none());
        assert!(outcome.commissions.is_empty());
    }

    #[test]
    fn registration_checks_tier_and_referrer() {
        let matrix = matrix_with(1);
        assert!(matches!(
            matrix.register_participant(&Participant::new(UserId(2)).with_tier("Platinum")),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            matrix.register_participant(&Participant::new(UserId(2)).with_referrer(UserId(99))),
            Err(Error::UnknownParticipant(UserId(99)))
        ));
        assert!(matches!(
            matrix.record_investment(&Investment::new(
                InvestmentId(1),
                UserId(1),
                Money::ZERO,
                InvestmentStatus::Active
            )),
            Err(Error::Matrix(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_config() {
        let config = EngineConfig { window_depth: 5, ..Default::default() };
        assert!(ReferralMatrix::new(MemoryStore::new(), TierRateTable::standard())
            .with_config(config)
            .is_err());
    }

    #[test]
    fn racing_for_the_last_direct_slot() {
        for _ in 0..50 {
            let matrix = Arc::new(matrix_with(11));
            matrix.find_or_create_position(UserId(1), UserId(2)).unwrap();
            matrix.find_or_create_position(UserId(1), UserId(3)).unwrap();

            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = [10, 11]
                .into_iter()
                .map(|id| {
                    let matrix = Arc::clone(&matrix);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        matrix.find_or_create_position(UserId(1), UserId(id)).unwrap()
                    })
                })
                .collect();
            let placements: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            let mut types: Vec<_> = placements.iter().map(|p| p.position().placement_type).collect();
            types.sort_by_key(|t| *t == PlacementType::Spillover);
            assert_eq!(types, vec![PlacementType::Direct, PlacementType::Spillover]);
            assert_matrix_invariants(&matrix, 1..=11);
        }
    }

    #[test]
    fn concurrent_placements_fill_window_without_duplicates() {
        let users = 2..=40u64;
        let config = EngineConfig { placement_retries: 64, ..Default::default() };
        let matrix = Arc::new(matrix_with(40).with_config(config).unwrap());
        let threads = 4;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let matrix = Arc::clone(&matrix);
                let barrier = Arc::clone(&barrier);
                let mine: Vec<u64> = users.clone().filter(|id| *id as usize % threads == t).collect();
                thread::spawn(move || {
                    barrier.wait();
                    mine.into_iter()
                        .map(|id| matrix.find_or_create_position(UserId(1), UserId(id)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let placed = results.iter().filter(|r| r.is_ok()).count();
        let full = results
            .iter()
            .filter(|r| matches!(r, Err(Error::NoCapacityWithinWindow { .. })))
            .count();

        // 39 users contend for exactly 39 slots
        assert_eq!(placed, 39);
        assert_eq!(full, 0);
        assert_eq!(matrix.store().position_count(), 39);
        assert_matrix_invariants(&matrix, 1..=40);
    }

    #[test]
    fn rocks_backed_matrix_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        let matrix = ReferralMatrix::new(store, TierRateTable::standard()).with_clock(ManualClock::new(1));
        for id in 1..=5 {
            let mut participant = Participant::new(UserId(id)).with_tier("Elite");
            if id > 1 {
                participant = participant.with_referrer(UserId(id - 1));
            }
            matrix.register_participant(&participant).unwrap();
        }
        for id in 2..=5 {
            let investment = Investment::new(InvestmentId(id), UserId(id), Money::from_major(10_000), InvestmentStatus::Active);
            matrix.record_investment(&investment).unwrap();
            matrix.process_investment(InvestmentId(id)).unwrap();
        }

        // User 2 earns level 1 from 3, level 2 from 4, level 3 from 5.
        let balance = matrix.referrer_balance(UserId(2)).unwrap();
        assert_eq!(balance.pending, Money::from_major(1_500 + 800 + 300));
        assert_eq!(matrix.calculate_downline_counts(UserId(1), 3).unwrap(), BTreeMap::from([(1, 1), (2, 1), (3, 1)]));
        assert_matrix_invariants(&matrix, 1..=5);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn random_placements_keep_invariants(
            sponsors in prop::collection::vec(0usize..8, 1..60),
            deactivate in prop::collection::vec(any::<bool>(), 60),
        ) {
            let total = sponsors.len() as u64 + 1;
            let matrix = matrix_with(total);

            for (i, choice) in sponsors.iter().enumerate() {
                let user = UserId(i as u64 + 2);
                // Sponsor is the root or one of the last few users added.
                let sponsor = UserId((user.value() - 1).saturating_sub(*choice as u64).max(1));
                match matrix.find_or_create_position(sponsor, user) {
                    Ok(placement) => prop_assert!(placement.is_created()),
                    Err(Error::NoCapacityWithinWindow { .. }) | Err(Error::SponsorInactive(_)) => {}
                    Err(other) => prop_assert!(false, "unexpected error: {other}"),
                }
                if deactivate[i] && i % 5 == 4 {
                    matrix.deactivate_position(user).unwrap();
                }
            }

            assert_matrix_invariants(&matrix, 1..=total);
        }
    }
}
