//! Read-only walks over the matrix: views, per-level counts, volume.
//!
//! Every walk is an explicit breadth-first queue with a hard depth limit, so
//! an arbitrarily deep network costs no more than the requested window.

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::model::{MatrixPosition, Participant, PlacementType};
use crate::store::{ParticipantDirectory, PositionStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use trellis_matrix::{matrix_capacity, slots_at_level, Money, PositionId, UserId, MATRIX_DEPTH};

/// One node in a [`MatrixTree`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixNode {
    pub user_id: UserId,
    /// `None` for an unplaced root
    pub position_id: Option<PositionId>,
    /// Depth below the view root (root is 0)
    pub level: u8,
    /// Slot under the parent (0 for the root)
    pub position: u8,
    pub placement_type: Option<PlacementType>,
    /// Indices into [`MatrixTree::nodes`], in slot order
    pub children: Vec<usize>,
}

/// A depth-limited view of the matrix below one participant.
///
/// Nodes live in an arena: `nodes[0]` is the root, children are indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixTree {
    pub root: UserId,
    pub max_level: u8,
    pub nodes: Vec<MatrixNode>,
}

impl MatrixTree {
    pub fn root_node(&self) -> &MatrixNode {
        &self.nodes[0]
    }

    pub fn node(&self, index: usize) -> Option<&MatrixNode> {
        self.nodes.get(index)
    }

    /// Children of the node at `index`, in slot order.
    pub fn children(&self, index: usize) -> impl Iterator<Item = &MatrixNode> {
        self.nodes
            .get(index)
            .into_iter()
            .flat_map(|n| n.children.iter())
            .filter_map(|&i| self.nodes.get(i))
    }

    /// Number of members below the root.
    pub fn member_count(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Members per level below the root, levels 1..=max_level.
    pub fn level_counts(&self) -> BTreeMap<u8, usize> {
        let mut counts: BTreeMap<u8, usize> = (1..=self.max_level).map(|l| (l, 0)).collect();
        for node in self.nodes.iter().skip(1) {
            *counts.entry(node.level).or_default() += 1;
        }
        counts
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.nodes.iter().any(|n| n.user_id == user)
    }
}

/// Fill state of a participant's window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixStatistics {
    pub user_id: UserId,
    /// Active positions within the window
    pub active_positions: u64,
    /// Per-level fill, levels 1 through the window depth
    pub levels: Vec<LevelFill>,
    /// Capacity minus active positions
    pub available_positions: u64,
    /// Percentage filled, two decimals
    pub completion_percentage: f64,
}

/// Members and slots at one level of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelFill {
    pub level: u8,
    pub members: usize,
    pub capacity: u64,
}

/// Walks the matrix below a participant.
pub struct NetworkTraversal<'a, S: ?Sized> {
    store: &'a S,
    config: EngineConfig,
}

impl<'a, S> NetworkTraversal<'a, S>
where
    S: PositionStore + ParticipantDirectory + ?Sized,
{
    pub fn new(store: &'a S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Visit active positions below `root` in breadth-first order, down to
    /// `max_level` levels. The callback gets each position and its depth.
    fn walk<F>(&self, root: UserId, max_level: u8, mut visit: F) -> Result<()>
    where
        F: FnMut(&MatrixPosition, u8),
    {
        let mut visited = HashSet::from([root]);
        let mut queue = VecDeque::from([(root, 0u8)]);

        while let Some((user, depth)) = queue.pop_front() {
            if depth >= max_level {
                continue;
            }
            for child in self.store.active_children(user)? {
                if !visited.insert(child.user_id) {
                    return Err(Error::CycleDetected(child.user_id));
                }
                visit(&child, depth + 1);
                queue.push_back((child.user_id, depth + 1));
            }
        }
        Ok(())
    }

    /// Build the view below `root`, capped at the matrix depth.
    pub fn build_matrix_view(&self, root: UserId, max_level: u8) -> Result<MatrixTree> {
        let max_level = max_level.min(self.config.window_depth);
        let root_position = self.store.position_of(root)?;

        let mut nodes = vec![MatrixNode {
            user_id: root,
            position_id: root_position.as_ref().map(|p| p.id),
            level: 0,
            position: 0,
            placement_type: root_position.as_ref().map(|p| p.placement_type),
            children: Vec::new(),
        }];
        let mut index_of: BTreeMap<UserId, usize> = BTreeMap::from([(root, 0)]);

        self.walk(root, max_level, |child, depth| {
            let index = nodes.len();
            nodes.push(MatrixNode {
                user_id: child.user_id,
                position_id: Some(child.id),
                level: depth,
                position: child.position,
                placement_type: Some(child.placement_type),
                children: Vec::new(),
            });
            // Parents are always visited before their children.
            if let Some(&parent) = index_of.get(&child.sponsor_id) {
                nodes[parent].children.push(index);
            }
            index_of.insert(child.user_id, index);
        })?;

        Ok(MatrixTree {
            root,
            max_level,
            nodes,
        })
    }

    /// Active positions per level below `user`, levels 1..=max_level.
    /// Levels past the matrix depth are not reported.
    pub fn calculate_downline_counts(&self, user: UserId, max_level: u8) -> Result<BTreeMap<u8, usize>> {
        let max_level = max_level.min(MATRIX_DEPTH);
        let mut counts: BTreeMap<u8, usize> = (1..=max_level).map(|l| (l, 0)).collect();
        self.walk(user, max_level, |_, depth| {
            *counts.entry(depth).or_default() += 1;
        })?;
        Ok(counts)
    }

    /// Sum of commission-eligible investments made by the downline.
    pub fn downline_volume(&self, user: UserId, max_level: u8) -> Result<Money> {
        let max_level = max_level.min(MATRIX_DEPTH);
        let mut members = Vec::new();
        self.walk(user, max_level, |child, _| members.push(child.user_id))?;

        let mut volume = Money::ZERO;
        for member in members {
            for investment in self.store.investments_of(member)? {
                if investment.status.is_eligible() {
                    volume = volume.saturating_add(investment.amount);
                }
            }
        }
        Ok(volume)
    }

    /// Fill state of the window below `user`.
    pub fn matrix_statistics(&self, user: UserId) -> Result<MatrixStatistics> {
        let depth = self.config.window_depth;
        let levels: Vec<LevelFill> = self
            .calculate_downline_counts(user, depth)?
            .into_iter()
            .map(|(level, members)| LevelFill {
                level,
                members,
                capacity: slots_at_level(level),
            })
            .collect();
        let active_positions: u64 = levels.iter().map(|l| l.members as u64).sum();
        let capacity = matrix_capacity(depth);

        Ok(MatrixStatistics {
            user_id: user,
            active_positions,
            levels,
            available_positions: capacity.saturating_sub(active_positions),
            completion_percentage: completion_percentage(active_positions, capacity),
        })
    }

    /// Recompute and store the participant's downline caches.
    pub fn refresh_participant_caches(&self, user: UserId) -> Result<Participant> {
        let mut participant = self
            .store
            .participant(user)?
            .ok_or(Error::UnknownParticipant(user))?;

        let counts = self.calculate_downline_counts(user, MATRIX_DEPTH)?;
        participant.downline_count = counts.values().map(|&c| c as u64).sum();
        participant.downline_volume = self.downline_volume(user, MATRIX_DEPTH)?;
        self.store.put_participant(&participant)?;

        tracing::debug!(
            "Refreshed caches for {}: {} members, volume {}",
            user,
            participant.downline_count,
            participant.downline_volume
        );
        Ok(participant)
    }
}

fn completion_percentage(active: u64, capacity: u64) -> f64 {
    if capacity == 0 {
        return 0.0;
    }
    let pct = active as f64 / capacity as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{Investment, InvestmentStatus};
    use crate::placement::MatrixPlacementEngine;
    use crate::store::MemoryStore;
    use trellis_matrix::InvestmentId;

    /// Root 1 with `count` members placed by spillover under it.
    fn network(count: u64) -> MemoryStore {
        let store = MemoryStore::new();
        for id in 1..=count + 1 {
            store.put_participant(&Participant::new(UserId(id))).unwrap();
        }
        let clock = ManualClock::new(0);
        let engine = MatrixPlacementEngine::new(&store, &clock, EngineConfig::default());
        for id in 2..=count + 1 {
            engine.find_or_create_position(UserId(1), UserId(id)).unwrap();
        }
        store
    }

    fn traversal(store: &MemoryStore) -> NetworkTraversal<'_, MemoryStore> {
        NetworkTraversal::new(store, EngineConfig::default())
    }

    #[test]
    fn view_of_full_window() {
        let store = network(39);
        let tree = traversal(&store).build_matrix_view(UserId(1), 3).unwrap();

        assert_eq!(tree.member_count(), 39);
        assert_eq!(tree.root_node().position_id, None);
        assert_eq!(tree.root_node().children.len(), 3);
        assert_eq!(tree.level_counts(), BTreeMap::from([(1, 3), (2, 9), (3, 27)]));
        for node in tree.nodes.iter().skip(1) {
            assert!(node.children.len() <= 3);
        }
    }

    #[test]
    fn view_is_capped_at_window_depth() {
        // Build a chain five deep by sponsoring each member under the last.
        let store = MemoryStore::new();
        for id in 1..=6 {
            store.put_participant(&Participant::new(UserId(id))).unwrap();
        }
        let clock = ManualClock::new(0);
        let engine = MatrixPlacementEngine::new(&store, &clock, EngineConfig::default());
        for id in 2..=6 {
            engine.find_or_create_position(UserId(id - 1), UserId(id)).unwrap();
        }

        let tree = traversal(&store).build_matrix_view(UserId(1), 10).unwrap();
        assert_eq!(tree.max_level, 3);
        assert_eq!(tree.member_count(), 3);
        assert!(!tree.contains(UserId(5)));

        // A view rooted mid-chain sees the same sliding window.
        let tree = traversal(&store).build_matrix_view(UserId(3), 3).unwrap();
        assert!(tree.root_node().position_id.is_some());
        assert_eq!(tree.level_counts(), BTreeMap::from([(1, 1), (2, 1), (3, 1)]));
    }

    #[test]
    fn children_follow_slot_order() {
        let store = network(3);
        let tree = traversal(&store).build_matrix_view(UserId(1), 1).unwrap();
        let slots: Vec<u8> = tree.children(0).map(|n| n.position).collect();
        assert_eq!(slots, vec![1, 2, 3]);
    }

    #[test]
    fn downline_counts_per_level() {
        let store = network(14);
        let counts = traversal(&store).calculate_downline_counts(UserId(1), 3).unwrap();
        assert_eq!(counts, BTreeMap::from([(1, 3), (2, 9), (3, 2)]));

        let shallow = traversal(&store).calculate_downline_counts(UserId(1), 1).unwrap();
        assert_eq!(shallow, BTreeMap::from([(1, 3)]));

        let deep = traversal(&store).calculate_downline_counts(UserId(1), u8::MAX).unwrap();
        assert_eq!(deep, counts);
    }

    #[test]
    fn statistics_of_partial_window() {
        let store = network(13);
        let stats = traversal(&store).matrix_statistics(UserId(1)).unwrap();
        assert_eq!(stats.active_positions, 13);
        assert_eq!(stats.available_positions, 26);
        assert_eq!(stats.completion_percentage, 33.33);
        let members: Vec<_> = stats.levels.iter().map(|l| (l.level, l.members, l.capacity)).collect();
        assert_eq!(members, vec![(1, 3, 3), (2, 9, 9), (3, 1, 27)]);

        let empty = traversal(&store).matrix_statistics(UserId(14)).unwrap();
        assert_eq!(empty.active_positions, 0);
        assert_eq!(empty.available_positions, 39);
        assert_eq!(empty.completion_percentage, 0.0);
    }

    #[test]
    fn volume_counts_only_eligible_investments() {
        let store = network(4);
        let statuses = [
            (2, 1_000, InvestmentStatus::Active),
            (3, 2_500, InvestmentStatus::Paid),
            (4, 9_999, InvestmentStatus::Pending),
            (1, 5_000, InvestmentStatus::Active),
        ];
        for (i, (user, major, status)) in statuses.into_iter().enumerate() {
            store
                .put_investment(&Investment::new(InvestmentId(i as u64), UserId(user), Money::from_major(major), status))
                .unwrap();
        }

        let volume = traversal(&store).downline_volume(UserId(1), 3).unwrap();
        assert_eq!(volume, Money::from_major(3_500));
    }

    #[test]
    fn refresh_writes_caches() {
        let store = network(5);
        store
            .put_investment(&Investment::new(InvestmentId(1), UserId(6), Money::from_major(800), InvestmentStatus::Active))
            .unwrap();

        let refreshed = traversal(&store).refresh_participant_caches(UserId(1)).unwrap();
        assert_eq!(refreshed.downline_count, 5);
        assert_eq!(refreshed.downline_volume, Money::from_major(800));
        assert_eq!(store.participant(UserId(1)).unwrap(), Some(refreshed));

        assert!(matches!(
            traversal(&store).refresh_participant_caches(UserId(99)),
            Err(Error::UnknownParticipant(_))
        ));
    }

    #[test]
    fn capacity_percentage_rounding() {
        assert_eq!(completion_percentage(39, 39), 100.0);
        assert_eq!(completion_percentage(1, 3), 33.33);
        assert_eq!(completion_percentage(2, 3), 66.67);
        assert_eq!(completion_percentage(5, 0), 0.0);
    }
}
