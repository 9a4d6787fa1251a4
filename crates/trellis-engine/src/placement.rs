//! Matrix placement with breadth-first spillover.
//!
//! A new participant goes directly under their sponsor while the sponsor has
//! a free slot. Once all three slots are taken the participant spills over
//! into the sponsor's own subtree: positions are visited level by level,
//! slot by slot, and the first one with a free slot receives the newcomer.
//!
//! ```text
//!               S
//!       ┌───────┼───────┐
//!       A       B       C        level 1: full
//!     ┌─┼─┐   ┌─┼─┐   ┌─┼─┐
//!     a a a   b b ·   · · ·      level 2: first free slot is under B
//! ```
//!
//! The search never leaves the window of `window_depth` levels below the
//! sponsor. If that window is full the placement fails with
//! [`Error::NoCapacityWithinWindow`] and the caller decides what happens next.
//!
//! Slot claims go through [`PositionStore::insert_position`], which rejects a
//! second writer for the same `(sponsor, level, position)`. A lost race is
//! retried with a fresh read of slot occupancy.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::model::{MatrixPosition, NewPosition, PlacementType};
use crate::store::{InsertOutcome, ParticipantDirectory, PositionStore};
use std::collections::{HashSet, VecDeque};
use trellis_matrix::{UserId, MATRIX_WIDTH};

/// Outcome of [`MatrixPlacementEngine::find_or_create_position`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// A new position was written.
    Created(MatrixPosition),
    /// The user was already placed; nothing was written.
    AlreadyPlaced(MatrixPosition),
}

impl Placement {
    pub fn position(&self) -> &MatrixPosition {
        match self {
            Placement::Created(p) | Placement::AlreadyPlaced(p) => p,
        }
    }

    pub fn into_position(self) -> MatrixPosition {
        match self {
            Placement::Created(p) | Placement::AlreadyPlaced(p) => p,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Placement::Created(_))
    }
}

/// A free slot chosen by the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotChoice {
    parent: UserId,
    level: u32,
    position: u8,
    placement_type: PlacementType,
}

/// Finds or creates matrix positions. Holds no state between calls.
pub struct MatrixPlacementEngine<'a, S: ?Sized> {
    store: &'a S,
    clock: &'a dyn Clock,
    config: EngineConfig,
}

impl<'a, S> MatrixPlacementEngine<'a, S>
where
    S: PositionStore + ParticipantDirectory + ?Sized,
{
    pub fn new(store: &'a S, clock: &'a dyn Clock, config: EngineConfig) -> Self {
        Self { store, clock, config }
    }

    /// Place `new_user` under `sponsor`, or return the existing position.
    pub fn find_or_create_position(&self, sponsor: UserId, new_user: UserId) -> Result<Placement> {
        if let Some(existing) = self.store.position_of(new_user)? {
            tracing::debug!("{} already placed at {}", new_user, existing.id);
            return Ok(Placement::AlreadyPlaced(existing));
        }

        let sponsor_level = self.validate(sponsor, new_user)?;
        let attempts = self.config.placement_attempts();

        for attempt in 1..=attempts {
            let slot = self.select_slot(sponsor, sponsor_level)?;
            self.guard_cycle(sponsor, slot.parent, new_user)?;

            let claim = NewPosition {
                user_id: new_user,
                sponsor_id: slot.parent,
                level: slot.level,
                position: slot.position,
                placement_type: slot.placement_type,
                spillover_from_id: match slot.placement_type {
                    PlacementType::Direct => None,
                    PlacementType::Spillover => Some(sponsor),
                },
                placed_at: self.clock.now_millis(),
            };

            match self.store.insert_position(claim)? {
                InsertOutcome::Inserted(position) => {
                    tracing::info!(
                        "Placed {} under {} (level {}, slot {}, {:?})",
                        new_user,
                        position.sponsor_id,
                        position.level,
                        position.position,
                        position.placement_type
                    );
                    return Ok(Placement::Created(position));
                }
                InsertOutcome::UserAlreadyPlaced(existing) => {
                    tracing::debug!("{} placed concurrently at {}", new_user, existing.id);
                    return Ok(Placement::AlreadyPlaced(existing));
                }
                InsertOutcome::SlotTaken => {
                    tracing::warn!(
                        "Slot {} under {} taken concurrently (attempt {}/{})",
                        slot.position,
                        slot.parent,
                        attempt,
                        attempts
                    );
                }
            }
        }

        Err(Error::TransactionConflict { attempts })
    }

    /// Soft-disable a user's position, freeing its slot.
    pub fn deactivate_position(&self, user: UserId) -> Result<Option<MatrixPosition>> {
        let removed = self.store.deactivate_position(user)?;
        if let Some(position) = &removed {
            tracing::info!("Deactivated {} ({})", user, position.id);
        }
        Ok(removed)
    }

    /// Check both parties and return the sponsor's absolute level.
    fn validate(&self, sponsor: UserId, new_user: UserId) -> Result<u32> {
        let Some(joining) = self.store.participant(new_user)? else {
            return Err(Error::UnknownParticipant(new_user));
        };
        // Deactivation is final. A user who left is never placed again.
        if !joining.is_active || self.store.latest_position_of(new_user)?.is_some() {
            return Err(Error::ParticipantInactive(new_user));
        }
        if sponsor == new_user {
            return Err(Error::InvalidSponsor {
                sponsor,
                reason: "a participant cannot sponsor themselves",
            });
        }

        let Some(participant) = self.store.participant(sponsor)? else {
            return Err(Error::InvalidSponsor {
                sponsor,
                reason: "not a registered participant",
            });
        };
        if !participant.is_active {
            return Err(Error::SponsorInactive(sponsor));
        }

        match self.store.position_of(sponsor)? {
            Some(position) => Ok(position.level),
            // A sponsor whose only position was deactivated has left the network.
            None if self.store.latest_position_of(sponsor)?.is_some() => {
                Err(Error::SponsorInactive(sponsor))
            }
            // Unplaced sponsors are roots.
            None => Ok(0),
        }
    }

    /// Direct slot if the sponsor has one, otherwise breadth-first spillover.
    fn select_slot(&self, sponsor: UserId, sponsor_level: u32) -> Result<SlotChoice> {
        let children = self.store.active_children(sponsor)?;
        if let Some(position) = first_free_slot(&children) {
            return Ok(SlotChoice {
                parent: sponsor,
                level: sponsor_level + 1,
                position,
                placement_type: PlacementType::Direct,
            });
        }

        let max_depth = self.config.window_depth;
        let mut visited = HashSet::from([sponsor]);
        let mut queue: VecDeque<(MatrixPosition, u8)> = VecDeque::new();
        if max_depth > 1 {
            queue.extend(children.into_iter().map(|child| (child, 1)));
        }

        // Every queued node sits at depth < max_depth, so its new child stays
        // inside the window.
        while let Some((node, depth)) = queue.pop_front() {
            if !visited.insert(node.user_id) {
                return Err(Error::CycleDetected(node.user_id));
            }

            let grandchildren = self.store.active_children(node.user_id)?;
            if let Some(position) = first_free_slot(&grandchildren) {
                tracing::debug!(
                    "Spillover for {} lands under {} at depth {}",
                    sponsor,
                    node.user_id,
                    depth + 1
                );
                return Ok(SlotChoice {
                    parent: node.user_id,
                    level: node.level + 1,
                    position,
                    placement_type: PlacementType::Spillover,
                });
            }

            if depth + 1 < max_depth {
                queue.extend(grandchildren.into_iter().map(|child| (child, depth + 1)));
            }
        }

        Err(Error::NoCapacityWithinWindow {
            sponsor,
            depth: max_depth,
        })
    }

    /// Refuse a parent whose ancestor chain contains the new user.
    fn guard_cycle(&self, sponsor: UserId, parent: UserId, new_user: UserId) -> Result<()> {
        let mut visited = HashSet::new();
        let mut current = parent;
        loop {
            if current == new_user {
                return Err(Error::InvalidSponsor {
                    sponsor,
                    reason: "placement would create a cycle",
                });
            }
            if !visited.insert(current) {
                return Err(Error::CycleDetected(current));
            }
            // Deactivated links still count, as the commission climb walks them.
            let link = match self.store.position_of(current)? {
                Some(position) => Some(position),
                None => self.store.latest_position_of(current)?,
            };
            match link {
                Some(position) => current = position.sponsor_id,
                None => return Ok(()),
            }
        }
    }
}

/// Lowest slot number in 1..=3 not held by `children`.
fn first_free_slot(children: &[MatrixPosition]) -> Option<u8> {
    (1..=MATRIX_WIDTH).find(|slot| !children.iter().any(|c| c.position == *slot))
}
