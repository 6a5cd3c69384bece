// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Voice pool bookkeeping for the control domain.
//!
//! Every slot is always in exactly one of Available, Playing or Releasing. Reservation
//! prefers a free slot, then a releasing one, then a playing one, so a full pool always
//! yields a voice instead of dropping the note.

use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

mod strategy;

pub use strategy::{Candidate, OldestFirst, QuietestFirst, StealStrategy};

/// Identifies one voice slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct VoiceId(usize);

impl VoiceId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Available,
    Playing,
    Releasing,
}

/// The result of a successful `reserve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub id: VoiceId,
    /// The state the voice was taken from, if it had to be stolen.
    pub stolen: Option<SlotState>,
}

/// Number of slots in each state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolCounts {
    pub available: usize,
    pub playing: usize,
    pub releasing: usize,
}

impl PoolCounts {
    pub fn total(&self) -> usize {
        self.available + self.playing + self.releasing
    }
}

#[derive(Debug)]
struct Slot {
    id: VoiceId,
    state: SlotState,
    allocated_at: u64,
    gain_hint: f32,
}

impl Slot {
    fn new(id: VoiceId) -> Self {
        Self {
            id,
            state: SlotState::Available,
            allocated_at: 0,
            gain_hint: 0.0,
        }
    }

    fn candidate(&self) -> Candidate {
        Candidate {
            id: self.id,
            allocated_at: self.allocated_at,
            gain_hint: self.gain_hint,
        }
    }
}

/// Assigns voices to notes and steals them when the pool runs out.
#[derive(Debug)]
pub struct VoiceAllocator {
    slots: Vec<Slot>,
    sequence: u64,
    strategy: Box<dyn StealStrategy>,
}

impl VoiceAllocator {
    /// Creates a pool of `size` voices with ids `0..size`, stealing oldest first.
    pub fn new(size: usize) -> Self {
        Self::with_strategy(size, Box::new(OldestFirst))
    }

    pub fn with_strategy(size: usize, strategy: Box<dyn StealStrategy>) -> Self {
        Self {
            slots: (0..size).map(|index| Slot::new(VoiceId::new(index))).collect(),
            sequence: 0,
            strategy,
        }
    }

    /// Reserves a voice and marks it Playing. Only returns `None` for an empty pool.
    pub fn reserve(&mut self) -> Option<Reservation> {
        let Some((id, from)) = [SlotState::Available, SlotState::Releasing, SlotState::Playing]
            .into_iter()
            .find_map(|state| self.pick(state).map(|id| (id, state)))
        else {
            debug!(voices = self.slots.len(), "No voice available");
            return None;
        };

        self.sequence += 1;
        let sequence = self.sequence;
        let slot = self.slot_mut(id)?;
        slot.state = SlotState::Playing;
        slot.allocated_at = sequence;

        let stolen = (from != SlotState::Available).then_some(from);
        if let Some(state) = stolen {
            debug!(voice = %id, from = ?state, "Stealing voice");
        }
        self.check();
        Some(Reservation { id, stolen })
    }

    /// Moves a Playing voice to Releasing.
    pub fn release(&mut self, id: VoiceId) -> bool {
        let Some(slot) = self.slot_mut(id) else {
            warn!(voice = %id, "Release of unknown voice");
            return false;
        };
        if slot.state != SlotState::Playing {
            warn!(voice = %id, state = ?slot.state, "Release of a voice that is not playing");
            return false;
        }
        slot.state = SlotState::Releasing;
        self.check();
        true
    }

    /// Returns a voice to Available. Stopping an available voice changes nothing.
    pub fn stop(&mut self, id: VoiceId) -> bool {
        let Some(slot) = self.slot_mut(id) else {
            warn!(voice = %id, "Stop of unknown voice");
            return false;
        };
        slot.state = SlotState::Available;
        self.check();
        true
    }

    /// Adds a new Available slot. Rejects ids already in the pool.
    pub fn add(&mut self, id: VoiceId) -> bool {
        if self.slot(id).is_some() {
            warn!(voice = %id, "Voice already in pool");
            return false;
        }
        self.slots.push(Slot::new(id));
        self.check();
        true
    }

    /// Removes a slot, whatever state it is in.
    pub fn remove(&mut self, id: VoiceId) -> bool {
        let Some(index) = self.slots.iter().position(|slot| slot.id == id) else {
            return false;
        };
        self.slots.remove(index);
        self.check();
        true
    }

    pub fn state_of(&self, id: VoiceId) -> Option<SlotState> {
        self.slot(id).map(|slot| slot.state)
    }

    /// Records the loudness of a voice for quietest-first stealing.
    pub fn set_gain_hint(&mut self, id: VoiceId, gain_hint: f32) {
        if let Some(slot) = self.slot_mut(id) {
            slot.gain_hint = gain_hint;
        }
    }

    pub fn counts(&self) -> PoolCounts {
        let mut counts = PoolCounts::default();
        for slot in &self.slots {
            match slot.state {
                SlotState::Available => counts.available += 1,
                SlotState::Playing => counts.playing += 1,
                SlotState::Releasing => counts.releasing += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Ids of all Playing or Releasing voices, in pool order.
    pub fn active_ids(&self) -> impl Iterator<Item = VoiceId> + '_ {
        self.slots
            .iter()
            .filter(|slot| slot.state != SlotState::Available)
            .map(|slot| slot.id)
    }

    /// Returns true if every id is unique and the state counts cover the pool.
    pub fn is_consistent(&self) -> bool {
        let mut ids: Vec<VoiceId> = self.slots.iter().map(|slot| slot.id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len() == self.slots.len() && self.counts().total() == self.slots.len()
    }

    fn pick(&self, state: SlotState) -> Option<VoiceId> {
        let candidates: Vec<Candidate> = self
            .slots
            .iter()
            .filter(|slot| slot.state == state)
            .map(Slot::candidate)
            .collect();
        match state {
            // Free voices are handed out least recently used first.
            SlotState::Available => OldestFirst.choose(&candidates),
            _ => self.strategy.choose(&candidates),
        }
    }

    fn slot(&self, id: VoiceId) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.id == id)
    }

    fn slot_mut(&mut self, id: VoiceId) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|slot| slot.id == id)
    }

    fn check(&self) {
        debug_assert!(self.is_consistent(), "voice pool partition broken");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_prefers_available() {
        let mut allocator = VoiceAllocator::new(3);
        let first = allocator.reserve().unwrap();
        assert_eq!(first.stolen, None);
        assert_eq!(allocator.state_of(first.id), Some(SlotState::Playing));
        assert_eq!(
            allocator.counts(),
            PoolCounts {
                available: 2,
                playing: 1,
                releasing: 0
            }
        );
    }

    #[test]
    fn test_steals_oldest_playing() {
        let mut allocator = VoiceAllocator::new(2);
        let a = allocator.reserve().unwrap().id;
        let b = allocator.reserve().unwrap().id;

        let third = allocator.reserve().unwrap();
        assert_eq!(third.id, a);
        assert_eq!(third.stolen, Some(SlotState::Playing));

        // The stolen voice got a fresh sequence, so B is now the oldest.
        let fourth = allocator.reserve().unwrap();
        assert_eq!(fourth.id, b);
    }

    #[test]
    fn test_steals_releasing_before_playing() {
        let mut allocator = VoiceAllocator::new(2);
        let a = allocator.reserve().unwrap().id;
        let b = allocator.reserve().unwrap().id;
        assert!(allocator.release(b));

        let reservation = allocator.reserve().unwrap();
        assert_eq!(reservation.id, b);
        assert_eq!(reservation.stolen, Some(SlotState::Releasing));
        assert_eq!(allocator.state_of(a), Some(SlotState::Playing));
    }

    #[test]
    fn test_empty_pool() {
        let mut allocator = VoiceAllocator::new(0);
        assert!(allocator.is_empty());
        assert_eq!(allocator.reserve(), None);
    }

    #[test]
    fn test_release_requires_playing() {
        let mut allocator = VoiceAllocator::new(1);
        let id = VoiceId::new(0);
        assert!(!allocator.release(id));

        allocator.reserve().unwrap();
        assert!(allocator.release(id));
        assert!(!allocator.release(id));
        assert!(!allocator.release(VoiceId::new(7)));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut allocator = VoiceAllocator::new(1);
        let id = allocator.reserve().unwrap().id;
        assert!(allocator.stop(id));
        assert!(allocator.stop(id));
        assert_eq!(allocator.state_of(id), Some(SlotState::Available));
        assert!(!allocator.stop(VoiceId::new(4)));
    }

    #[test]
    fn test_add_and_remove() {
        let mut allocator = VoiceAllocator::new(1);
        assert!(!allocator.add(VoiceId::new(0)));
        assert!(allocator.add(VoiceId::new(5)));
        assert_eq!(allocator.len(), 2);

        let id = allocator.reserve().unwrap().id;
        assert!(allocator.remove(id));
        assert!(!allocator.remove(id));
        assert_eq!(allocator.len(), 1);
        assert!(allocator.is_consistent());
    }

    #[test]
    fn test_quietest_first() {
        let mut allocator = VoiceAllocator::with_strategy(3, Box::new(QuietestFirst));
        let ids: Vec<VoiceId> = (0..3).map(|_| allocator.reserve().unwrap().id).collect();
        allocator.set_gain_hint(ids[0], 0.8);
        allocator.set_gain_hint(ids[1], 0.1);
        allocator.set_gain_hint(ids[2], 0.5);

        assert_eq!(allocator.reserve().unwrap().id, ids[1]);
    }

    #[test]
    fn test_partition_holds_under_random_operations() {
        let mut allocator = VoiceAllocator::new(8);
        // Small LCG so the sequence is reproducible.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as usize
        };

        for _ in 0..10_000 {
            let id = VoiceId::new(next() % 10);
            match next() % 5 {
                0 | 1 => {
                    allocator.reserve();
                }
                2 => {
                    allocator.release(id);
                }
                3 => {
                    allocator.stop(id);
                }
                _ => {
                    if !allocator.remove(id) {
                        allocator.add(id);
                    }
                }
            }
            assert!(allocator.is_consistent());
            assert_eq!(allocator.counts().total(), allocator.len());
        }
    }

    #[test]
    fn test_active_ids() {
        let mut allocator = VoiceAllocator::new(3);
        let a = allocator.reserve().unwrap().id;
        let b = allocator.reserve().unwrap().id;
        allocator.release(b);
        let active: Vec<VoiceId> = allocator.active_ids().collect();
        assert_eq!(active, vec![a, b]);
        assert_eq!(VoiceId::new(2).to_string(), "voice 2");
    }
}
