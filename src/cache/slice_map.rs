//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Mailcache.
//
// Mailcache is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailcache is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along
// with Mailcache. If not, see <http://www.gnu.org/licenses/>.

//! The per-mailbox mapping from message UID to cache slice.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::cache::model::{FingerprintToken, SliceNumber, Uid};

/// The persisted image of a `SliceMap`.
///
/// Stored under the mailbox's reserved `slicemap` key, uncompressed and
/// unsliced.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct SliceMapImage {
    /// The number of slice positions ever allocated.
    #[serde(rename = "n")]
    pub counter: u32,
    /// UID to slice number.
    #[serde(rename = "m")]
    pub assignments: BTreeMap<u32, u32>,
    /// The fingerprint the mailbox had when its cache was last written.
    #[serde(rename = "f")]
    pub fingerprint: Option<FingerprintToken>,
}

/// The live UID-to-slice assignment table for one mailbox.
///
/// Assignment is append-only: once a UID has a slice it keeps it until the
/// assignment is explicitly forgotten, and unrelated assignments are never
/// renumbered. The counter only grows, so the slice currently being filled
/// is always the highest ever allocated, even after deletions.
pub struct SliceMap {
    counter: u32,
    assignments: HashMap<Uid, SliceNumber>,
    slice_size: u32,
    dirty: bool,
}

impl SliceMap {
    pub fn new(slice_size: u32) -> Self {
        SliceMap {
            counter: 0,
            assignments: HashMap::new(),
            slice_size: slice_size.max(1),
            dirty: false,
        }
    }

    /// Rebuild a map from its persisted image.
    pub fn from_image(image: &SliceMapImage, slice_size: u32) -> Self {
        let mut map = SliceMap::new(slice_size);
        map.counter = image.counter;
        map.assignments = image
            .assignments
            .iter()
            .filter_map(|(&uid, &slice)| {
                Uid::of(uid).map(|u| (u, SliceNumber(slice)))
            })
            .collect();
        map
    }

    pub fn to_image(
        &self,
        fingerprint: Option<FingerprintToken>,
    ) -> SliceMapImage {
        SliceMapImage {
            counter: self.counter,
            assignments: self
                .assignments
                .iter()
                .map(|(&uid, &slice)| (uid.into(), slice.0))
                .collect(),
            fingerprint,
        }
    }

    /// The slice `uid` is assigned to, allocating the next position if it
    /// has none yet.
    ///
    /// Allocation order is the order UIDs are first stored, which is
    /// normally arrival order but not guaranteed to be.
    pub fn slice_for(&mut self, uid: Uid) -> SliceNumber {
        if let Some(&slice) = self.assignments.get(&uid) {
            return slice;
        }

        let slice = SliceNumber(self.counter / self.slice_size);
        self.counter += 1;
        self.assignments.insert(uid, slice);
        self.dirty = true;
        slice
    }

    /// The slice `uid` is assigned to, without allocating.
    pub fn peek(&self, uid: Uid) -> Option<SliceNumber> {
        self.assignments.get(&uid).copied()
    }

    /// The set of physical slices that must be read to load `uids`.
    ///
    /// Unassigned UIDs are projected onto the slices they would be
    /// allocated to, without committing the allocation. Loading those
    /// slices up front means a flush that later does allocate them can
    /// never rewrite a slice whose existing records were never read.
    pub fn slices_touched_by(&self, uids: &[Uid]) -> BTreeSet<SliceNumber> {
        let mut touched = BTreeSet::new();
        let mut projected = self.counter;
        for uid in uids {
            match self.assignments.get(uid) {
                Some(&slice) => {
                    touched.insert(slice);
                },
                None => {
                    touched
                        .insert(SliceNumber(projected / self.slice_size));
                    projected += 1;
                },
            }
        }

        touched
    }

    /// Remove the assignment for `uid`, if any.
    ///
    /// Other assignments are not renumbered, and the vacated position is
    /// not returned to a free pool.
    pub fn forget(&mut self, uid: Uid) -> bool {
        let removed = self.assignments.remove(&uid).is_some();
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// All UIDs currently assigned to `slice`, ascending.
    pub fn uids_in(&self, slice: SliceNumber) -> Vec<Uid> {
        let mut uids: Vec<Uid> = self
            .assignments
            .iter()
            .filter(|&(_, &s)| s == slice)
            .map(|(&uid, _)| uid)
            .collect();
        uids.sort();
        uids
    }

    /// All distinct slices with at least one assignment.
    pub fn slices(&self) -> BTreeSet<SliceNumber> {
        self.assignments.values().copied().collect()
    }

    /// The slice currently being filled, if any position was ever
    /// allocated. This slice is exempt from compaction.
    pub fn newest_slice(&self) -> Option<SliceNumber> {
        if 0 == self.counter {
            None
        } else {
            Some(SliceNumber((self.counter - 1) / self.slice_size))
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}
