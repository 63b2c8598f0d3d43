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

use std::collections::BTreeSet;

use super::defs::MessageCache;
use crate::cache::model::{MessageFlags, Uid};
use crate::cache::slice_map::SliceMap;

impl MessageCache {
    /// Update the cache's belief about flag state for `uids`.
    ///
    /// This issues no transport call; sending the actual STORE to the
    /// server is the caller's responsibility. Only records already cached
    /// are touched, and only records whose flags actually change become
    /// dirty. The next retrieve fetches fresh state for anything else.
    pub fn update_flags(
        &mut self,
        mailbox: &str,
        uids: &[Uid],
        flags: MessageFlags,
        set: bool,
    ) {
        if uids.is_empty() || flags.is_empty() {
            return;
        }

        self.prepare_mailbox(mailbox);
        self.load_uids(mailbox, uids);

        let entry = match self.mailboxes.get_mut(mailbox) {
            Some(entry) => entry,
            None => return,
        };
        for &uid in uids {
            let overview = match entry
                .records
                .get_mut(&uid)
                .and_then(|record| record.overview.as_mut())
            {
                Some(overview) => overview,
                None => continue,
            };

            let updated = if set {
                overview.flags | flags
            } else {
                overview.flags - flags
            };
            if updated != overview.flags {
                overview.flags = updated;
                entry.dirty.insert(uid);
            }
        }
    }

    /// Remove `uids` from the cache and from the slice map.
    ///
    /// Slices (other than the one currently being filled) left holding
    /// fewer live records than the compaction threshold are dissolved:
    /// their survivors are re-marked dirty so the flush re-homes them at
    /// the allocation tail, and the emptied slice is expired instead of
    /// rewritten. Assignments of untouched UIDs never move.
    pub fn delete_records(&mut self, mailbox: &str, uids: &[Uid]) {
        if uids.is_empty() {
            return;
        }

        self.prepare_mailbox(mailbox);
        // Decode the affected slices now so that compaction survivors are
        // in memory and can be re-homed at flush time.
        self.load_uids(mailbox, uids);

        let threshold = self.config.compaction_threshold;
        let entry = match self.mailboxes.get_mut(mailbox) {
            Some(entry) => entry,
            None => return,
        };

        let mut touched = BTreeSet::new();
        for &uid in uids {
            entry.records.remove(&uid);
            entry.dirty.remove(&uid);
            if let Some(slice) = entry.slice_map.peek(uid) {
                entry.slice_map.forget(uid);
                touched.insert(slice);
            }
        }

        let newest = entry.slice_map.newest_slice();
        for slice in touched {
            entry.dirty_slices.insert(slice);
            if Some(slice) == newest {
                // The slice still being filled will reach a normal size
                // on its own; leave it alone.
                continue;
            }

            let survivors = entry.slice_map.uids_in(slice);
            if survivors.len() < threshold {
                for uid in survivors {
                    entry.slice_map.forget(uid);
                    entry.dirty.insert(uid);
                }
            }
        }
    }

    /// Discard all cached data for `mailbox`, persisted and in-memory.
    ///
    /// Used when the mailbox is deleted or renamed out from under its
    /// cached identity.
    pub fn drop_mailbox(&mut self, mailbox: &str) {
        let slice_map = match self.mailboxes.remove(mailbox) {
            Some(entry) => entry.slice_map,
            None => match self.meta.load_slice_map(mailbox) {
                Some(image) => {
                    SliceMap::from_image(&image, self.config.slice_size)
                },
                None => SliceMap::new(self.config.slice_size),
            },
        };

        for slice in slice_map.slices() {
            self.meta.expire_slice(mailbox, slice);
        }
        self.meta.expire_slice_map(mailbox);
        self.fingerprints.forget(mailbox);
    }
}
