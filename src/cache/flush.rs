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

use log::debug;

use super::defs::MessageCache;
use crate::cache::model::{MessageRecord, SliceNumber, Uid};

impl MessageCache {
    /// Persist everything this unit of work mutated.
    ///
    /// For each dirty mailbox: dirty UIDs are grouped by slice (allocating
    /// assignments for records that never had one), each touched slice is
    /// rewritten wholesale with the current validity epoch embedded,
    /// slices left without live records are expired instead of saved, and
    /// the slice map is saved once. A slice whose write fails is logged
    /// and skipped; it does not block its siblings.
    ///
    /// The unit-of-work owner calls this at its natural end. Dropping the
    /// session runs the same path as a safety net, so an error exit still
    /// persists what it mutated; a unit of work that must abandon its
    /// work instead simply never reaches either path.
    pub fn flush(&mut self) {
        let mut mailboxes: Vec<String> = self
            .mailboxes
            .iter()
            .filter(|(_, entry)| entry.has_work())
            .map(|(mailbox, _)| mailbox.clone())
            .collect();
        mailboxes.sort();

        for mailbox in mailboxes {
            self.flush_mailbox(&mailbox);
        }
    }

    fn flush_mailbox(&mut self, mailbox: &str) {
        let fp = self.fingerprint(mailbox);

        let (epoch, touched) = {
            let entry = match self.mailboxes.get_mut(mailbox) {
                Some(entry) => entry,
                None => return,
            };

            let epoch = match entry.epoch {
                Some(epoch) => epoch,
                None => {
                    // The status query failed this unit of work, so
                    // anything written now would carry a fabricated
                    // epoch. Drop the writes; the next reader refetches.
                    debug!(
                        "{} Not saving {}: mailbox epoch unknown",
                        self.log_prefix, mailbox
                    );
                    entry.clear_work();
                    return;
                },
            };

            let mut touched = entry.dirty_slices.clone();
            let dirty: Vec<Uid> = entry.dirty.iter().copied().collect();
            for uid in dirty {
                if entry.records.contains_key(&uid) {
                    touched.insert(entry.slice_map.slice_for(uid));
                }
            }

            (epoch, touched)
        };

        let mut stored = 0u32;
        for slice in touched {
            if self.flush_slice(mailbox, slice, epoch) {
                stored += 1;
            }
        }

        let image = match self.mailboxes.get_mut(mailbox) {
            Some(entry) => {
                entry.clear_work();
                // The store now reflects this unit of work, so a renewed
                // session may serve slices again.
                entry.cold = false;
                entry.slice_map.to_image(fp.token())
            },
            None => return,
        };
        self.meta.save_slice_map(mailbox, &image);

        if stored > 0 {
            debug!(
                "{} Stored {} slice(s) of message data from {}",
                self.log_prefix, stored, mailbox
            );
        }
    }

    /// Rewrite one slice from the live records assigned to it, expiring
    /// it instead if nothing is left. Returns whether a write happened.
    fn flush_slice(
        &mut self,
        mailbox: &str,
        slice: SliceNumber,
        epoch: u64,
    ) -> bool {
        let (assigned, was_loaded) = {
            let entry = match self.mailboxes.get(mailbox) {
                Some(entry) => entry,
                None => return false,
            };
            (
                entry.slice_map.uids_in(slice),
                entry.loaded_slices.contains(&slice),
            )
        };

        if assigned.is_empty() {
            self.meta.expire_slice(mailbox, slice);
            return false;
        }

        // Records assigned here but never decoded this unit of work must
        // be carried over from the persisted slice, or the rewrite would
        // drop them.
        let persisted = if was_loaded {
            None
        } else {
            self.meta
                .load_slice(mailbox, slice)
                .filter(|&(slice_epoch, _)| slice_epoch == epoch)
                .map(|(_, records)| records)
        };

        let entry = match self.mailboxes.get(mailbox) {
            Some(entry) => entry,
            None => return false,
        };
        let mut content: Vec<(Uid, &MessageRecord)> =
            Vec::with_capacity(assigned.len());
        for uid in &assigned {
            if let Some(record) = entry.records.get(uid) {
                content.push((*uid, record));
            } else if let Some(record) =
                persisted.as_ref().and_then(|records| records.get(uid))
            {
                content.push((*uid, record));
            }
        }

        if content.is_empty() {
            self.meta.expire_slice(mailbox, slice);
            false
        } else {
            self.meta.save_slice(mailbox, slice, epoch, &content)
        }
    }
}

impl Drop for MessageCache {
    fn drop(&mut self) {
        if self.mailboxes.values().any(|entry| entry.has_work()) {
            self.flush();
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::test_prelude::*;

    #[test]
    fn dropping_the_session_flushes() {
        let setup = set_up();
        {
            let mut cache = setup.session();
            cache.retrieve(MBOX, &uid_range(1, 10), FieldSet::OVERVIEW);
            // No explicit flush.
        }

        setup.transport.reset_counts();
        {
            let mut cache = setup.session();
            let result =
                cache.retrieve(MBOX, &uid_range(1, 10), FieldSet::OVERVIEW);
            for uid in uid_range(1, 10) {
                assert!(result[&uid].is_some());
            }
        }
        assert_eq!(0, setup.transport.counts().overview_uids);
    }

    #[test]
    fn one_failing_slice_does_not_block_the_others() {
        let mut setup = set_up_with_store_and_messages(
            Arc::new(WriteFilterStore::rejecting(format!(
                "|{}|0",
                MBOX
            ))),
            6,
        );
        setup.config.slice_size = 3;

        {
            let mut cache = setup.session();
            cache.retrieve(MBOX, &uid_range(1, 6), FieldSet::OVERVIEW);
            cache.flush();
        }

        // Slice 0 never made it, slice 1 and the map did; only the first
        // three UIDs have to be refetched.
        setup.transport.reset_counts();
        {
            let mut cache = setup.session();
            let result =
                cache.retrieve(MBOX, &uid_range(1, 6), FieldSet::OVERVIEW);
            for uid in uid_range(1, 6) {
                assert!(result[&uid].is_some());
            }
        }
        assert_eq!(1, setup.transport.counts().overview_fetches);
        assert_eq!(3, setup.transport.counts().overview_uids);
    }

    #[test]
    fn flushing_twice_writes_nothing_new() {
        let setup = set_up();
        let mut cache = setup.session();
        cache.retrieve(MBOX, &uid_range(1, 10), FieldSet::OVERVIEW);
        cache.flush();

        // Remove the slice behind the cache's back; a redundant flush
        // must not resurrect it, since nothing is dirty any more.
        setup
            .store
            .expire(&slice_key(NAMESPACE, MBOX, 0))
            .unwrap();
        cache.flush();
        assert!(setup
            .store
            .get(&slice_key(NAMESPACE, MBOX, 0))
            .unwrap()
            .is_none());
    }

    #[test]
    fn rehomed_survivor_joins_unloaded_tail_slice() {
        let mut setup = set_up_with_messages(7);
        setup.config.slice_size = 3;

        {
            let mut cache = setup.session();
            cache.retrieve(MBOX, &uid_range(1, 7), FieldSet::OVERVIEW);
            cache.flush();
        }

        // Deleting UIDs 1 and 2 dissolves slice 0; its survivor (UID 3)
        // is re-homed into the tail slice, which this unit of work never
        // read. The rewrite must carry the tail's existing record (UID 7)
        // over from the store rather than dropping it.
        {
            let mut cache = setup.session();
            cache.delete_records(MBOX, &[Uid::u(1), Uid::u(2)]);
            cache.flush();
        }

        setup.transport.reset_counts();
        {
            let mut cache = setup.session();
            let result = cache.retrieve(
                MBOX,
                &[Uid::u(3), Uid::u(7)],
                FieldSet::OVERVIEW,
            );
            assert!(result[&Uid::u(3)].is_some());
            assert!(result[&Uid::u(7)].is_some());
        }
        assert_eq!(0, setup.transport.counts().overview_uids);
    }

    #[test]
    fn flag_update_rewrite_preserves_siblings() {
        let setup = set_up();

        {
            let mut cache = setup.session();
            cache.retrieve(MBOX, &uid_range(1, 6), FieldSet::OVERVIEW);
            cache.flush();
        }

        // Dirtying one UID rewrites the whole slice; the other records
        // must come through unharmed.
        {
            let mut cache = setup.session();
            cache.update_flags(MBOX, &[Uid::u(1)], MessageFlags::SEEN, true);
            cache.flush();
        }

        setup.transport.reset_counts();
        {
            let mut cache = setup.session();
            let result =
                cache.retrieve(MBOX, &uid_range(1, 6), FieldSet::OVERVIEW);
            for uid in uid_range(1, 6) {
                assert!(result[&uid].is_some());
            }
            assert!(result[&Uid::u(1)]
                .as_ref()
                .unwrap()
                .overview
                .as_ref()
                .unwrap()
                .flags
                .contains(MessageFlags::SEEN));
        }
        assert_eq!(0, setup.transport.counts().overview_uids);
    }

    #[test]
    fn aborted_unit_of_work_writes_nothing() {
        let setup = set_up();
        {
            let mut cache = setup.session();
            cache.retrieve(MBOX, &uid_range(1, 10), FieldSet::OVERVIEW);
            // The unit of work failed; its overlay must not reach the
            // store.
            cache.abandon();
        }

        assert!(setup
            .store
            .get(&slice_key(NAMESPACE, MBOX, 0))
            .unwrap()
            .is_none());
        assert!(setup
            .store
            .get(&slicemap_key(NAMESPACE, MBOX))
            .unwrap()
            .is_none());
    }
}
