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

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, warn};

use super::defs::{MailboxEntry, MessageCache};
use crate::cache::model::{
    FieldSet, MessageFlags, MessageRecord, Overview, Preview, Uid,
};
use crate::cache::slice_map::SliceMap;

impl MessageCache {
    /// Retrieve the requested metadata fields for `uids` in `mailbox`.
    ///
    /// Fields already cached and still valid are served from the working
    /// set; everything else is fetched from the transport, cached, and
    /// scheduled for persistence at the end of the unit of work. A UID
    /// mapped to `None` in the result does not exist on the server (it
    /// was expunged between listing and fetch); that is a normal outcome,
    /// not an error. Transport trouble degrades to fields being left
    /// unpopulated rather than failing the retrieval.
    pub fn retrieve(
        &mut self,
        mailbox: &str,
        uids: &[Uid],
        fields: FieldSet,
    ) -> HashMap<Uid, Option<MessageRecord>> {
        let mut out = HashMap::with_capacity(uids.len());
        if uids.is_empty() || fields.is_empty() {
            return out;
        }

        // De-duplicate while preserving request order.
        let mut requested: Vec<Uid> = Vec::with_capacity(uids.len());
        let mut seen_uids: HashSet<Uid> = HashSet::with_capacity(uids.len());
        for &uid in uids {
            if seen_uids.insert(uid) {
                requested.push(uid);
            }
        }

        self.prepare_mailbox(mailbox);
        self.load_uids(mailbox, &requested);

        let transport = Arc::clone(&self.transport);
        let preview_unread_only = self.prefs.preview_unread_only();
        let preview_length = if self.config.preview_length > 0 {
            self.config.preview_length
        } else {
            self.prefs.preview_length()
        };
        let log_prefix = self.log_prefix.clone();

        let entry = match self.mailboxes.get_mut(mailbox) {
            Some(entry) => entry,
            None => return out,
        };

        // The requested UIDs not yet known to be absent.
        let mut live = requested.clone();

        if fields.contains(FieldSet::OVERVIEW) {
            let get: Vec<Uid> = live
                .iter()
                .copied()
                .filter(|uid| {
                    entry
                        .records
                        .get(uid)
                        .map_or(true, |record| record.overview.is_none())
                })
                .collect();
            if !get.is_empty() {
                match transport.fetch_overview(mailbox, &get) {
                    Ok(fetched) => {
                        let mut returned: HashSet<Uid> =
                            HashSet::with_capacity(fetched.len());
                        for (uid, overview) in fetched {
                            returned.insert(uid);
                            let record = entry
                                .records
                                .entry(uid)
                                .or_insert_with(MessageRecord::default);
                            record.overview = Some(overview);
                            entry.dirty.insert(uid);
                        }

                        // Anything the transport did not return no longer
                        // exists on the server.
                        let get: HashSet<Uid> = get.into_iter().collect();
                        live.retain(|uid| {
                            !get.contains(uid) || returned.contains(uid)
                        });
                    },
                    Err(e) => {
                        warn!(
                            "{} Overview fetch from {} failed: {}",
                            log_prefix, mailbox, e
                        );
                        // Without overview data there is nothing to serve
                        // for UIDs that have no cached record at all.
                        let records = &entry.records;
                        live.retain(|uid| records.contains_key(uid));
                    },
                }
            }
        }

        if fields.intersects(
            FieldSet::STRUCTURE
                | FieldSet::PREVIEW
                | FieldSet::PREVIEW_FORCE
                | FieldSet::HEADER,
        ) {
            for &uid in &live {
                let record = entry
                    .records
                    .entry(uid)
                    .or_insert_with(MessageRecord::default);

                if fields.contains(FieldSet::STRUCTURE)
                    && record.structure.is_none()
                {
                    match transport.fetch_structure(mailbox, uid) {
                        Ok(Some(structure)) => {
                            record.structure = Some(structure);
                            entry.dirty.insert(uid);
                        },
                        Ok(None) => (),
                        Err(e) => warn!(
                            "{} Structure fetch for {}/{} failed: {}",
                            log_prefix,
                            mailbox,
                            u32::from(uid),
                            e
                        ),
                    }
                }

                if fields
                    .intersects(FieldSet::PREVIEW | FieldSet::PREVIEW_FORCE)
                {
                    let force = fields.contains(FieldSet::PREVIEW_FORCE);
                    let seen = record.overview.as_ref().map_or(false, |ov| {
                        ov.flags.contains(MessageFlags::SEEN)
                    });

                    if record.preview.is_some() {
                        // Retroactive invalidation: a preview cached while
                        // the message was unseen stops being valid once
                        // the message has been seen under "preview unread
                        // only".
                        if preview_unread_only && !force && seen {
                            record.preview = None;
                            entry.dirty.insert(uid);
                        }
                    } else if !preview_unread_only || !seen || force {
                        match transport.fetch_body_text(mailbox, uid) {
                            Ok(text) => {
                                record.preview = Some(make_preview(
                                    text.unwrap_or_default(),
                                    preview_length,
                                ));
                                entry.dirty.insert(uid);
                            },
                            Err(e) => warn!(
                                "{} Preview fetch for {}/{} failed: {}",
                                log_prefix,
                                mailbox,
                                u32::from(uid),
                                e
                            ),
                        }
                    }
                }

                if fields.contains(FieldSet::HEADER)
                    && record.header.is_none()
                {
                    match transport.fetch_header(mailbox, uid) {
                        Ok(Some(header)) => {
                            record.header = Some(header);
                            entry.dirty.insert(uid);
                        },
                        Ok(None) => (),
                        Err(e) => warn!(
                            "{} Header fetch for {}/{} failed: {}",
                            log_prefix,
                            mailbox,
                            u32::from(uid),
                            e
                        ),
                    }
                }
            }
        }

        if fields.contains(FieldSet::DISPLAY_FROM) {
            for &uid in &live {
                if let Some(record) = entry.records.get_mut(&uid) {
                    if record.display_from.is_none() {
                        if let Some(display) = record
                            .overview
                            .as_ref()
                            .and_then(Overview::display_from)
                        {
                            record.display_from = Some(display);
                            entry.dirty.insert(uid);
                        }
                    }
                }
            }
        }

        // Requested UIDs for which nothing could be fetched leave no
        // record behind.
        let dirty = &entry.dirty;
        entry
            .records
            .retain(|uid, record| dirty.contains(uid) || !is_empty(record));

        if fields.contains(FieldSet::ARRIVAL) {
            match transport.arrival_order(mailbox) {
                Ok(order) => {
                    for (ix, uid) in order.into_iter().enumerate() {
                        if let Some(record) = entry.records.get_mut(&uid) {
                            record.arrival_seqnum = Some(ix as u32 + 1);
                        }
                    }
                },
                Err(e) => warn!(
                    "{} Arrival list for {} unavailable: {}",
                    log_prefix, mailbox, e
                ),
            }
        }

        let live: HashSet<Uid> = live.into_iter().collect();
        for uid in requested {
            let record = if live.contains(&uid) {
                entry.records.get(&uid).cloned()
            } else {
                None
            };
            out.insert(uid, record);
        }

        out
    }

    /// Bring `mailbox` into the working set, validating it against the
    /// current fingerprint.
    pub(super) fn prepare_mailbox(&mut self, mailbox: &str) {
        let fp = self.fingerprint(mailbox);

        if let Some(entry) = self.mailboxes.get_mut(mailbox) {
            // A session serving a new unit of work (see `renew()`)
            // re-resolves the fingerprint; if the mailbox moved in the
            // meantime, everything the overlay holds for it is suspect
            // and is dropped on the spot.
            let drifted = match (entry.fingerprint, fp.token()) {
                (Some(old), Some(new)) => old != new,
                // Both unknown: the same degraded fingerprint this unit
                // of work already resolved. `renew()` never lets a
                // degraded overlay survive into the next unit of work.
                (None, None) => false,
                _ => true,
            };
            if drifted {
                entry.records.clear();
                entry.loaded_slices.clear();
                entry.dirty.clear();
                entry.dirty_slices.clear();
                entry.epoch = fp.uid_validity();
                entry.fingerprint = fp.token();
                entry.cold = true;
            }
            return;
        }

        let (slice_map, stored_token) =
            match self.meta.load_slice_map(mailbox) {
                Some(image) => (
                    SliceMap::from_image(&image, self.config.slice_size),
                    image.fingerprint,
                ),
                None => (SliceMap::new(self.config.slice_size), None),
            };

        let cold = !fp.matches(stored_token.as_ref());
        if cold && !slice_map.is_empty() {
            debug!(
                "{} {} changed since the last cache write; refetching",
                self.log_prefix, mailbox
            );
        }

        self.mailboxes.insert(
            mailbox.to_owned(),
            MailboxEntry {
                epoch: fp.uid_validity(),
                fingerprint: fp.token(),
                cold,
                records: HashMap::new(),
                loaded_slices: HashSet::new(),
                slice_map,
                dirty: Default::default(),
                dirty_slices: Default::default(),
            },
        );
    }

    /// Load into memory the slices backing `uids`, skipping anything
    /// already loaded this unit of work.
    pub(super) fn load_uids(&mut self, mailbox: &str, uids: &[Uid]) {
        let needed: Vec<_> = {
            let entry = match self.mailboxes.get(mailbox) {
                Some(entry) => entry,
                None => return,
            };
            if entry.cold {
                return;
            }

            let missing: Vec<Uid> = uids
                .iter()
                .copied()
                .filter(|uid| !entry.records.contains_key(uid))
                .collect();
            if missing.is_empty() {
                return;
            }

            entry
                .slice_map
                .slices_touched_by(&missing)
                .into_iter()
                .filter(|slice| !entry.loaded_slices.contains(slice))
                .collect()
        };

        for slice in needed {
            let loaded = self.meta.load_slice(mailbox, slice);
            let entry = match self.mailboxes.get_mut(mailbox) {
                Some(entry) => entry,
                None => return,
            };
            entry.loaded_slices.insert(slice);

            if let Some((slice_epoch, records)) = loaded {
                if Some(slice_epoch) != entry.epoch {
                    // A writer with a stale view of the mailbox got here
                    // before us. The slice as a whole is garbage.
                    debug!(
                        "{} Discarding slice {}/{} from epoch {}",
                        self.log_prefix, mailbox, slice, slice_epoch
                    );
                    self.meta.expire_slice(mailbox, slice);
                    continue;
                }

                for (uid, record) in records {
                    // In-memory records always win over the disk read.
                    entry.records.entry(uid).or_insert(record);
                }
            }
        }
    }
}

fn is_empty(record: &MessageRecord) -> bool {
    record.overview.is_none()
        && record.structure.is_none()
        && record.header.is_none()
        && record.preview.is_none()
        && record.display_from.is_none()
}

fn make_preview(text: String, max_len: usize) -> Preview {
    if 0 == max_len || text.chars().count() <= max_len {
        return Preview {
            text,
            truncated: false,
        };
    }

    let mut cut: String = text.chars().take(max_len).collect();
    cut.push_str(" ...");
    Preview {
        text: cut,
        truncated: true,
    }
}
