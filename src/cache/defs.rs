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

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::cache::fingerprint::FingerprintProvider;
use crate::cache::interface::{CacheStore, Prefs, Transport};
use crate::cache::metadata_store::MetadataStore;
use crate::cache::model::{
    FingerprintToken, MailboxFingerprint, MessageRecord, SliceNumber, Uid,
};
use crate::cache::slice_map::SliceMap;
use crate::support::config::CacheConfig;
use crate::support::log_prefix::LogPrefix;

/// The message-metadata cache session for one unit of work.
///
/// All reads and writes during the unit of work go through the in-memory
/// overlay held here; the backing store is only consulted to page slices
/// in and, at `flush()`, to write the mutated ones back out. Collaborators
/// are injected at construction and the session's lifetime is bound to the
/// unit of work that owns it — there is deliberately no process-wide
/// instance.
pub struct MessageCache {
    pub(super) transport: Arc<dyn Transport>,
    pub(super) prefs: Arc<dyn Prefs>,
    pub(super) meta: MetadataStore,
    pub(super) config: CacheConfig,
    pub(super) log_prefix: LogPrefix,
    pub(super) fingerprints: FingerprintProvider,
    pub(super) mailboxes: HashMap<String, MailboxEntry>,
}

/// The in-memory overlay for one mailbox touched this unit of work.
pub(super) struct MailboxEntry {
    /// The mailbox's validity epoch per this unit of work's fingerprint,
    /// if the status query succeeded.
    pub(super) epoch: Option<u64>,
    /// The fingerprint the overlay was built under. Revalidated when the
    /// session is renewed for a new unit of work.
    pub(super) fingerprint: Option<FingerprintToken>,
    /// Whether cached slices must not be served this unit of work.
    ///
    /// Set when the fresh fingerprint does not match the one stored with
    /// the slice map: the mailbox has changed since the cache last wrote,
    /// so every requested field is refetched from the transport and the
    /// flush rewrites whatever was touched under the fresh fingerprint.
    pub(super) cold: bool,
    /// Decoded records, keyed by UID. Entries here always win over a
    /// later disk read of the same UID.
    pub(super) records: HashMap<Uid, MessageRecord>,
    /// Slices already decoded (or found missing) this unit of work; a
    /// slice is read at most once per unit of work.
    pub(super) loaded_slices: HashSet<SliceNumber>,
    pub(super) slice_map: SliceMap,
    /// UIDs whose records changed this unit of work.
    pub(super) dirty: BTreeSet<Uid>,
    /// Slices that must be rewritten (or expired) even if no dirty UID
    /// maps to them any more, because records were deleted or evicted out
    /// of them.
    pub(super) dirty_slices: BTreeSet<SliceNumber>,
}

impl MailboxEntry {
    pub(super) fn has_work(&self) -> bool {
        !self.dirty.is_empty()
            || !self.dirty_slices.is_empty()
            || self.slice_map.is_dirty()
    }

    pub(super) fn clear_work(&mut self) {
        self.dirty.clear();
        self.dirty_slices.clear();
        self.slice_map.mark_clean();
    }
}

impl MessageCache {
    /// Create the cache session for one unit of work.
    ///
    /// `namespace` identifies the user owning the cached data; it becomes
    /// part of every backing-store key so tenants sharing a store cannot
    /// collide.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CacheStore>,
        prefs: Arc<dyn Prefs>,
        config: CacheConfig,
        namespace: &str,
    ) -> Self {
        let log_prefix = LogPrefix::new("msgcache".to_owned());
        log_prefix.set_user(namespace.to_owned());

        let meta = MetadataStore::new(
            store,
            namespace.to_owned(),
            config.store_lifetime(),
            config.compression,
            log_prefix.clone(),
        );

        MessageCache {
            transport,
            prefs,
            meta,
            config,
            log_prefix,
            fingerprints: FingerprintProvider::new(),
            mailboxes: HashMap::new(),
        }
    }

    /// The current fingerprint for `mailbox`, memoized for this unit of
    /// work.
    pub fn fingerprint(&mut self, mailbox: &str) -> MailboxFingerprint {
        self.fingerprints.fingerprint(
            &*self.transport,
            &*self.prefs,
            &self.log_prefix,
            mailbox,
        )
    }

    /// Start a new unit of work on this session.
    ///
    /// Outstanding work is flushed and the fingerprint memos dropped, so
    /// the next touch of every mailbox revalidates it. The overlay of a
    /// mailbox whose fingerprint still matches stays usable; anything
    /// else is dropped on first touch. Embeddings that pool one session
    /// per connection call this between requests; embeddings that build a
    /// fresh session per request never need it.
    pub fn renew(&mut self) {
        self.flush();
        self.fingerprints = FingerprintProvider::new();
        // Overlays built without a trustworthy fingerprint cannot be
        // revalidated; drop them outright.
        self.mailboxes
            .retain(|_, entry| entry.fingerprint.is_some());
    }

    /// Abandon the unit of work.
    ///
    /// The overlay is discarded without persisting anything, leaving the
    /// backing store in its prior state. For a unit of work that aborts,
    /// this is the correct exit: dropping the session would instead flush
    /// whatever it had mutated so far.
    pub fn abandon(&mut self) {
        self.mailboxes.clear();
        self.fingerprints = FingerprintProvider::new();
    }
}
