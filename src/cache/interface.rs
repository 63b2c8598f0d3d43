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

//! The seams between the cache and its collaborators.
//!
//! The cache is a best-effort accelerator layered between the webmail
//! application and two external systems: the IMAP transport that owns the
//! truth, and the backing store that holds the cached bytes. Both are
//! reached exclusively through the traits here, so the cache itself never
//! cares which IMAP library or which store (file, memcached, database) the
//! application wired in.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::cache::model::{
    HeaderBlock, MailboxStatus, MimePart, Overview, SortKey, Uid,
};
use crate::support::error::Error;

/// The slice of the IMAP transport the cache consumes.
///
/// All calls are synchronous. The absence of a requested UID is a normal
/// return (the message was expunged between listing and fetch), never an
/// error; errors describe transport-level failures such as lost
/// connections and timeouts.
pub trait Transport {
    /// Run a lightweight status query against `mailbox`. No message data
    /// is fetched.
    fn status(&self, mailbox: &str) -> Result<MailboxStatus, Error>;

    /// Fetch overview data for `uids` in one batch.
    ///
    /// UIDs that do not exist are simply missing from the result.
    fn fetch_overview(
        &self,
        mailbox: &str,
        uids: &[Uid],
    ) -> Result<Vec<(Uid, Overview)>, Error>;

    /// Fetch the MIME structure of one message.
    fn fetch_structure(
        &self,
        mailbox: &str,
        uid: Uid,
    ) -> Result<Option<MimePart>, Error>;

    /// Fetch the parsed header block of one message.
    fn fetch_header(
        &self,
        mailbox: &str,
        uid: Uid,
    ) -> Result<Option<HeaderBlock>, Error>;

    /// Fetch the decoded text of the message's preferred body part, for
    /// preview generation. `None` if the message has no text part.
    fn fetch_body_text(
        &self,
        mailbox: &str,
        uid: Uid,
    ) -> Result<Option<String>, Error>;

    /// The mailbox's UIDs in arrival order.
    fn arrival_order(&self, mailbox: &str) -> Result<Vec<Uid>, Error>;
}

/// The contract the cache requires from a backing store.
///
/// Independent get/set/expire per key; no ordering or transactional
/// guarantees across keys. Every error a store reports is degraded by the
/// cache to a miss or a dropped write, so a flaky store costs performance,
/// never correctness.
pub trait CacheStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;

    /// Store `data` under `key`. `lifetime` of `None` means the entry does
    /// not expire on its own.
    fn set(
        &self,
        key: &str,
        data: &[u8],
        lifetime: Option<Duration>,
    ) -> Result<(), Error>;

    fn expire(&self, key: &str) -> Result<(), Error>;
}

/// Read-only user preferences consulted when deciding field validity.
pub trait Prefs {
    /// Whether preview text is only shown (and therefore only cached) for
    /// unseen messages.
    fn preview_unread_only(&self) -> bool;

    /// The user's preferred maximum preview length, in characters.
    fn preview_length(&self) -> usize;

    /// The active sort order for `mailbox`.
    fn sort_key(&self, mailbox: &str) -> SortKey;
}

/// A trivial in-process `CacheStore`.
///
/// Entry lifetimes are ignored; enforcing them is only meaningful for
/// stores that outlive the process.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn set(
        &self,
        key: &str,
        data: &[u8],
        _lifetime: Option<Duration>,
    ) -> Result<(), Error> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_owned(), data.to_vec());
        Ok(())
    }

    fn expire(&self, key: &str) -> Result<(), Error> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// A `Prefs` implementation over fixed values, for embeddings without a
/// preference system and for tests.
#[derive(Clone, Debug)]
pub struct StaticPrefs {
    pub preview_unread_only: bool,
    pub preview_length: usize,
    pub sort: SortKey,
}

impl Default for StaticPrefs {
    fn default() -> Self {
        StaticPrefs {
            preview_unread_only: false,
            preview_length: 250,
            sort: SortKey::default(),
        }
    }
}

impl Prefs for StaticPrefs {
    fn preview_unread_only(&self) -> bool {
        self.preview_unread_only
    }

    fn preview_length(&self) -> usize {
        self.preview_length
    }

    fn sort_key(&self, _mailbox: &str) -> SortKey {
        self.sort
    }
}
