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

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

pub(super) use std::sync::Arc;

use super::defs::MessageCache;
use super::metadata_store::MetadataStore;
pub(super) use crate::cache::interface::{
    CacheStore, InMemoryStore, Prefs, StaticPrefs, Transport,
};
pub(super) use crate::cache::model::*;
use crate::support::config::CacheConfig;
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;

pub(super) const MBOX: &str = "INBOX";
pub(super) const NAMESPACE: &str = "jsmith";

pub(super) fn uid_range(lo: u32, hi: u32) -> Vec<Uid> {
    (lo..=hi).map(|uid| Uid::of(uid).unwrap()).collect()
}

pub(super) fn slice_key(
    namespace: &str,
    mailbox: &str,
    slice: u32,
) -> String {
    format!("msgcache|{namespace}|{mailbox}|{slice}")
}

pub(super) fn slicemap_key(namespace: &str, mailbox: &str) -> String {
    format!("msgcache|{namespace}|{mailbox}|slicemap")
}

pub(super) struct Setup {
    pub transport: Arc<MockTransport>,
    pub store: Arc<dyn CacheStore>,
    pub config: CacheConfig,
}

pub(super) fn set_up() -> Setup {
    set_up_with_messages(10)
}

pub(super) fn set_up_with_messages(count: u32) -> Setup {
    set_up_with_store_and_messages(Arc::new(InMemoryStore::new()), count)
}

pub(super) fn set_up_with_store(store: Arc<dyn CacheStore>) -> Setup {
    set_up_with_store_and_messages(store, 10)
}

pub(super) fn set_up_with_store_and_messages(
    store: Arc<dyn CacheStore>,
    count: u32,
) -> Setup {
    let transport = Arc::new(MockTransport::new());
    transport.add_mailbox(MBOX, 1, count);
    Setup {
        transport,
        store,
        config: CacheConfig::default(),
    }
}

impl Setup {
    /// Start a new unit of work against the shared store.
    pub(super) fn session(&self) -> MessageCache {
        self.session_with_prefs(StaticPrefs::default())
    }

    pub(super) fn session_with_prefs(
        &self,
        prefs: StaticPrefs,
    ) -> MessageCache {
        MessageCache::new(
            Arc::clone(&self.transport) as Arc<dyn Transport>,
            Arc::clone(&self.store),
            Arc::new(prefs),
            self.config.clone(),
            NAMESPACE,
        )
    }

    /// Direct access to the persisted slices, for forging and inspecting
    /// store contents.
    pub(super) fn metadata_store(&self) -> MetadataStore {
        MetadataStore::new(
            Arc::clone(&self.store),
            NAMESPACE.to_owned(),
            None,
            self.config.compression,
            LogPrefix::new("msgcache".to_owned()),
        )
    }
}

/// A scripted stand-in for the IMAP transport.
///
/// Holds fully-populated mailboxes and counts every call, so tests can
/// assert on exactly how often the cache reached out.
pub(super) struct MockTransport {
    state: Mutex<MockState>,
}

struct MockState {
    mailboxes: BTreeMap<String, MockMailbox>,
    counts: CallCounts,
    fail_status: bool,
    fail_fetch: bool,
}

struct MockMailbox {
    uid_validity: u64,
    uid_next: u32,
    messages: BTreeMap<Uid, MockMessage>,
}

struct MockMessage {
    overview: Overview,
    structure: MimePart,
    header: HeaderBlock,
    body: String,
}

#[derive(Clone, Copy, Debug, Default)]
pub(super) struct CallCounts {
    pub status: u32,
    pub overview_fetches: u32,
    pub overview_uids: u32,
    pub structure: u32,
    pub header: u32,
    pub body: u32,
    pub arrival: u32,
}

fn make_message(uid: Uid) -> MockMessage {
    let n = u32::from(uid);
    let mut overview = Overview::default();
    overview.subject = Some(format!("Message {n}"));
    overview.from.push(Address {
        name: Some(format!("Sender {n}")),
        local: Some(format!("sender{n}")),
        domain: Some("example.com".to_owned()),
    });
    overview.to.push(Address {
        name: None,
        local: Some("jsmith".to_owned()),
        domain: Some("example.com".to_owned()),
    });
    overview.message_id = Some(format!("<{n}@example.com>"));
    overview.size = 1000 + n;

    MockMessage {
        header: HeaderBlock {
            fields: vec![
                ("Subject".to_owned(), format!("Message {n}")),
                (
                    "From".to_owned(),
                    format!("Sender {n} <sender{n}@example.com>"),
                ),
                ("Message-ID".to_owned(), format!("<{n}@example.com>")),
            ],
        },
        structure: MimePart {
            content_type: "text".to_owned(),
            subtype: "plain".to_owned(),
            parameters: vec![("charset".to_owned(), "utf-8".to_owned())],
            size: 1000 + n,
            ..MimePart::default()
        },
        body: format!("The quick brown fox jumps over message {n}."),
        overview,
    }
}

impl MockTransport {
    pub(super) fn new() -> Self {
        MockTransport {
            state: Mutex::new(MockState {
                mailboxes: BTreeMap::new(),
                counts: CallCounts::default(),
                fail_status: false,
                fail_fetch: false,
            }),
        }
    }

    pub(super) fn add_mailbox(
        &self,
        mailbox: &str,
        uid_validity: u64,
        count: u32,
    ) {
        let messages: BTreeMap<Uid, MockMessage> = (1..=count)
            .map(|n| {
                let uid = Uid::of(n).unwrap();
                (uid, make_message(uid))
            })
            .collect();
        self.state.lock().unwrap().mailboxes.insert(
            mailbox.to_owned(),
            MockMailbox {
                uid_validity,
                uid_next: count + 1,
                messages,
            },
        );
    }

    /// A new message arrives in `mailbox`.
    pub(super) fn deliver(&self, mailbox: &str) {
        let mut state = self.state.lock().unwrap();
        let mbox = state.mailboxes.get_mut(mailbox).unwrap();
        let uid = Uid::of(mbox.uid_next).unwrap();
        mbox.messages.insert(uid, make_message(uid));
        mbox.uid_next += 1;
    }

    /// `uid` is expunged from `mailbox`.
    pub(super) fn remove(&self, mailbox: &str, uid: Uid) {
        let mut state = self.state.lock().unwrap();
        state
            .mailboxes
            .get_mut(mailbox)
            .unwrap()
            .messages
            .remove(&uid);
    }

    pub(super) fn set_seen(&self, mailbox: &str, uid: Uid, seen: bool) {
        let mut state = self.state.lock().unwrap();
        let message = state
            .mailboxes
            .get_mut(mailbox)
            .unwrap()
            .messages
            .get_mut(&uid)
            .unwrap();
        if seen {
            message.overview.flags |= MessageFlags::SEEN;
        } else {
            message.overview.flags -= MessageFlags::SEEN;
        }
    }

    /// The mailbox is deleted and recreated: same content, new epoch.
    pub(super) fn bump_uid_validity(&self, mailbox: &str) {
        let mut state = self.state.lock().unwrap();
        state.mailboxes.get_mut(mailbox).unwrap().uid_validity += 1;
    }

    pub(super) fn fail_status(&self, fail: bool) {
        self.state.lock().unwrap().fail_status = fail;
    }

    pub(super) fn fail_fetch(&self, fail: bool) {
        self.state.lock().unwrap().fail_fetch = fail;
    }

    pub(super) fn counts(&self) -> CallCounts {
        self.state.lock().unwrap().counts
    }

    pub(super) fn reset_counts(&self) {
        self.state.lock().unwrap().counts = CallCounts::default();
    }
}

impl Transport for MockTransport {
    fn status(&self, mailbox: &str) -> Result<MailboxStatus, Error> {
        let mut state = self.state.lock().unwrap();
        state.counts.status += 1;
        if state.fail_status {
            return Err(Error::Transport("status unavailable".to_owned()));
        }

        let mbox = state
            .mailboxes
            .get(mailbox)
            .ok_or_else(|| Error::Transport("no such mailbox".to_owned()))?;
        Ok(MailboxStatus {
            messages: mbox.messages.len() as u32,
            uid_next: mbox.uid_next,
            uid_validity: mbox.uid_validity,
        })
    }

    fn fetch_overview(
        &self,
        mailbox: &str,
        uids: &[Uid],
    ) -> Result<Vec<(Uid, Overview)>, Error> {
        let mut state = self.state.lock().unwrap();
        state.counts.overview_fetches += 1;
        state.counts.overview_uids += uids.len() as u32;
        if state.fail_fetch {
            return Err(Error::Transport("connection lost".to_owned()));
        }

        let mbox = state
            .mailboxes
            .get(mailbox)
            .ok_or_else(|| Error::Transport("no such mailbox".to_owned()))?;
        Ok(uids
            .iter()
            .filter_map(|uid| {
                mbox.messages
                    .get(uid)
                    .map(|message| (*uid, message.overview.clone()))
            })
            .collect())
    }

    fn fetch_structure(
        &self,
        mailbox: &str,
        uid: Uid,
    ) -> Result<Option<MimePart>, Error> {
        let mut state = self.state.lock().unwrap();
        state.counts.structure += 1;
        if state.fail_fetch {
            return Err(Error::Transport("connection lost".to_owned()));
        }

        Ok(state
            .mailboxes
            .get(mailbox)
            .and_then(|mbox| mbox.messages.get(&uid))
            .map(|message| message.structure.clone()))
    }

    fn fetch_header(
        &self,
        mailbox: &str,
        uid: Uid,
    ) -> Result<Option<HeaderBlock>, Error> {
        let mut state = self.state.lock().unwrap();
        state.counts.header += 1;
        if state.fail_fetch {
            return Err(Error::Transport("connection lost".to_owned()));
        }

        Ok(state
            .mailboxes
            .get(mailbox)
            .and_then(|mbox| mbox.messages.get(&uid))
            .map(|message| message.header.clone()))
    }

    fn fetch_body_text(
        &self,
        mailbox: &str,
        uid: Uid,
    ) -> Result<Option<String>, Error> {
        let mut state = self.state.lock().unwrap();
        state.counts.body += 1;
        if state.fail_fetch {
            return Err(Error::Transport("connection lost".to_owned()));
        }

        Ok(state
            .mailboxes
            .get(mailbox)
            .and_then(|mbox| mbox.messages.get(&uid))
            .map(|message| message.body.clone()))
    }

    fn arrival_order(&self, mailbox: &str) -> Result<Vec<Uid>, Error> {
        let mut state = self.state.lock().unwrap();
        state.counts.arrival += 1;
        if state.fail_fetch {
            return Err(Error::Transport("connection lost".to_owned()));
        }

        let mbox = state
            .mailboxes
            .get(mailbox)
            .ok_or_else(|| Error::Transport("no such mailbox".to_owned()))?;
        Ok(mbox.messages.keys().copied().collect())
    }
}

/// A store that remembers nothing: reads always miss, writes vanish.
pub(super) struct NullStore;

impl CacheStore for NullStore {
    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(None)
    }

    fn set(
        &self,
        _key: &str,
        _data: &[u8],
        _lifetime: Option<Duration>,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn expire(&self, _key: &str) -> Result<(), Error> {
        Ok(())
    }
}

/// A store whose every operation fails.
pub(super) struct BrokenStore;

impl CacheStore for BrokenStore {
    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, Error> {
        Err(Error::Store("store offline".to_owned()))
    }

    fn set(
        &self,
        _key: &str,
        _data: &[u8],
        _lifetime: Option<Duration>,
    ) -> Result<(), Error> {
        Err(Error::Store("store offline".to_owned()))
    }

    fn expire(&self, _key: &str) -> Result<(), Error> {
        Err(Error::Store("store offline".to_owned()))
    }
}

/// An in-memory store that refuses writes to keys containing a given
/// fragment.
pub(super) struct WriteFilterStore {
    inner: InMemoryStore,
    fragment: String,
}

impl WriteFilterStore {
    pub(super) fn rejecting(fragment: String) -> Self {
        WriteFilterStore {
            inner: InMemoryStore::new(),
            fragment,
        }
    }
}

impl CacheStore for WriteFilterStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        self.inner.get(key)
    }

    fn set(
        &self,
        key: &str,
        data: &[u8],
        lifetime: Option<Duration>,
    ) -> Result<(), Error> {
        if key.contains(&self.fragment) {
            return Err(Error::Store("write refused".to_owned()));
        }

        self.inner.set(key, data, lifetime)
    }

    fn expire(&self, key: &str) -> Result<(), Error> {
        self.inner.expire(key)
    }
}
