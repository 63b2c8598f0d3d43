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

use std::fmt;
use std::num::NonZeroU32;

use bitflags::bitflags;
use chrono::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Uniquely identifies a message within a single mailbox.
///
/// UIDs start at 1 and increase monotonically as messages are added to the
/// mailbox. UIDs are never reused within one validity epoch; when the epoch
/// changes, every UID from the prior epoch is meaningless.
#[derive(
    Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct Uid(pub NonZeroU32);

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Uid({})", self.0.get())
    }
}

impl Uid {
    // Unsafe because new() isn't const for some reason
    pub const MIN: Self = unsafe { Uid(NonZeroU32::new_unchecked(1)) };
    pub const MAX: Self =
        unsafe { Uid(NonZeroU32::new_unchecked(u32::MAX)) };

    pub fn of(uid: u32) -> Option<Self> {
        NonZeroU32::new(uid).map(Uid)
    }

    pub fn next(self) -> Option<Self> {
        if Uid::MAX == self {
            None
        } else {
            Some(Uid(NonZeroU32::new(self.0.get() + 1).unwrap()))
        }
    }

    #[cfg(test)]
    pub fn u(uid: u32) -> Self {
        Uid::of(uid).unwrap()
    }
}

impl From<Uid> for u32 {
    fn from(uid: Uid) -> u32 {
        uid.0.get()
    }
}

/// Identifies one slice of a mailbox's cached records.
///
/// Slice numbers are allocated from a per-mailbox counter in units of the
/// configured slice size and are never reallocated; a slice number vacated
/// by compaction simply goes unused.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct SliceNumber(pub u32);

impl fmt::Display for SliceNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// The categories of per-message data a caller can request.
    ///
    /// Each flag corresponds to one independently-cached, lazily-populated
    /// field of `MessageRecord`.
    pub struct FieldSet: u32 {
        /// Summary metadata: subject, participants, date, size, flags.
        const OVERVIEW = 1 << 0;
        /// The message's position in the mailbox's arrival order.
        ///
        /// Always requires a transport round trip to obtain the arrival
        /// list; the resulting sequence numbers are never persisted.
        const ARRIVAL = 1 << 1;
        /// The MIME structure tree.
        const STRUCTURE = 1 << 2;
        /// Preview text, subject to the "preview unread only" preference.
        const PREVIEW = 1 << 3;
        /// Preview text, ignoring the "preview unread only" preference.
        const PREVIEW_FORCE = 1 << 4;
        /// The parsed header block.
        const HEADER = 1 << 5;
        /// The derived display form of the sender.
        const DISPLAY_FROM = 1 << 6;
    }
}

bitflags! {
    /// The mutable per-message flags tracked in the overview.
    pub struct MessageFlags: u8 {
        const SEEN = 1 << 0;
        const ANSWERED = 1 << 1;
        const FLAGGED = 1 << 2;
        const DELETED = 1 << 3;
        const DRAFT = 1 << 4;
    }
}

impl Default for MessageFlags {
    fn default() -> Self {
        MessageFlags::empty()
    }
}

// Serialised as the raw bits; unknown bits from a newer writer are dropped
// rather than failing the whole record.
impl Serialize for MessageFlags {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u8(self.bits())
    }
}

impl<'de> Deserialize<'de> for MessageFlags {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        u8::deserialize(de).map(MessageFlags::from_bits_truncate)
    }
}

/// The columns the mailbox view can be sorted by.
#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
)]
pub enum SortField {
    Arrival,
    Date,
    From,
    Subject,
    Size,
}

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// The active sort order for a mailbox view.
///
/// Part of the mailbox fingerprint: cached view-derived data is only
/// meaningful under the sort order it was produced for.
#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
)]
pub struct SortKey {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for SortKey {
    fn default() -> Self {
        SortKey {
            field: SortField::Arrival,
            direction: SortDirection::Ascending,
        }
    }
}

/// The result of a lightweight status query against a mailbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MailboxStatus {
    /// The number of messages currently in the mailbox.
    pub messages: u32,
    /// The next UID the mailbox will assign.
    pub uid_next: u32,
    /// The mailbox's validity epoch. Changes whenever the UID space is
    /// reset, e.g. when the mailbox is deleted and recreated.
    pub uid_validity: u64,
}

/// A cheap summary of mailbox state, used to detect change.
///
/// Computed fresh on demand and compared, never stored on its own; the
/// compact [`FingerprintToken`] form is embedded in the persisted slice map
/// so a later unit of work can tell whether the mailbox moved underneath
/// the cache.
///
/// A fingerprint whose status query failed has `status == None` and matches
/// nothing, including another failed fingerprint, so a transport failure
/// always degrades to a full refetch rather than trusting possibly-wrong
/// cached data.
#[derive(Clone, Copy, Debug)]
pub struct MailboxFingerprint {
    pub status: Option<MailboxStatus>,
    pub sort: SortKey,
}

impl MailboxFingerprint {
    /// The validity epoch, if the status query succeeded.
    pub fn uid_validity(&self) -> Option<u64> {
        self.status.map(|s| s.uid_validity)
    }

    /// The persistable form of this fingerprint, if it has one.
    pub fn token(&self) -> Option<FingerprintToken> {
        self.status.map(|s| FingerprintToken {
            messages: s.messages,
            uid_next: s.uid_next,
            uid_validity: s.uid_validity,
            sort: self.sort,
        })
    }

    /// Whether cached data written under `token` is still trustworthy.
    pub fn matches(&self, token: Option<&FingerprintToken>) -> bool {
        match (self.token(), token) {
            (Some(ref fresh), Some(stored)) => fresh == stored,
            _ => false,
        }
    }
}

/// The fingerprint fields embedded in a persisted slice map.
///
/// Any mismatch against a freshly-computed fingerprint means the mailbox
/// has changed since the cache last wrote, and none of its cached slices
/// may be served this unit of work.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct FingerprintToken {
    #[serde(rename = "c")]
    pub messages: u32,
    #[serde(rename = "x")]
    pub uid_next: u32,
    #[serde(rename = "v")]
    pub uid_validity: u64,
    #[serde(rename = "s")]
    pub sort: SortKey,
}

/// One address from a participant header, decoded.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Address {
    /// The display name, if present.
    pub name: Option<String>,
    /// The local part of the address.
    pub local: Option<String>,
    /// The domain of the address.
    pub domain: Option<String>,
}

impl Address {
    /// The `local@domain` form, if both parts are present.
    pub fn email(&self) -> Option<String> {
        match (&self.local, &self.domain) {
            (Some(local), Some(domain)) => {
                Some(format!("{local}@{domain}"))
            },
            _ => None,
        }
    }
}

/// Summary metadata for one message, as returned by a batch overview
/// fetch.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct Overview {
    pub subject: Option<String>,
    pub from: Vec<Address>,
    pub to: Vec<Address>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub date: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub size: u32,
    pub flags: MessageFlags,
}

impl Overview {
    /// Derive the display form of the sender: the first sender's display
    /// name if there is one, otherwise the bare address.
    pub fn display_from(&self) -> Option<String> {
        let first = self.from.first()?;
        first
            .name
            .as_ref()
            .filter(|n| !n.is_empty())
            .cloned()
            .or_else(|| first.email())
    }
}

/// One node of a message's MIME structure.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct MimePart {
    /// The main content type, e.g. `text` or `multipart`.
    pub content_type: String,
    /// The content subtype, e.g. `plain` or `mixed`.
    pub subtype: String,
    /// Content-Type parameters in wire order.
    pub parameters: Vec<(String, String)>,
    pub content_id: Option<String>,
    pub description: Option<String>,
    pub encoding: Option<String>,
    /// The size of this part's content in bytes, where known.
    pub size: u32,
    pub children: Vec<MimePart>,
}

impl MimePart {
    pub fn is_multipart(&self) -> bool {
        self.content_type.eq_ignore_ascii_case("multipart")
    }
}

/// A parsed message header block.
///
/// Fields are kept in wire order; duplicate names are allowed.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct HeaderBlock {
    pub fields: Vec<(String, String)>,
}

impl HeaderBlock {
    /// The value of the first field with the given name, compared
    /// case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Cached preview text for one message.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Preview {
    pub text: String,
    /// Whether the text was cut down to the configured length.
    pub truncated: bool,
}

/// The cached metadata for a single message.
///
/// Every field is optional and populated lazily the first time a caller
/// requests it; presence of a field means "already fetched and valid under
/// the current preferences". Records are only trustworthy while the slice
/// that holds them carries the mailbox's current validity epoch.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct MessageRecord {
    #[serde(rename = "o")]
    pub overview: Option<Overview>,
    #[serde(rename = "s")]
    pub structure: Option<MimePart>,
    #[serde(rename = "h")]
    pub header: Option<HeaderBlock>,
    #[serde(rename = "p")]
    pub preview: Option<Preview>,
    /// The derived display form of the sender.
    #[serde(rename = "g")]
    pub display_from: Option<String>,
    /// The message's position in arrival order, resolved per unit of work
    /// and never persisted.
    #[serde(skip)]
    pub arrival_seqnum: Option<u32>,
}
