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

//! Slice-granular persistence against the backing store.
//!
//! A slice is the unit of physical cache I/O: it is read and written
//! wholesale under a key derived from the user namespace, the mailbox, and
//! the slice number. The envelope is plain CBOR; each record inside it is
//! compressed individually, so a record that fails to decode costs only
//! itself and not its siblings.
//!
//! Nothing in here returns an error to its caller. A store failure or an
//! undecodable image on read is a cache miss; a store failure on write is
//! a dropped write. Both are logged and the cache falls back to the
//! transport, trading performance for correctness.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::cache::interface::CacheStore;
use crate::cache::model::{MessageRecord, SliceNumber, Uid};
use crate::cache::slice_map::SliceMapImage;
use crate::support::compression::Compression;
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;

/// The prefix on every key this crate writes to the backing store.
const KEY_PREFIX: &str = "msgcache";

/// The reserved slice-position component naming the slice map itself.
const SLICEMAP_KEY: &str = "slicemap";

/// The persisted envelope of one slice.
#[derive(Deserialize, Serialize, Clone, Debug)]
struct SliceImage {
    /// The mailbox's validity epoch at the time this slice was written.
    ///
    /// Fixed at write time; readers compare it against the mailbox's
    /// current epoch before trusting any record in here.
    #[serde(rename = "v")]
    uid_validity: u64,
    /// The scheme the records below are compressed with.
    #[serde(rename = "c")]
    compression: Compression,
    /// UID to individually-compressed CBOR record.
    #[serde(rename = "r")]
    records: BTreeMap<u32, ByteBuf>,
}

/// Reads and writes slices and slice maps for one user's cache.
pub struct MetadataStore {
    store: Arc<dyn CacheStore>,
    namespace: String,
    lifetime: Option<Duration>,
    compression: Compression,
    log_prefix: LogPrefix,
}

impl MetadataStore {
    pub fn new(
        store: Arc<dyn CacheStore>,
        namespace: String,
        lifetime: Option<Duration>,
        compression: Compression,
        log_prefix: LogPrefix,
    ) -> Self {
        MetadataStore {
            store,
            namespace,
            lifetime,
            compression,
            log_prefix,
        }
    }

    fn slice_key(&self, mailbox: &str, slice: SliceNumber) -> String {
        format!("{}|{}|{}|{}", KEY_PREFIX, self.namespace, mailbox, slice)
    }

    fn slicemap_key(&self, mailbox: &str) -> String {
        format!(
            "{}|{}|{}|{}",
            KEY_PREFIX, self.namespace, mailbox, SLICEMAP_KEY
        )
    }

    /// Fetch and decode one slice.
    ///
    /// Returns the epoch the slice was written under and its decodable
    /// records, or `None` if the slice is missing, unreadable, or
    /// undecodable.
    pub fn load_slice(
        &self,
        mailbox: &str,
        slice: SliceNumber,
    ) -> Option<(u64, HashMap<Uid, MessageRecord>)> {
        let key = self.slice_key(mailbox, slice);
        let data = self.get(&key)?;
        let image: SliceImage = match serde_cbor::from_slice(&data) {
            Ok(image) => image,
            Err(e) => {
                debug!(
                    "{} Discarding undecodable slice {}: {}",
                    self.log_prefix, key, e
                );
                return None;
            },
        };

        let mut records = HashMap::with_capacity(image.records.len());
        for (uid, blob) in &image.records {
            let uid = match Uid::of(*uid) {
                Some(uid) => uid,
                None => continue,
            };
            match decode_record(image.compression, blob) {
                Ok(record) => {
                    records.insert(uid, record);
                },
                Err(e) => {
                    // Only the failing record is lost; its siblings in the
                    // same slice stay usable.
                    debug!(
                        "{} Dropping undecodable record {} of {}: {}",
                        self.log_prefix,
                        u32::from(uid),
                        key,
                        e
                    );
                },
            }
        }

        Some((image.uid_validity, records))
    }

    /// Compress and persist one slice. Returns whether the write went
    /// through.
    pub fn save_slice(
        &self,
        mailbox: &str,
        slice: SliceNumber,
        uid_validity: u64,
        records: &[(Uid, &MessageRecord)],
    ) -> bool {
        let mut encoded = BTreeMap::new();
        for &(uid, record) in records {
            match encode_record(self.compression, record) {
                Ok(blob) => {
                    encoded.insert(u32::from(uid), ByteBuf::from(blob));
                },
                Err(e) => warn!(
                    "{} Failed to encode record {} of {}/{}: {}",
                    self.log_prefix,
                    u32::from(uid),
                    mailbox,
                    slice,
                    e
                ),
            }
        }

        if encoded.is_empty() {
            // Nothing survived encoding; leaving an empty slice behind
            // would just be garbage for the next reader.
            self.expire_slice(mailbox, slice);
            return false;
        }

        let image = SliceImage {
            uid_validity,
            compression: self.compression,
            records: encoded,
        };
        let data = match serde_cbor::to_vec(&image) {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    "{} Failed to encode slice {}/{}: {}",
                    self.log_prefix, mailbox, slice, e
                );
                return false;
            },
        };
        self.set(&self.slice_key(mailbox, slice), &data)
    }

    /// Remove one slice outright.
    pub fn expire_slice(&self, mailbox: &str, slice: SliceNumber) {
        self.expire(&self.slice_key(mailbox, slice));
    }

    /// Fetch and decode the slice map for `mailbox`.
    ///
    /// A missing or undecodable map is `None`; the caller synthesizes a
    /// fresh one, which is a cache miss and never a fatal condition.
    pub fn load_slice_map(&self, mailbox: &str) -> Option<SliceMapImage> {
        let key = self.slicemap_key(mailbox);
        let data = self.get(&key)?;
        match serde_cbor::from_slice(&data) {
            Ok(image) => Some(image),
            Err(e) => {
                debug!(
                    "{} Discarding undecodable slice map {}: {}",
                    self.log_prefix, key, e
                );
                None
            },
        }
    }

    /// Persist the slice map for `mailbox`. Returns whether the write went
    /// through.
    pub fn save_slice_map(
        &self,
        mailbox: &str,
        image: &SliceMapImage,
    ) -> bool {
        match serde_cbor::to_vec(image) {
            Ok(data) => self.set(&self.slicemap_key(mailbox), &data),
            Err(e) => {
                warn!(
                    "{} Failed to encode slice map for {}: {}",
                    self.log_prefix, mailbox, e
                );
                false
            },
        }
    }

    /// Remove the slice map for `mailbox`.
    pub fn expire_slice_map(&self, mailbox: &str) {
        self.expire(&self.slicemap_key(mailbox));
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.store.get(key) {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    "{} Backing store read of {} failed: {}",
                    self.log_prefix, key, e
                );
                None
            },
        }
    }

    fn set(&self, key: &str, data: &[u8]) -> bool {
        match self.store.set(key, data, self.lifetime) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "{} Backing store write of {} failed: {}",
                    self.log_prefix, key, e
                );
                false
            },
        }
    }

    fn expire(&self, key: &str) {
        if let Err(e) = self.store.expire(key) {
            warn!(
                "{} Backing store expiry of {} failed: {}",
                self.log_prefix, key, e
            );
        }
    }
}

fn encode_record(
    compression: Compression,
    record: &MessageRecord,
) -> Result<Vec<u8>, Error> {
    let mut blob = Vec::new();
    {
        let mut compressor = compression.compressor(&mut blob)?;
        serde_cbor::to_writer(&mut compressor, record)?;
        compressor.finish()?;
    }

    Ok(blob)
}

fn decode_record(
    compression: Compression,
    blob: &[u8],
) -> Result<MessageRecord, Error> {
    let stream = compression.decompressor(blob)?;
    Ok(serde_cbor::from_reader(stream)?)
}
