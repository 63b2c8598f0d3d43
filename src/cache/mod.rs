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

//! The message-metadata cache proper.
//!
//! Webmail reloads the same mailbox view over and over, and most of what a
//! page needs — overviews, MIME structures, headers, preview text — is
//! expensive to pull from the IMAP server but changes rarely. This module
//! keeps that data in a backing store between units of work (one unit of
//! work being one request) and answers the question the naive approach
//! gets wrong: how to keep serving cached data while the mailbox mutates
//! underneath.
//!
//! ## Storage layout
//!
//! Per-message records are grouped into _slices_ of a fixed number of
//! messages, and a slice is the unit of physical I/O: it is loaded and
//! rewritten wholesale. Each mailbox stores, under its reserved `slicemap`
//! key, the append-only assignment of UIDs to slice numbers plus the
//! running allocation counter. Keys have the shape
//!
//! ```text
//! msgcache|<user>|<mailbox>|<slice-number-or-"slicemap">
//! ```
//!
//! so tenants sharing one backing store cannot collide.
//!
//! ## Staleness
//!
//! Validity hangs on two checks rather than on any locking:
//!
//! - The _fingerprint_ (message count, next UID, validity epoch, active
//!   sort order) is computed freshly once per unit of work and compared
//!   against the fingerprint stored with the slice map. Any difference
//!   means the mailbox changed since the cache last wrote; the unit of
//!   work then serves nothing from the cache and refetches what it is
//!   asked for. A fingerprint whose status query failed matches nothing,
//!   so transport trouble degrades to refetching, never to trusting
//!   possibly-wrong data.
//!
//! - Each slice additionally embeds the validity epoch it was written
//!   under. A slice whose epoch does not match the mailbox's current
//!   epoch is discarded whole and expired when a load encounters it. This
//!   catches a concurrent writer that lost the race with a UID-space
//!   reset: its slices are simply garbage to the next reader.
//!
//! Concurrent units of work (other requests, other processes) need no
//! coordination beyond this: writes are last-writer-wins at slice
//! granularity, and both checks tolerate partial, non-atomic writes
//! across keys.
//!
//! ## Unit-of-work lifecycle
//!
//! A `MessageCache` is created per unit of work and holds the decoded,
//! mutable overlay for every mailbox touched. A mailbox entry moves
//! through unloaded, clean, and dirty states: first touch loads the slice
//! map and validates the fingerprint; retrievals decode slices into the
//! overlay (in-memory records always win over a later disk read); field
//! fetches and flag updates mark UIDs dirty. `flush()` — called by the
//! unit-of-work owner at its natural end, and run from `Drop` as a safety
//! net — groups dirty UIDs by slice, rewrites exactly the touched slices
//! with the current epoch embedded, expires slices left empty, and saves
//! the slice map once per mailbox. A unit of work that aborts early
//! simply drops the overlay unsaved, leaving the store in its prior,
//! still-valid state.
//!
//! ## About the layout of this module
//!
//! `MessageCache` is one abstraction split across several files because it
//! is unwieldy otherwise; `defs` holds the data structures and the rest
//! hold one operation family each.

// Basic struct definitions
mod defs;
pub use defs::MessageCache;

pub mod interface;
pub mod model;

// Internal components
mod fingerprint;
mod metadata_store;
mod slice_map;

// Operations
mod flush; // the deferred writer
mod mutate; // flag updates, deletions, mailbox drops
mod retrieve; // slice loading and field retrieval

#[cfg(test)]
mod test_prelude;
