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

//! Mailcache is the mailbox-state and message-metadata caching layer of a
//! webmail application: a sliced, compressed, persistent cache of
//! per-message IMAP data (overviews, MIME structures, headers, previews)
//! that spares the application from refetching them on every page load
//! while staying consistent as the mailbox mutates underneath it.
//!
//! The embedding application creates one [`cache::MessageCache`] per unit
//! of work (one request), wiring in its IMAP transport, backing store, and
//! preference source through the traits in [`cache::interface`], and calls
//! `flush()` at the end of the unit of work. See the [`cache`] module for
//! the design.

pub mod cache;
pub mod support;

pub use crate::cache::MessageCache;
pub use crate::support::config::CacheConfig;
pub use crate::support::error::Error;
