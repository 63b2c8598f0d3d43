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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A request against the IMAP transport could not be completed.
    ///
    /// The cache never surfaces this to its caller; it is degraded to "field
    /// unavailable" at the call site.
    #[error("Transport request failed: {0}")]
    Transport(String),
    /// A request against the backing store could not be completed.
    ///
    /// Degraded to a cache miss (reads) or a dropped write at the call site.
    #[error("Backing store request failed: {0}")]
    Store(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Cbor(#[from] serde_cbor::error::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}
