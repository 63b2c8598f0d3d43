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

//! Provides a façade around compression and decompression, as used for
//! compressing the per-message records stored inside cache slices.

use std::io::{self, Read, Write};

use serde_repr::{Deserialize_repr, Serialize_repr};

/// Extends the `Write` trait to have a `finish()` method.
pub trait FinishWrite: Write {
    /// Perform any finishing operations on this object.
    fn finish(&mut self) -> io::Result<()>;
}

impl<W: Write> FinishWrite for zstd::Encoder<W> {
    fn finish(&mut self) -> io::Result<()> {
        self.do_finish()
    }
}

impl<W: Write> FinishWrite for flate2::write::GzEncoder<W> {
    fn finish(&mut self) -> io::Result<()> {
        self.try_finish()
    }
}

impl<W: FinishWrite + ?Sized> FinishWrite for Box<W> {
    fn finish(&mut self) -> io::Result<()> {
        (**self).finish()
    }
}

/// Various schemes of supported compression types.
///
/// The scheme a slice was written under is recorded in its envelope, so
/// records remain readable after the configured scheme changes.
#[derive(
    Serialize_repr, Deserialize_repr, Clone, Copy, Debug, PartialEq, Eq,
)]
#[repr(u8)]
pub enum Compression {
    /// ZStandard compression.
    Zstd = 0,
    /// Gzip compression.
    Gzip = 1,
}

impl Default for Compression {
    fn default() -> Self {
        Compression::DEFAULT_FOR_RECORDS
    }
}

impl Compression {
    pub const DEFAULT_FOR_RECORDS: Self = Compression::Zstd;

    /// Wrap `reader` to decompress according to this scheme.
    pub fn decompressor<'a>(
        self,
        reader: impl Read + 'a,
    ) -> io::Result<Box<dyn Read + 'a>> {
        match self {
            Compression::Zstd => Ok(box_r(zstd::Decoder::new(reader)?)),
            Compression::Gzip => {
                Ok(box_r(flate2::read::GzDecoder::new(reader)))
            },
        }
    }

    /// Wrap `writer` to compress according to this scheme.
    pub fn compressor<'a>(
        self,
        writer: impl Write + 'a,
    ) -> io::Result<Box<dyn FinishWrite + 'a>> {
        match self {
            Compression::Zstd => Ok(box_w(zstd::Encoder::new(writer, 5)?)),
            Compression::Gzip => Ok(box_w(flate2::write::GzEncoder::new(
                writer,
                flate2::Compression::default(),
            ))),
        }
    }
}

fn box_r<'a>(r: impl Read + 'a) -> Box<dyn Read + 'a> {
    Box::new(r)
}

fn box_w<'a>(w: impl FinishWrite + 'a) -> Box<dyn FinishWrite + 'a> {
    Box::new(w)
}
