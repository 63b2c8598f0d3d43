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

use std::collections::HashMap;

use log::debug;

use crate::cache::interface::{Prefs, Transport};
use crate::cache::model::MailboxFingerprint;
use crate::support::log_prefix::LogPrefix;

/// Memoizes mailbox fingerprints for the duration of one unit of work.
///
/// The first request for a mailbox issues one status query and one
/// preference read; repeated requests return the memoized value, so a unit
/// of work operates against a single consistent fingerprint per mailbox no
/// matter how many retrievals it performs. A new unit of work always
/// re-queries.
#[derive(Default)]
pub struct FingerprintProvider {
    memo: HashMap<String, MailboxFingerprint>,
}

impl FingerprintProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fingerprint(
        &mut self,
        transport: &dyn Transport,
        prefs: &dyn Prefs,
        log_prefix: &LogPrefix,
        mailbox: &str,
    ) -> MailboxFingerprint {
        if let Some(fp) = self.memo.get(mailbox) {
            return *fp;
        }

        let sort = prefs.sort_key(mailbox);
        let fp = match transport.status(mailbox) {
            Ok(status) => MailboxFingerprint {
                status: Some(status),
                sort,
            },
            Err(e) => {
                debug!(
                    "{} Status query for {} failed, \
                     treating cached data as stale: {}",
                    log_prefix, mailbox, e
                );
                MailboxFingerprint { status: None, sort }
            },
        };
        self.memo.insert(mailbox.to_owned(), fp);
        fp
    }

    /// Forget the memoized fingerprint for `mailbox`, forcing the next
    /// request to re-query. Used when the mailbox itself is dropped.
    pub fn forget(&mut self, mailbox: &str) {
        self.memo.remove(mailbox);
    }
}
