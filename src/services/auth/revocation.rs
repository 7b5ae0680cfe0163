//! Deny-list consulted on every authentication, cached or not.
//!
//! A subject record revokes every token for that subject issued at or before
//! `revoked_at` ("log out everywhere"). A token record revokes one `jti`.
use std::collections::HashMap;

use dashmap::{DashMap, mapref::entry::Entry};
use serde::Deserialize;
use tracing::info;

/// One administrative revocation, as read from a revocation source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RevocationRecord {
    Subject { subject: String, revoked_at: u64 },
    Token { token_id: String, revoked_at: u64 },
}

/// Outcome of [`RevocationFilter::replace_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceReport {
    pub changed: usize,
    pub lifted: usize,
}

#[derive(Clone, Copy)]
enum Merge {
    Latest,
    Replace,
}

#[derive(Debug, Default)]
pub struct RevocationFilter {
    subjects: DashMap<String, u64>,
    tokens: DashMap<String, u64>,
}

impl RevocationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_revoked(&self, subject: &str, token_issued_at: u64) -> bool {
        self.subjects
            .get(subject)
            .is_some_and(|revoked_at| token_issued_at <= *revoked_at)
    }

    pub fn is_token_revoked(&self, token_id: &str) -> bool {
        self.tokens.contains_key(token_id)
    }

    /// Record a subject revocation. A later `revoked_at` wins over an earlier one.
    pub fn revoke_subject(&self, subject: impl Into<String>, revoked_at: u64) {
        let subject = subject.into();
        if upsert(&self.subjects, subject.clone(), revoked_at, Merge::Latest) {
            info!(subject = %subject, revoked_at, "subject revoked");
        }
    }

    pub fn revoke_token(&self, token_id: impl Into<String>, revoked_at: u64) {
        let token_id = token_id.into();
        if upsert(&self.tokens, token_id.clone(), revoked_at, Merge::Latest) {
            info!(token_id = %token_id, revoked_at, "token revoked");
        }
    }

    pub fn apply(&self, record: RevocationRecord) {
        match record {
            RevocationRecord::Subject {
                subject,
                revoked_at,
            } => self.revoke_subject(subject, revoked_at),
            RevocationRecord::Token {
                token_id,
                revoked_at,
            } => self.revoke_token(token_id, revoked_at),
        }
    }

    /// Make `records` the whole deny-list: records missing from it are lifted,
    /// the rest are set to exactly the `revoked_at` given. Duplicate records
    /// for one id keep the latest `revoked_at`.
    pub fn replace_all(
        &self,
        records: impl IntoIterator<Item = RevocationRecord>,
    ) -> ReplaceReport {
        let mut subjects = HashMap::new();
        let mut tokens = HashMap::new();
        for record in records {
            let (target, id, revoked_at) = match record {
                RevocationRecord::Subject {
                    subject,
                    revoked_at,
                } => (&mut subjects, subject, revoked_at),
                RevocationRecord::Token {
                    token_id,
                    revoked_at,
                } => (&mut tokens, token_id, revoked_at),
            };
            let at = target.entry(id).or_insert(revoked_at);
            *at = (*at).max(revoked_at);
        }

        let mut report = ReplaceReport::default();
        self.subjects.retain(|subject, _| {
            let keep = subjects.contains_key(subject);
            if !keep {
                info!(subject = %subject, "subject revocation lifted");
                report.lifted += 1;
            }
            keep
        });
        self.tokens.retain(|token_id, _| {
            let keep = tokens.contains_key(token_id);
            if !keep {
                info!(token_id = %token_id, "token revocation lifted");
                report.lifted += 1;
            }
            keep
        });

        for (subject, revoked_at) in subjects {
            if upsert(&self.subjects, subject.clone(), revoked_at, Merge::Replace) {
                info!(subject = %subject, revoked_at, "subject revoked");
                report.changed += 1;
            }
        }
        for (token_id, revoked_at) in tokens {
            if upsert(&self.tokens, token_id.clone(), revoked_at, Merge::Replace) {
                info!(token_id = %token_id, revoked_at, "token revoked");
                report.changed += 1;
            }
        }
        report
    }

    pub fn clear_subject(&self, subject: &str) -> bool {
        self.subjects.remove(subject).is_some()
    }

    pub fn clear_token(&self, token_id: &str) -> bool {
        self.tokens.remove(token_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.subjects.len() + self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Insert or update `id`. Returns false when the stored value did not change.
fn upsert(map: &DashMap<String, u64>, id: String, revoked_at: u64, merge: Merge) -> bool {
    match map.entry(id) {
        Entry::Occupied(mut entry) => {
            let next = match merge {
                Merge::Latest => (*entry.get()).max(revoked_at),
                Merge::Replace => revoked_at,
            };
            if next == *entry.get() {
                return false;
            }
            entry.insert(next);
            true
        }
        Entry::Vacant(entry) => {
            entry.insert(revoked_at);
            true
        }
    }
}
