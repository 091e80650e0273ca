// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Key Filter
//!
//! Maps an owner key to a policy group and decides whether an action is
//! allowed for it.
//!
//! ## Classification
//!
//! Groups are checked in configured order; the first whose `pubkeys` list
//! contains the key wins. Keys listed nowhere fall into the `default` group.
//!
//! ## Quotas
//!
//! Publish quotas are evaluated against the *prospective* totals: the
//! owner's current count and byte sum with the pointer under evaluation
//! already added. A ceiling of `0` means unlimited.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::pointer::Pointer;
use crate::storage::IndexEntry;

/// Name of the mandatory fallback group.
pub const DEFAULT_GROUP: &str = "default";

/// A named policy bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterGroup {
    pub name: String,
    pub canpublish: bool,
    pub canreplace: bool,
    pub candelete: bool,
    /// Parsed and kept; no operation consults it.
    pub pointerexpiration: u64,
    pub maximumpointers: u64,
    pub maximumpointerhashsize: u64,
    pub pubkeys: HashSet<String>,
}

impl Default for FilterGroup {
    /// A group that allows nothing; used for missing keys in configuration.
    fn default() -> Self {
        Self {
            name: String::new(),
            canpublish: false,
            canreplace: false,
            candelete: false,
            pointerexpiration: 0,
            maximumpointers: 0,
            maximumpointerhashsize: 0,
            pubkeys: HashSet::new(),
        }
    }
}

impl FilterGroup {
    /// Built-in `default` group used when no groups are configured.
    pub fn builtin_default() -> Self {
        Self {
            name: DEFAULT_GROUP.to_string(),
            canpublish: true,
            canreplace: true,
            candelete: true,
            pointerexpiration: 0,
            maximumpointers: 1000,
            maximumpointerhashsize: 50_000_000,
            pubkeys: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Publish,
    Replace,
    Delete,
}

/// Outcome of [`KeyFilter::authorize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Accepted,
    PublishDenied,
    ReplaceDenied,
    DeleteDenied,
    CountQuotaExceeded,
    SizeQuotaExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("filter groups must include a `default` group")]
    MissingDefault,

    #[error("duplicate filter group name: {0}")]
    DuplicateGroup(String),
}

/// Ordered set of filter groups plus the default.
#[derive(Debug, Clone)]
pub struct KeyFilter {
    groups: Vec<FilterGroup>,
    default: FilterGroup,
}

impl Default for KeyFilter {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            default: FilterGroup::builtin_default(),
        }
    }
}

impl KeyFilter {
    /// Build from configured groups. An empty list yields the built-in default.
    pub fn from_groups(groups: Vec<FilterGroup>) -> Result<Self, FilterError> {
        if groups.is_empty() {
            return Ok(Self::default());
        }

        let mut seen = HashSet::new();
        for group in &groups {
            if !seen.insert(group.name.as_str()) {
                return Err(FilterError::DuplicateGroup(group.name.clone()));
            }
        }

        let default = groups
            .iter()
            .find(|g| g.name == DEFAULT_GROUP)
            .cloned()
            .ok_or(FilterError::MissingDefault)?;

        Ok(Self { groups, default })
    }

    /// The group governing `pubkey`.
    pub fn classify(&self, pubkey: &str) -> &FilterGroup {
        self.groups
            .iter()
            .find(|g| g.pubkeys.contains(pubkey))
            .unwrap_or(&self.default)
    }

    /// Decide whether `action` on `pointer` is allowed given the owner's
    /// current totals.
    ///
    /// A publish over both quotas is reported as `SizeQuotaExceeded`.
    pub fn authorize(
        &self,
        pointer: &Pointer,
        action: Action,
        usage: IndexEntry,
    ) -> FilterDecision {
        let group = self.classify(&pointer.pubkey);

        match action {
            Action::Replace if group.canreplace => FilterDecision::Accepted,
            Action::Replace => FilterDecision::ReplaceDenied,
            Action::Delete if group.candelete => FilterDecision::Accepted,
            Action::Delete => FilterDecision::DeleteDenied,
            Action::Publish if !group.canpublish => FilterDecision::PublishDenied,
            Action::Publish => {
                let count = usage.pointer_count.saturating_add(1);
                let size = usage.pointer_hash_sum.saturating_add(pointer.size);

                if group.maximumpointerhashsize != 0 && size > group.maximumpointerhashsize {
                    FilterDecision::SizeQuotaExceeded
                } else if group.maximumpointers != 0 && count > group.maximumpointers {
                    FilterDecision::CountQuotaExceeded
                } else {
                    FilterDecision::Accepted
                }
            }
        }
    }

    pub fn groups(&self) -> &[FilterGroup] {
        &self.groups
    }
}
