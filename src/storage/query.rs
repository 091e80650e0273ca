// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Search criteria for pointer lookups.
//!
//! Clients send a loose JSON object; [`QueryCriteria::parse`] checks it and
//! [`QueryCriteria::into_query`] turns it into a [`PointerQuery`] the
//! database can execute.
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `ids` | pointer id in list |
//! | `owners` | pubkey in list |
//! | `pointerhashes` | pointerhash in list |
//! | `olderthan` | `timestamp < value` |
//! | `since` | `timestamp >= value` |
//! | `size` | `size == value` |
//! | `sizelargerthan` | `size > value` |
//! | `sizesmallerthan` | `size < value` |
//! | `limit` | row cap, default and maximum 1000 |

use serde::Deserialize;
use serde_json::Value;

use crate::pointer::Pointer;

/// Largest number of rows a single query returns.
pub const MAX_QUERY_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("criteria must be a JSON object")]
    NotAnObject,

    #[error("malformed criteria: {0}")]
    Malformed(String),

    #[error("olderthan and since are mutually exclusive")]
    ConflictingTimeBounds,

    #[error("only one of size, sizelargerthan, sizesmallerthan may be given")]
    ConflictingSizeBounds,

    #[error("{0} must not be empty")]
    EmptyList(&'static str),
}

/// Raw criteria as sent by a client. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueryCriteria {
    pub ids: Option<Vec<String>>,
    pub owners: Option<Vec<String>>,
    pub pointerhashes: Option<Vec<String>>,
    pub olderthan: Option<i64>,
    pub since: Option<i64>,
    pub size: Option<u64>,
    pub sizelargerthan: Option<u64>,
    pub sizesmallerthan: Option<u64>,
    pub limit: Option<u64>,
}

impl QueryCriteria {
    pub fn parse(value: &Value) -> Result<Self, QueryError> {
        if !value.is_object() {
            return Err(QueryError::NotAnObject);
        }
        serde_json::from_value(value.clone()).map_err(|e| QueryError::Malformed(e.to_string()))
    }

    /// Validate and translate into an executable query.
    pub fn into_query(self) -> Result<PointerQuery, QueryError> {
        let timestamp = match (self.olderthan, self.since) {
            (Some(_), Some(_)) => return Err(QueryError::ConflictingTimeBounds),
            (Some(t), None) => Some(TimeBound::OlderThan(t)),
            (None, Some(t)) => Some(TimeBound::Since(t)),
            (None, None) => None,
        };

        let sizes = [
            self.size.map(SizeBound::Equal),
            self.sizelargerthan.map(SizeBound::LargerThan),
            self.sizesmallerthan.map(SizeBound::SmallerThan),
        ];
        let mut given = sizes.into_iter().flatten();
        let size = given.next();
        if given.next().is_some() {
            return Err(QueryError::ConflictingSizeBounds);
        }

        let limit = match self.limit {
            Some(n) if n > 0 && n <= MAX_QUERY_LIMIT as u64 => n as usize,
            _ => MAX_QUERY_LIMIT,
        };

        Ok(PointerQuery {
            ids: non_empty("ids", self.ids)?,
            owners: non_empty("owners", self.owners)?,
            pointerhashes: non_empty("pointerhashes", self.pointerhashes)?,
            timestamp,
            size,
            limit,
        })
    }
}

fn non_empty(
    name: &'static str,
    list: Option<Vec<String>>,
) -> Result<Option<Vec<String>>, QueryError> {
    match list {
        Some(items) if items.is_empty() => Err(QueryError::EmptyList(name)),
        other => Ok(other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBound {
    OlderThan(i64),
    Since(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeBound {
    Equal(u64),
    LargerThan(u64),
    SmallerThan(u64),
}

/// A validated pointer query. With no filters set it matches every row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerQuery {
    pub ids: Option<Vec<String>>,
    pub owners: Option<Vec<String>>,
    pub pointerhashes: Option<Vec<String>>,
    pub timestamp: Option<TimeBound>,
    pub size: Option<SizeBound>,
    pub limit: usize,
}

impl Default for PointerQuery {
    fn default() -> Self {
        Self {
            ids: None,
            owners: None,
            pointerhashes: None,
            timestamp: None,
            size: None,
            limit: MAX_QUERY_LIMIT,
        }
    }
}

impl PointerQuery {
    pub fn matches(&self, pointer: &Pointer) -> bool {
        fn listed(list: &Option<Vec<String>>, value: &str) -> bool {
            list.as_ref().is_none_or(|items| items.iter().any(|v| v == value))
        }

        let time_ok = match self.timestamp {
            Some(TimeBound::OlderThan(t)) => pointer.timestamp < t,
            Some(TimeBound::Since(t)) => pointer.timestamp >= t,
            None => true,
        };
        let size_ok = match self.size {
            Some(SizeBound::Equal(s)) => pointer.size == s,
            Some(SizeBound::LargerThan(s)) => pointer.size > s,
            Some(SizeBound::SmallerThan(s)) => pointer.size < s,
            None => true,
        };

        time_ok
            && size_ok
            && listed(&self.ids, &pointer.id)
            && listed(&self.owners, &pointer.pubkey)
            && listed(&self.pointerhashes, &pointer.pointerhash)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn pointer(timestamp: i64, size: u64) -> Pointer {
        Pointer {
            id: "id".into(),
            pubkey: "owner".into(),
            timestamp,
            pointerhash: "hash".into(),
            size,
            nonce: 0,
            signature: "sig".into(),
        }
    }

    fn query(value: Value) -> Result<PointerQuery, QueryError> {
        QueryCriteria::parse(&value)?.into_query()
    }

    #[test]
    fn limit_only_matches_everything() {
        let q = query(json!({"limit": 5})).unwrap();
        assert_eq!(q.limit, 5);
        assert!(q.matches(&pointer(1, 1)));
    }

    #[test]
    fn limit_defaults_and_caps_at_maximum() {
        assert_eq!(query(json!({})).unwrap().limit, MAX_QUERY_LIMIT);
        assert_eq!(query(json!({"limit": 0})).unwrap().limit, MAX_QUERY_LIMIT);
        assert_eq!(query(json!({"limit": 50_000})).unwrap().limit, MAX_QUERY_LIMIT);
    }

    #[test]
    fn time_bounds_translate_to_strict_and_inclusive() {
        let older = query(json!({"olderthan": 100})).unwrap();
        assert!(older.matches(&pointer(99, 1)));
        assert!(!older.matches(&pointer(100, 1)));

        let since = query(json!({"since": 100})).unwrap();
        assert!(since.matches(&pointer(100, 1)));
        assert!(!since.matches(&pointer(99, 1)));
    }

    #[test]
    fn size_bounds() {
        assert!(query(json!({"size": 10})).unwrap().matches(&pointer(1, 10)));
        assert!(!query(json!({"sizelargerthan": 10})).unwrap().matches(&pointer(1, 10)));
        assert!(query(json!({"sizesmallerthan": 11})).unwrap().matches(&pointer(1, 10)));
    }

    #[test]
    fn conflicting_criteria_are_rejected() {
        assert_eq!(
            query(json!({"olderthan": 1, "since": 2})),
            Err(QueryError::ConflictingTimeBounds)
        );
        assert_eq!(
            query(json!({"size": 1, "sizelargerthan": 2})),
            Err(QueryError::ConflictingSizeBounds)
        );
        assert_eq!(query(json!({"ids": []})), Err(QueryError::EmptyList("ids")));
    }

    #[test]
    fn malformed_criteria_are_rejected() {
        assert_eq!(query(json!(["ids"])), Err(QueryError::NotAnObject));
        assert!(matches!(
            query(json!({"size": "big"})),
            Err(QueryError::Malformed(_))
        ));
    }

    #[test]
    fn list_filters_combine() {
        let q = query(json!({"owners": ["owner"], "pointerhashes": ["other"]})).unwrap();
        assert!(!q.matches(&pointer(1, 1)));

        let q = query(json!({"owners": ["x", "owner"], "ids": ["id"]})).unwrap();
        assert!(q.matches(&pointer(1, 1)));
    }
}
