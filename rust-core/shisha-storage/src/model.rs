// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Domain records shared by every storage backend.
//
// These are the shapes that cross the storage boundary. Backends map them
// onto their own representation (rows, JSON documents, map entries) and
// must hand back exactly these types.

use serde::{Deserialize, Serialize};

/// Backend-assigned identifier of a [`Shisha`].
pub type ShishaId = i64;

/// A tobacco manufacturer.
///
/// Embedded by value in the memory and document backends; stored as its own
/// table and referenced by foreign key in the relational backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manufacturer {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

impl Manufacturer {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// A manufacturer given by name only, to be resolved by the backend.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(0, name)
    }

    /// True when neither an id nor a name was supplied.
    pub fn is_unset(&self) -> bool {
        self.id == 0 && self.name.is_empty()
    }
}

/// A user's score for a shisha.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub user: String,
    pub score: i32,
    /// Unix seconds, assigned by the server when the rating is appended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Rating {
    /// Build a rating stamped with the current wall-clock time.
    pub fn now(user: impl Into<String>, score: i32) -> Self {
        Self {
            user: user.into(),
            score,
            timestamp: Some(chrono::Utc::now().timestamp()),
        }
    }
}

/// A free-text comment on a shisha.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub user: String,
    pub message: String,
}

impl Comment {
    pub fn new(user: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            message: message.into(),
        }
    }
}

/// A shisha tobacco product with its ratings, comments and smoke counter.
///
/// `ratings` and `comments` are append-only and `smoked` only ever grows;
/// none of them can be set through create or update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shisha {
    #[serde(default)]
    pub id: ShishaId,
    pub name: String,
    #[serde(default)]
    pub flavor: String,
    #[serde(default)]
    pub manufacturer: Manufacturer,
    #[serde(default)]
    pub smoked: i64,
    #[serde(default)]
    pub ratings: Vec<Rating>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Shisha {
    pub fn new(
        name: impl Into<String>,
        flavor: impl Into<String>,
        manufacturer: Manufacturer,
    ) -> Self {
        Self {
            name: name.into(),
            flavor: flavor.into(),
            manufacturer,
            ..Default::default()
        }
    }

    /// Copy of `self` as a fresh record: new id, empty history, zero count.
    pub(crate) fn as_created(&self, id: ShishaId) -> Self {
        Self {
            id,
            name: self.name.clone(),
            flavor: self.flavor.clone(),
            manufacturer: self.manufacturer.clone(),
            smoked: 0,
            ratings: Vec::new(),
            comments: Vec::new(),
        }
    }

    /// Replace the mutable descriptive fields with those of `other`.
    pub(crate) fn apply_update(&mut self, other: &Shisha) {
        self.name = other.name.clone();
        self.flavor = other.flavor.clone();
        self.manufacturer = other.manufacturer.clone();
    }
}

/// Topology of the storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbInfo {
    pub is_cluster: bool,
    pub nodes: u32,
}

impl DbInfo {
    pub fn single_node() -> Self {
        Self {
            is_cluster: false,
            nodes: 1,
        }
    }

    pub fn cluster(nodes: u32) -> Self {
        Self {
            is_cluster: nodes > 1,
            nodes,
        }
    }
}
