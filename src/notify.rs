// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-row change notifications.
//!
//! Types with a notification tag (hosts, services) announce every row a tick
//! inserted, updated or deleted. Events go to an in-process broadcast channel
//! and, when a stream is configured, to a Redis stream for out-of-process
//! listeners.
//!
//! # Stream Format
//!
//! ```text
//! XADD {prefix}{stream} MAXLEN ~ 100000 *
//!   tag             "host"
//!   op              "update"
//!   id              "a1b2c3..."
//!   environment_id  "e0e1..."
//! ```

use serde::Serialize;

use crate::id::Id;

/// What happened to the row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationOp {
    Insert,
    Update,
    Delete,
}

impl NotificationOp {
    /// Returns the string representation for the stream field
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationOp::Insert => "insert",
            NotificationOp::Update => "update",
            NotificationOp::Delete => "delete",
        }
    }
}

/// One row-level change, ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub tag: &'static str,
    pub op: NotificationOp,
    pub id: Id,
    pub environment_id: Id,
}

impl Notification {
    /// Field/value pairs for `XADD`.
    pub fn to_redis_fields(&self) -> [(&'static str, String); 4] {
        [
            ("tag", self.tag.to_string()),
            ("op", self.op.as_str().to_string()),
            ("id", self.id.to_hex()),
            ("environment_id", self.environment_id.to_hex()),
        ]
    }
}

/// Events for one tick: deletes, then inserts, then updates (write order).
pub fn build_notifications(
    tag: &'static str,
    environment_id: &Id,
    inserted: &[Id],
    updated: &[Id],
    deleted: &[Id],
) -> Vec<Notification> {
    let event = |op, id: &Id| Notification {
        tag,
        op,
        id: id.clone(),
        environment_id: environment_id.clone(),
    };
    deleted
        .iter()
        .map(|id| event(NotificationOp::Delete, id))
        .chain(inserted.iter().map(|id| event(NotificationOp::Insert, id)))
        .chain(updated.iter().map(|id| event(NotificationOp::Update, id)))
        .collect()
}
