//! Transactional append / delete / move over positioned collections.
//!
//! Every operation is `begin → mutate → commit` on one SQLite transaction.
//! An error anywhere before the commit drops the transaction, which rolls
//! back every position write of that operation. A cross-parent move touches
//! both parents inside the same transaction.

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use super::positioning::{PositionChange, PositionedCollection, Sequence, Slot, TargetPolicy, reinsert};
use crate::errors::BoardError;

/// A client request to relocate one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveRequest {
    pub item_id: i64,
    /// Destination parent; `None` keeps the current parent.
    pub target_parent: Option<i64>,
    /// Destination index; `None` appends at the end of the destination.
    pub target_position: Option<i32>,
}

/// What a move did. `writes` is empty when nothing had to change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderOutcome {
    pub item_id: i64,
    pub from_parent: i64,
    pub to_parent: i64,
    pub old_position: i32,
    pub new_position: i32,
    pub writes: Vec<PositionChange>,
}

impl ReorderOutcome {
    fn unchanged(item: Slot) -> Self {
        Self {
            item_id: item.id,
            from_parent: item.parent_id,
            to_parent: item.parent_id,
            old_position: item.position,
            new_position: item.position,
            writes: Vec::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Applies reorder requests against the persisted ordering.
///
/// The current sequence is always re-read from the store inside the
/// transaction; client-side snapshots are never trusted.
pub struct ReorderCoordinator<'c> {
    conn: &'c Connection,
    policy: TargetPolicy,
}

impl<'c> ReorderCoordinator<'c> {
    pub fn new(conn: &'c Connection, policy: TargetPolicy) -> Self {
        Self { conn, policy }
    }

    /// Append a new child at the end of `parent_id`. `insert` receives the
    /// open transaction and the assigned position and returns the new id.
    pub fn append<F>(&self, sequence: Sequence, parent_id: i64, insert: F) -> Result<(i64, i32)>
    where
        F: FnOnce(&Connection, i32) -> Result<i64>,
    {
        // Callers hold the DbHandle mutex; no other transaction is open.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let collection = PositionedCollection::new(&tx, sequence);
        if collection.parent_board(parent_id)?.is_none() {
            return Err(sequence.parent_not_found(parent_id).into());
        }
        let position = collection.append_at_end(parent_id)?;
        let id = insert(&*tx, position)?;
        tx.commit().context("Failed to commit append")?;

        debug!(sequence = sequence.as_str(), item_id = id, parent_id, position, "appended item");
        Ok((id, position))
    }

    /// Delete an item and close the gap it leaves among its siblings.
    pub fn delete(&self, sequence: Sequence, item_id: i64) -> Result<Slot> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let collection = PositionedCollection::new(&tx, sequence);
        let slot = collection
            .find(item_id)?
            .ok_or_else(|| sequence.item_not_found(item_id))?;

        collection.delete_row(item_id)?;
        let shifted = collection.remove_and_compact(slot.parent_id, slot.position)?;
        tx.commit().context("Failed to commit delete")?;

        debug!(
            sequence = sequence.as_str(),
            item_id,
            parent_id = slot.parent_id,
            position = slot.position,
            shifted = shifted.len(),
            "deleted item"
        );
        Ok(slot)
    }

    /// Move an item within its parent or to another parent on the same board.
    pub fn move_item(&self, sequence: Sequence, request: MoveRequest) -> Result<ReorderOutcome> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let collection = PositionedCollection::new(&tx, sequence);
        let item = collection
            .find(request.item_id)?
            .ok_or_else(|| sequence.item_not_found(request.item_id))?;
        let target_parent = request.target_parent.unwrap_or(item.parent_id);

        let outcome = if target_parent == item.parent_id {
            if request.target_position == Some(item.position) {
                debug!(sequence = sequence.as_str(), item_id = item.id, "move is a no-op");
                return Ok(ReorderOutcome::unchanged(item));
            }
            self.move_within(&collection, item, request.target_position)?
        } else {
            self.move_across(&collection, item, target_parent, request.target_position)?
        };
        tx.commit().context("Failed to commit move")?;

        debug!(
            sequence = sequence.as_str(),
            item_id = outcome.item_id,
            from_parent = outcome.from_parent,
            to_parent = outcome.to_parent,
            old_position = outcome.old_position,
            new_position = outcome.new_position,
            writes = outcome.writes.len(),
            "moved item"
        );
        Ok(outcome)
    }

    fn move_within(
        &self,
        collection: &PositionedCollection<'_>,
        item: Slot,
        target: Option<i32>,
    ) -> Result<ReorderOutcome> {
        let before = collection.load_ordered(item.parent_id)?;
        let siblings: Vec<Slot> = before.iter().copied().filter(|s| s.id != item.id).collect();
        let after = reinsert(item.parent_id, siblings, item, target, self.policy)?;
        let writes = collection.write_changes(&before, &after)?;

        Ok(ReorderOutcome {
            item_id: item.id,
            from_parent: item.parent_id,
            to_parent: item.parent_id,
            old_position: item.position,
            new_position: position_of(&after, item.id),
            writes,
        })
    }

    fn move_across(
        &self,
        collection: &PositionedCollection<'_>,
        item: Slot,
        target_parent: i64,
        target: Option<i32>,
    ) -> Result<ReorderOutcome> {
        let sequence = collection.sequence();
        if sequence == Sequence::Columns {
            return Err(BoardError::BadRequest("Columns cannot move between boards".into()).into());
        }

        // The destination must exist on the same board; checked before any write.
        let source_board = collection.parent_board(item.parent_id)?;
        let target_board = collection.parent_board(target_parent)?;
        if target_board.is_none() || target_board != source_board {
            return Err(sequence.parent_not_found(target_parent).into());
        }

        let destination = collection.load_ordered(target_parent)?;
        let after = reinsert(target_parent, destination.clone(), item, target, self.policy)?;

        let mut writes = collection.remove_and_compact(item.parent_id, item.position)?;
        let mut before = destination;
        before.push(item);
        writes.extend(collection.write_changes(&before, &after)?);

        Ok(ReorderOutcome {
            item_id: item.id,
            from_parent: item.parent_id,
            to_parent: target_parent,
            old_position: item.position,
            new_position: position_of(&after, item.id),
            writes,
        })
    }
}

fn position_of(slots: &[Slot], id: i64) -> i32 {
    slots
        .iter()
        .find(|s| s.id == id)
        .map(|s| s.position)
        .unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────────────
