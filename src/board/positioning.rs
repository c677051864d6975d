//! Dense, zero-based ordering of one parent's children.
//!
//! Columns are ordered within a board and cards within a column. For every
//! parent the positions of its children are exactly `0..n`. The pure helpers
//! (`resolve_target`, `reinsert`, `diff_positions`, `is_dense`) compute new
//! arrangements; [`PositionedCollection`] reads and writes them through a
//! SQLite connection or transaction.

use std::collections::HashMap;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::errors::BoardError;

/// Which ordered child set an operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    /// Columns of a board.
    Columns,
    /// Cards of a column.
    Cards,
}

impl Sequence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Columns => "columns",
            Self::Cards => "cards",
        }
    }

    fn table(&self) -> &'static str {
        match self {
            Self::Columns => "board_columns",
            Self::Cards => "cards",
        }
    }

    fn parent_key(&self) -> &'static str {
        match self {
            Self::Columns => "board_id",
            Self::Cards => "column_id",
        }
    }

    /// Error for a missing item of this sequence.
    pub fn item_not_found(&self, id: i64) -> BoardError {
        match self {
            Self::Columns => BoardError::ColumnNotFound { id },
            Self::Cards => BoardError::CardNotFound { id },
        }
    }

    /// Error for a missing parent of this sequence.
    pub fn parent_not_found(&self, id: i64) -> BoardError {
        match self {
            Self::Columns => BoardError::BoardNotFound { id },
            Self::Cards => BoardError::ColumnNotFound { id },
        }
    }
}

/// How a requested target index outside `0..=len` is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetPolicy {
    /// Clamp to the nearest valid index; a request for 999 on a short list
    /// lands at the end.
    #[default]
    Clamp,
    /// Fail with [`BoardError::InvalidTarget`] and write nothing.
    Reject,
}

impl std::fmt::Display for TargetPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetPolicy::Clamp => write!(f, "clamp"),
            TargetPolicy::Reject => write!(f, "reject"),
        }
    }
}

impl std::str::FromStr for TargetPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clamp" => Ok(TargetPolicy::Clamp),
            "reject" => Ok(TargetPolicy::Reject),
            _ => anyhow::bail!(
                "Invalid target policy '{}'. Valid values: clamp, reject",
                s
            ),
        }
    }
}

/// The ordering-relevant part of an item row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: i64,
    pub parent_id: i64,
    pub position: i32,
}

/// One row whose parent or position was rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionChange {
    pub id: i64,
    pub parent_id: i64,
    pub old_position: i32,
    pub new_position: i32,
}

// ── Pure ordering logic ───────────────────────────────────────────────

/// Resolve a requested insertion index against a sibling list of `len`
/// items. `None` means "append at the end".
pub fn resolve_target(
    target: Option<i32>,
    len: usize,
    policy: TargetPolicy,
) -> Result<usize, BoardError> {
    let max = i32::try_from(len).unwrap_or(i32::MAX);
    let Some(requested) = target else {
        return Ok(len);
    };
    match policy {
        TargetPolicy::Clamp => Ok(requested.clamp(0, max) as usize),
        TargetPolicy::Reject if (0..=max).contains(&requested) => Ok(requested as usize),
        TargetPolicy::Reject => Err(BoardError::InvalidTarget { requested, max }),
    }
}

/// Insert `moved` into `siblings` (which must not contain it) at the
/// resolved target and renumber the whole sequence by index. Every slot of
/// the result belongs to `parent_id`.
pub fn reinsert(
    parent_id: i64,
    mut siblings: Vec<Slot>,
    moved: Slot,
    target: Option<i32>,
    policy: TargetPolicy,
) -> Result<Vec<Slot>, BoardError> {
    let index = resolve_target(target, siblings.len(), policy)?;
    siblings.insert(index, moved);
    for (i, slot) in siblings.iter_mut().enumerate() {
        slot.parent_id = parent_id;
        slot.position = i as i32;
    }
    Ok(siblings)
}

/// Rows of `after` whose parent or position differ from `before`.
/// Slots absent from `before` are reported with their new position as the
/// old one.
pub fn diff_positions(before: &[Slot], after: &[Slot]) -> Vec<PositionChange> {
    let previous: HashMap<i64, Slot> = before.iter().map(|s| (s.id, *s)).collect();
    after
        .iter()
        .filter_map(|slot| {
            let old = previous.get(&slot.id).copied().unwrap_or(*slot);
            if old.position == slot.position && old.parent_id == slot.parent_id {
                return None;
            }
            Some(PositionChange {
                id: slot.id,
                parent_id: slot.parent_id,
                old_position: old.position,
                new_position: slot.position,
            })
        })
        .collect()
}

/// True when `positions` are exactly `0..n` in some order.
pub fn is_dense<I>(positions: I) -> bool
where
    I: IntoIterator<Item = i32>,
{
    let mut positions: Vec<i32> = positions.into_iter().collect();
    positions.sort_unstable();
    positions
        .iter()
        .enumerate()
        .all(|(i, &p)| p == i as i32)
}

// ── Persistent collection ─────────────────────────────────────────────

/// One sequence kind viewed through a SQLite connection or transaction.
///
/// Callers that mutate must pass a transaction; the collection never begins
/// or commits one itself.
pub struct PositionedCollection<'c> {
    conn: &'c Connection,
    sequence: Sequence,
}

impl<'c> PositionedCollection<'c> {
    pub fn new(conn: &'c Connection, sequence: Sequence) -> Self {
        Self { conn, sequence }
    }

    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Children of `parent_id`, ascending by position (ties broken by id).
    pub fn load_ordered(&self, parent_id: i64) -> Result<Vec<Slot>> {
        let sql = format!(
            "SELECT id, {parent}, position FROM {table} WHERE {parent} = ?1 ORDER BY position, id",
            parent = self.sequence.parent_key(),
            table = self.sequence.table(),
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare load_ordered")?;
        let rows = stmt
            .query_map(params![parent_id], |row| {
                Ok(Slot {
                    id: row.get(0)?,
                    parent_id: row.get(1)?,
                    position: row.get(2)?,
                })
            })
            .with_context(|| format!("Failed to query {}", self.sequence.as_str()))?;
        let mut slots = Vec::new();
        for row in rows {
            slots.push(row.context("Failed to read slot row")?);
        }
        Ok(slots)
    }

    /// Current slot of a single item.
    pub fn find(&self, item_id: i64) -> Result<Option<Slot>> {
        let sql = format!(
            "SELECT id, {parent}, position FROM {table} WHERE id = ?1",
            parent = self.sequence.parent_key(),
            table = self.sequence.table(),
        );
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare find")?;
        let mut rows = stmt
            .query_map(params![item_id], |row| {
                Ok(Slot {
                    id: row.get(0)?,
                    parent_id: row.get(1)?,
                    position: row.get(2)?,
                })
            })
            .context("Failed to query slot")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read slot row")?)),
            None => Ok(None),
        }
    }

    /// Board that a parent belongs to, or `None` when the parent is missing.
    /// For columns the parent is the board itself.
    pub fn parent_board(&self, parent_id: i64) -> Result<Option<i64>> {
        let sql = match self.sequence {
            Sequence::Columns => "SELECT id FROM boards WHERE id = ?1",
            Sequence::Cards => "SELECT board_id FROM board_columns WHERE id = ?1",
        };
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare parent_board")?;
        let mut rows = stmt
            .query_map(params![parent_id], |row| row.get::<_, i64>(0))
            .context("Failed to query parent board")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read parent board row")?)),
            None => Ok(None),
        }
    }

    /// Position a new child of `parent_id` must take: the current sibling
    /// count. No existing sibling moves.
    pub fn append_at_end(&self, parent_id: i64) -> Result<i32> {
        let sql = format!(
            "SELECT COUNT(*) FROM {table} WHERE {parent} = ?1",
            parent = self.sequence.parent_key(),
            table = self.sequence.table(),
        );
        let count: i32 = self
            .conn
            .query_row(&sql, params![parent_id], |row| row.get(0))
            .context("Failed to count siblings")?;
        Ok(count)
    }

    /// Close the gap left at `removed_position`: every sibling above it moves
    /// down by one, siblings below are untouched.
    pub fn remove_and_compact(
        &self,
        parent_id: i64,
        removed_position: i32,
    ) -> Result<Vec<PositionChange>> {
        let shifted: Vec<PositionChange> = self
            .load_ordered(parent_id)?
            .into_iter()
            .filter(|s| s.position > removed_position)
            .map(|s| PositionChange {
                id: s.id,
                parent_id,
                old_position: s.position,
                new_position: s.position - 1,
            })
            .collect();
        if shifted.is_empty() {
            return Ok(shifted);
        }

        let sql = format!(
            "UPDATE {table} SET position = position - 1, revision = revision + 1
             WHERE {parent} = ?1 AND position > ?2",
            parent = self.sequence.parent_key(),
            table = self.sequence.table(),
        );
        self.conn
            .execute(&sql, params![parent_id, removed_position])
            .context("Failed to compact positions")?;
        Ok(shifted)
    }

    /// Delete one item row. Child rows go with it through `ON DELETE CASCADE`.
    pub fn delete_row(&self, item_id: i64) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", self.sequence.table());
        let count = self
            .conn
            .execute(&sql, params![item_id])
            .with_context(|| format!("Failed to delete from {}", self.sequence.as_str()))?;
        Ok(count > 0)
    }

    /// Persist the difference between two arrangements. Only rows whose
    /// parent or position changed are written.
    pub fn write_changes(&self, before: &[Slot], after: &[Slot]) -> Result<Vec<PositionChange>> {
        let changes = diff_positions(before, after);
        if changes.is_empty() {
            return Ok(changes);
        }

        let sql = format!(
            "UPDATE {table} SET {parent} = ?1, position = ?2, revision = revision + 1 WHERE id = ?3",
            parent = self.sequence.parent_key(),
            table = self.sequence.table(),
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare position update")?;
        for change in &changes {
            stmt.execute(params![change.parent_id, change.new_position, change.id])
                .context("Failed to write position")?;
        }
        Ok(changes)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::db::BoardDb;
    use proptest::prelude::*;

    fn slots(parent_id: i64, ids: &[i64]) -> Vec<Slot> {
        ids.iter()
            .enumerate()
            .map(|(i, &id)| Slot {
                id,
                parent_id,
                position: i as i32,
            })
            .collect()
    }

    fn ids(slots: &[Slot]) -> Vec<i64> {
        slots.iter().map(|s| s.id).collect()
    }

    #[test]
    fn test_resolve_target_defaults_to_end() {
        assert_eq!(resolve_target(None, 3, TargetPolicy::Clamp).unwrap(), 3);
        assert_eq!(resolve_target(None, 0, TargetPolicy::Reject).unwrap(), 0);
    }

    #[test]
    fn test_resolve_target_clamps_out_of_range() {
        assert_eq!(resolve_target(Some(50), 2, TargetPolicy::Clamp).unwrap(), 2);
        assert_eq!(resolve_target(Some(-4), 2, TargetPolicy::Clamp).unwrap(), 0);
        assert_eq!(resolve_target(Some(1), 2, TargetPolicy::Clamp).unwrap(), 1);
    }

    #[test]
    fn test_resolve_target_rejects_out_of_range() {
        let err = resolve_target(Some(3), 2, TargetPolicy::Reject).unwrap_err();
        assert!(matches!(
            err,
            BoardError::InvalidTarget {
                requested: 3,
                max: 2
            }
        ));
        assert!(resolve_target(Some(-1), 2, TargetPolicy::Reject).is_err());
        assert_eq!(resolve_target(Some(2), 2, TargetPolicy::Reject).unwrap(), 2);
    }

    #[test]
    fn test_reinsert_moves_first_to_last() {
        // [A, B, C] with A moved to 2 → [B, C, A]
        let siblings = slots(1, &[20, 30]);
        let moved = Slot {
            id: 10,
            parent_id: 1,
            position: 0,
        };
        let after = reinsert(1, siblings, moved, Some(2), TargetPolicy::Clamp).unwrap();
        assert_eq!(ids(&after), vec![20, 30, 10]);
        assert!(is_dense(after.iter().map(|s| s.position)));
    }

    #[test]
    fn test_reinsert_assigns_destination_parent() {
        let moved = Slot {
            id: 10,
            parent_id: 1,
            position: 0,
        };
        let after = reinsert(2, slots(2, &[99]), moved, Some(0), TargetPolicy::Clamp).unwrap();
        assert_eq!(ids(&after), vec![10, 99]);
        assert!(after.iter().all(|s| s.parent_id == 2));
    }

    #[test]
    fn test_diff_reports_only_changed_rows() {
        let before = slots(1, &[10, 20, 30, 40]);
        // Swap the last two only.
        let after = slots(1, &[10, 20, 40, 30]);
        let changes = diff_positions(&before, &after);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.id == 30 || c.id == 40));
    }

    #[test]
    fn test_diff_of_identical_arrangement_is_empty() {
        let before = slots(1, &[10, 20, 30]);
        assert!(diff_positions(&before, &before.clone()).is_empty());
    }

    #[test]
    fn test_is_dense_detects_gaps_and_duplicates() {
        assert!(is_dense(vec![]));
        assert!(is_dense(vec![2, 0, 1]));
        assert!(!is_dense(vec![0, 2]));
        assert!(!is_dense(vec![0, 1, 1]));
        assert!(!is_dense(vec![1, 2]));
    }

    #[test]
    fn test_target_policy_parses_case_insensitively() {
        assert_eq!("Clamp".parse::<TargetPolicy>().unwrap(), TargetPolicy::Clamp);
        assert_eq!("reject".parse::<TargetPolicy>().unwrap(), TargetPolicy::Reject);
        assert!("wrap".parse::<TargetPolicy>().is_err());
        assert_eq!(TargetPolicy::default(), TargetPolicy::Clamp);
    }

    #[test]
    fn test_collection_appends_and_compacts() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let user = db.create_user("ada", "ada@example.com")?;
        let board = db.create_board(user.id, "Roadmap", "")?;
        let col = db.create_column(board.id, "Todo")?;
        let a = db.create_card(board.id, col.id, "A", "")?;
        let b = db.create_card(board.id, col.id, "B", "")?;
        let c = db.create_card(board.id, col.id, "C", "")?;

        let collection = PositionedCollection::new(db.conn(), Sequence::Cards);
        assert_eq!(collection.append_at_end(col.id)?, 3);
        assert_eq!(ids(&collection.load_ordered(col.id)?), vec![a.id, b.id, c.id]);

        // Pretend A was removed: B and C shift down, nothing else moves.
        let shifted = collection.remove_and_compact(col.id, 0)?;
        assert_eq!(shifted.len(), 2);
        let after = collection.load_ordered(col.id)?;
        let positions: Vec<(i64, i32)> = after.iter().map(|s| (s.id, s.position)).collect();
        assert!(positions.contains(&(a.id, 0)));
        assert!(positions.contains(&(b.id, 0)));
        assert!(positions.contains(&(c.id, 1)));
        Ok(())
    }

    #[test]
    fn test_compacting_the_last_position_writes_nothing() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let user = db.create_user("ada", "ada@example.com")?;
        let board = db.create_board(user.id, "Roadmap", "")?;
        let col = db.create_column(board.id, "Todo")?;
        db.create_card(board.id, col.id, "A", "")?;
        db.create_card(board.id, col.id, "B", "")?;

        let collection = PositionedCollection::new(db.conn(), Sequence::Cards);
        assert!(collection.remove_and_compact(col.id, 1)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_parent_board_resolves_columns_and_boards() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let user = db.create_user("ada", "ada@example.com")?;
        let board = db.create_board(user.id, "Roadmap", "")?;
        let col = db.create_column(board.id, "Todo")?;

        let cards = PositionedCollection::new(db.conn(), Sequence::Cards);
        assert_eq!(cards.parent_board(col.id)?, Some(board.id));
        assert_eq!(cards.parent_board(9999)?, None);

        let columns = PositionedCollection::new(db.conn(), Sequence::Columns);
        assert_eq!(columns.parent_board(board.id)?, Some(board.id));
        Ok(())
    }

    proptest! {
        #[test]
        fn test_reinsert_always_yields_dense_permutation(
            len in 0usize..12,
            moved_from in 0usize..12,
            target in proptest::option::of(-20i32..40),
        ) {
            let all: Vec<i64> = (1..=(len as i64 + 1)).collect();
            let from = moved_from % all.len();
            let moved = Slot { id: all[from], parent_id: 1, position: from as i32 };
            let siblings: Vec<Slot> = slots(1, &all)
                .into_iter()
                .filter(|s| s.id != moved.id)
                .collect();

            let after = reinsert(1, siblings, moved, target, TargetPolicy::Clamp).unwrap();

            prop_assert_eq!(after.len(), all.len());
            prop_assert!(is_dense(after.iter().map(|s| s.position)));
            let mut seen = ids(&after);
            seen.sort_unstable();
            prop_assert_eq!(seen, all);
        }

        #[test]
        fn test_reinsert_preserves_relative_order_of_untouched_siblings(
            len in 1usize..12,
            target in 0i32..12,
        ) {
            let all: Vec<i64> = (1..=len as i64).collect();
            let moved = Slot { id: 1000, parent_id: 2, position: 0 };
            let after = reinsert(1, slots(1, &all), moved, Some(target), TargetPolicy::Clamp).unwrap();
            let rest: Vec<i64> = after.iter().map(|s| s.id).filter(|&id| id != 1000).collect();
            prop_assert_eq!(rest, all);
        }
    }
}
