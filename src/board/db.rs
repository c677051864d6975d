use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::members;
use super::models::*;
use super::positioning::{Sequence, TargetPolicy};
use super::reorder::{MoveRequest, ReorderCoordinator, ReorderOutcome};
use crate::errors::BoardError;

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`. The mutex also serializes
/// every reorder's read-compute-write cycle within this process.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| BoardError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct BoardDb {
    conn: Connection,
    policy: TargetPolicy,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        let db = Self {
            conn,
            policy: TargetPolicy::default(),
        };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self {
            conn,
            policy: TargetPolicy::default(),
        };
        db.init()?;
        Ok(db)
    }

    /// Set how out-of-range move targets are handled.
    pub fn with_policy(mut self, policy: TargetPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    fn coordinator(&self) -> ReorderCoordinator<'_> {
        ReorderCoordinator::new(&self.conn, self.policy)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS boards (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS board_members (
                    board_id INTEGER NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    role TEXT NOT NULL DEFAULT 'member',
                    PRIMARY KEY (board_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS board_columns (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    board_id INTEGER NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    revision INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS cards (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    column_id INTEGER NOT NULL REFERENCES board_columns(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    due_date TEXT,
                    position INTEGER NOT NULL,
                    revision INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS labels (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    board_id INTEGER NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                    title TEXT NOT NULL DEFAULT '',
                    color TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS card_labels (
                    card_id INTEGER NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
                    label_id INTEGER NOT NULL REFERENCES labels(id) ON DELETE CASCADE,
                    PRIMARY KEY (card_id, label_id)
                );

                CREATE TABLE IF NOT EXISTS card_assignees (
                    card_id INTEGER NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    PRIMARY KEY (card_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS comments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    card_id INTEGER NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_members_user ON board_members(user_id);
                CREATE INDEX IF NOT EXISTS idx_columns_board ON board_columns(board_id, position);
                CREATE INDEX IF NOT EXISTS idx_cards_column ON cards(column_id, position);
                CREATE INDEX IF NOT EXISTS idx_labels_board ON labels(board_id);
                CREATE INDEX IF NOT EXISTS idx_comments_card ON comments(card_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub fn create_user(&self, name: &str, email: &str) -> Result<User> {
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() {
            return Err(BoardError::BadRequest("Name is required".into()).into());
        }
        if !email.contains('@') {
            return Err(BoardError::BadRequest("Invalid email".into()).into());
        }
        if self.find_user_by_email(email)?.is_some() {
            return Err(
                BoardError::BadRequest("Account with given email already exists".into()).into(),
            );
        }

        self.conn
            .execute(
                "INSERT INTO users (name, email) VALUES (?1, ?2)",
                params![name, email],
            )
            .context("Failed to insert user")?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, name, email FROM users WHERE id = ?1",
                params![id],
                user_from_row,
            )
            .optional()
            .context("Failed to query user")
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, name, email FROM users WHERE email = ?1 COLLATE NOCASE",
                params![email],
                user_from_row,
            )
            .optional()
            .context("Failed to query user by email")
    }

    // ── Boards ────────────────────────────────────────────────────────

    /// Create a board owned by `owner_id`, seeded with the default labels.
    pub fn create_board(&self, owner_id: i64, title: &str, description: &str) -> Result<Board> {
        let title = require_text(title, "Title")?;
        if self.get_user(owner_id)?.is_none() {
            return Err(BoardError::UserNotFound.into());
        }

        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO boards (title, description) VALUES (?1, ?2)",
            params![title, description],
        )
        .context("Failed to insert board")?;
        let board_id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO board_members (board_id, user_id, role) VALUES (?1, ?2, ?3)",
            params![board_id, owner_id, MemberRole::Owner.as_str()],
        )
        .context("Failed to insert board owner")?;
        for color in DEFAULT_LABEL_COLORS {
            tx.execute(
                "INSERT INTO labels (board_id, title, color) VALUES (?1, '', ?2)",
                params![board_id, color],
            )
            .context("Failed to insert default label")?;
        }
        tx.commit().context("Failed to commit board creation")?;

        self.get_board(board_id)?
            .context("Board not found after insert")
    }

    pub fn get_board(&self, id: i64) -> Result<Option<Board>> {
        self.conn
            .query_row(
                "SELECT id, title, description, created_at FROM boards WHERE id = ?1",
                params![id],
                board_from_row,
            )
            .optional()
            .context("Failed to query board")
    }

    /// Boards on which `user_id` holds any role.
    pub fn list_boards_for_user(&self, user_id: i64) -> Result<Vec<Board>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT b.id, b.title, b.description, b.created_at
                 FROM boards b JOIN board_members m ON m.board_id = b.id
                 WHERE m.user_id = ?1 ORDER BY b.id",
            )
            .context("Failed to prepare list_boards_for_user")?;
        let rows = stmt
            .query_map(params![user_id], board_from_row)
            .context("Failed to query boards")?;
        collect_rows(rows, "board")
    }

    pub fn update_board(&self, id: i64, title: &str, description: &str) -> Result<Board> {
        let title = require_text(title, "Title")?;
        let count = self
            .conn
            .execute(
                "UPDATE boards SET title = ?1, description = ?2 WHERE id = ?3",
                params![title, description, id],
            )
            .context("Failed to update board")?;
        if count == 0 {
            return Err(BoardError::BoardNotFound { id }.into());
        }
        self.get_board(id)?.context("Board not found after update")
    }

    /// Delete a board; columns, cards, labels and memberships cascade.
    pub fn delete_board(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM boards WHERE id = ?1", params![id])
            .context("Failed to delete board")?;
        Ok(count > 0)
    }

    /// Board with its members and every column's cards, all in position order.
    pub fn get_board_view(&self, id: i64) -> Result<Option<BoardView>> {
        let Some(board) = self.get_board(id)? else {
            return Ok(None);
        };
        let members = self.list_members(id)?;
        let mut columns = Vec::new();
        for column in self.list_columns(id)? {
            let cards = self.list_column_cards(column.id)?;
            columns.push(ColumnView { column, cards });
        }
        Ok(Some(BoardView {
            board,
            members,
            columns,
        }))
    }

    // ── Membership ────────────────────────────────────────────────────

    pub fn member_role(&self, board_id: i64, user_id: i64) -> Result<Option<MemberRole>> {
        let role: Option<String> = self
            .conn
            .query_row(
                "SELECT role FROM board_members WHERE board_id = ?1 AND user_id = ?2",
                params![board_id, user_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query member role")?;
        role.map(|r| parse_role(&r)).transpose()
    }

    /// Role of `user_id` on an existing board. Fails with `BoardNotFound`
    /// when the board is missing and `AccessDenied` for non-members.
    pub fn require_member(&self, board_id: i64, user_id: i64) -> Result<MemberRole> {
        if self.get_board(board_id)?.is_none() {
            return Err(BoardError::BoardNotFound { id: board_id }.into());
        }
        self.member_role(board_id, user_id)?
            .ok_or_else(|| BoardError::AccessDenied { board_id }.into())
    }

    pub fn list_members(&self, board_id: i64) -> Result<Vec<BoardMember>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT m.board_id, m.user_id, u.name, u.email, m.role
                 FROM board_members m JOIN users u ON u.id = m.user_id
                 WHERE m.board_id = ?1 ORDER BY m.user_id",
            )
            .context("Failed to prepare list_members")?;
        let rows = stmt
            .query_map(params![board_id], MemberRow::from_row)
            .context("Failed to query members")?;
        collect_rows(rows, "member")?
            .into_iter()
            .map(MemberRow::into_member)
            .collect()
    }

    pub fn get_member(&self, board_id: i64, user_id: i64) -> Result<Option<BoardMember>> {
        let row = self
            .conn
            .query_row(
                "SELECT m.board_id, m.user_id, u.name, u.email, m.role
                 FROM board_members m JOIN users u ON u.id = m.user_id
                 WHERE m.board_id = ?1 AND m.user_id = ?2",
                params![board_id, user_id],
                MemberRow::from_row,
            )
            .optional()
            .context("Failed to query member")?;
        row.map(MemberRow::into_member).transpose()
    }

    /// Add the user registered under `email` to the board.
    pub fn add_member(
        &self,
        board_id: i64,
        actor_id: i64,
        email: &str,
        role: MemberRole,
    ) -> Result<BoardMember> {
        let actor = self.require_member(board_id, actor_id)?;
        members::check_add(actor, role)?;
        let user = self
            .find_user_by_email(email.trim())?
            .ok_or(BoardError::UserNotFound)?;
        if self.member_role(board_id, user.id)?.is_some() {
            return Err(
                BoardError::BadRequest("User is already a member of this board".into()).into(),
            );
        }

        self.conn
            .execute(
                "INSERT INTO board_members (board_id, user_id, role) VALUES (?1, ?2, ?3)",
                params![board_id, user.id, role.as_str()],
            )
            .context("Failed to insert member")?;
        self.get_member(board_id, user.id)?
            .context("Member not found after insert")
    }

    pub fn set_member_role(
        &self,
        board_id: i64,
        actor_id: i64,
        user_id: i64,
        role: MemberRole,
    ) -> Result<BoardMember> {
        let actor = self.require_member(board_id, actor_id)?;
        let current = self
            .member_role(board_id, user_id)?
            .ok_or(BoardError::MemberNotFound { user_id })?;
        members::check_role_change(actor, current, role)?;

        self.conn
            .execute(
                "UPDATE board_members SET role = ?1 WHERE board_id = ?2 AND user_id = ?3",
                params![role.as_str(), board_id, user_id],
            )
            .context("Failed to update member role")?;
        self.get_member(board_id, user_id)?
            .context("Member not found after role update")
    }

    pub fn remove_member(&self, board_id: i64, actor_id: i64, user_id: i64) -> Result<()> {
        let actor = self.require_member(board_id, actor_id)?;
        let target = self
            .member_role(board_id, user_id)?
            .ok_or(BoardError::MemberNotFound { user_id })?;
        members::check_remove(actor, target)?;
        self.drop_membership(board_id, user_id)
    }

    /// The caller gives up their own membership.
    pub fn leave_board(&self, board_id: i64, user_id: i64) -> Result<()> {
        let role = self.require_member(board_id, user_id)?;
        members::check_leave(role)?;
        self.drop_membership(board_id, user_id)
    }

    /// Delete a membership together with the user's card assignments on
    /// that board, so assignees are always members.
    fn drop_membership(&self, board_id: i64, user_id: i64) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "DELETE FROM card_assignees WHERE user_id = ?1 AND card_id IN (
                SELECT c.id FROM cards c JOIN board_columns col ON col.id = c.column_id
                WHERE col.board_id = ?2)",
            params![user_id, board_id],
        )
        .context("Failed to delete card assignments")?;
        tx.execute(
            "DELETE FROM board_members WHERE board_id = ?1 AND user_id = ?2",
            params![board_id, user_id],
        )
        .context("Failed to delete member")?;
        tx.commit().context("Failed to commit member removal")?;
        Ok(())
    }

    /// The current owner becomes an admin and `new_owner_id` the owner.
    pub fn transfer_ownership(&self, board_id: i64, actor_id: i64, new_owner_id: i64) -> Result<()> {
        let actor = self.require_member(board_id, actor_id)?;
        members::check_transfer(actor)?;
        if self.member_role(board_id, new_owner_id)?.is_none() {
            return Err(BoardError::MemberNotFound {
                user_id: new_owner_id,
            }
            .into());
        }
        if new_owner_id == actor_id {
            return Ok(());
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "UPDATE board_members SET role = ?1 WHERE board_id = ?2 AND user_id = ?3",
            params![MemberRole::Admin.as_str(), board_id, actor_id],
        )
        .context("Failed to demote previous owner")?;
        tx.execute(
            "UPDATE board_members SET role = ?1 WHERE board_id = ?2 AND user_id = ?3",
            params![MemberRole::Owner.as_str(), board_id, new_owner_id],
        )
        .context("Failed to promote new owner")?;
        tx.commit().context("Failed to commit ownership transfer")?;
        Ok(())
    }

    // ── Columns ───────────────────────────────────────────────────────

    pub fn list_columns(&self, board_id: i64) -> Result<Vec<Column>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, board_id, title, position, revision FROM board_columns
                 WHERE board_id = ?1 ORDER BY position, id",
            )
            .context("Failed to prepare list_columns")?;
        let rows = stmt
            .query_map(params![board_id], column_from_row)
            .context("Failed to query columns")?;
        collect_rows(rows, "column")
    }

    /// A column, only when it belongs to `board_id`.
    pub fn get_column(&self, board_id: i64, column_id: i64) -> Result<Option<Column>> {
        self.conn
            .query_row(
                "SELECT id, board_id, title, position, revision FROM board_columns
                 WHERE id = ?1 AND board_id = ?2",
                params![column_id, board_id],
                column_from_row,
            )
            .optional()
            .context("Failed to query column")
    }

    pub fn get_column_view(&self, board_id: i64, column_id: i64) -> Result<Option<ColumnView>> {
        let Some(column) = self.get_column(board_id, column_id)? else {
            return Ok(None);
        };
        let cards = self.list_column_cards(column.id)?;
        Ok(Some(ColumnView { column, cards }))
    }

    /// Append a column at the end of the board.
    pub fn create_column(&self, board_id: i64, title: &str) -> Result<Column> {
        let title = require_text(title, "Title")?;
        let (id, _) = self
            .coordinator()
            .append(Sequence::Columns, board_id, |tx, position| {
                tx.execute(
                    "INSERT INTO board_columns (board_id, title, position) VALUES (?1, ?2, ?3)",
                    params![board_id, title, position],
                )
                .context("Failed to insert column")?;
                Ok(tx.last_insert_rowid())
            })?;
        self.get_column(board_id, id)?
            .context("Column not found after insert")
    }

    pub fn rename_column(&self, board_id: i64, column_id: i64, title: &str) -> Result<Column> {
        let title = require_text(title, "Title")?;
        let count = self
            .conn
            .execute(
                "UPDATE board_columns SET title = ?1 WHERE id = ?2 AND board_id = ?3",
                params![title, column_id, board_id],
            )
            .context("Failed to rename column")?;
        if count == 0 {
            return Err(BoardError::ColumnNotFound { id: column_id }.into());
        }
        self.get_column(board_id, column_id)?
            .context("Column not found after rename")
    }

    /// Delete a column with all of its cards and close the gap it leaves.
    pub fn delete_column(&self, board_id: i64, column_id: i64) -> Result<()> {
        if self.get_column(board_id, column_id)?.is_none() {
            return Err(BoardError::ColumnNotFound { id: column_id }.into());
        }
        self.coordinator().delete(Sequence::Columns, column_id)?;
        Ok(())
    }

    /// Move a column within its board. `None` moves it to the end.
    pub fn move_column(
        &self,
        board_id: i64,
        column_id: i64,
        new_position: Option<i32>,
    ) -> Result<ReorderOutcome> {
        if self.get_column(board_id, column_id)?.is_none() {
            return Err(BoardError::ColumnNotFound { id: column_id }.into());
        }
        self.coordinator().move_item(
            Sequence::Columns,
            MoveRequest {
                item_id: column_id,
                target_parent: None,
                target_position: new_position,
            },
        )
    }

    // ── Cards ─────────────────────────────────────────────────────────

    /// Cards of one column in position order.
    pub fn list_column_cards(&self, column_id: i64) -> Result<Vec<Card>> {
        let sql = format!(
            "SELECT {CARD_FIELDS} FROM cards c WHERE c.column_id = ?1 ORDER BY c.position, c.id"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_column_cards")?;
        let rows = stmt
            .query_map(params![column_id], card_from_row)
            .context("Failed to query cards")?;
        collect_rows(rows, "card")
    }

    /// Every card on a board, grouped by column order then card order.
    pub fn list_board_cards(&self, board_id: i64) -> Result<Vec<Card>> {
        let sql = format!(
            "SELECT {CARD_FIELDS} FROM cards c JOIN board_columns col ON col.id = c.column_id
             WHERE col.board_id = ?1 ORDER BY col.position, c.position, c.id"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_board_cards")?;
        let rows = stmt
            .query_map(params![board_id], card_from_row)
            .context("Failed to query cards")?;
        collect_rows(rows, "card")
    }

    /// A card, only when its column belongs to `board_id`.
    pub fn get_card(&self, board_id: i64, card_id: i64) -> Result<Option<Card>> {
        let sql = format!(
            "SELECT {CARD_FIELDS} FROM cards c JOIN board_columns col ON col.id = c.column_id
             WHERE c.id = ?1 AND col.board_id = ?2"
        );
        self.conn
            .query_row(&sql, params![card_id, board_id], card_from_row)
            .optional()
            .context("Failed to query card")
    }

    fn require_card(&self, board_id: i64, card_id: i64) -> Result<Card> {
        self.get_card(board_id, card_id)?
            .ok_or_else(|| BoardError::CardNotFound { id: card_id }.into())
    }

    pub fn get_card_detail(&self, board_id: i64, card_id: i64) -> Result<Option<CardDetail>> {
        let Some(card) = self.get_card(board_id, card_id)? else {
            return Ok(None);
        };
        let labels = self.list_card_labels(card.id)?;
        let assigned_to = self.list_card_assignees(card.id)?;
        let comments = self.list_card_comments(card.id)?;
        Ok(Some(CardDetail {
            card,
            labels,
            assigned_to,
            comments,
        }))
    }

    /// Append a card at the end of `column_id`, which must be on `board_id`.
    pub fn create_card(
        &self,
        board_id: i64,
        column_id: i64,
        title: &str,
        description: &str,
    ) -> Result<Card> {
        let title = require_text(title, "Title")?;
        if self.get_column(board_id, column_id)?.is_none() {
            return Err(BoardError::ColumnNotFound { id: column_id }.into());
        }
        let (id, _) = self
            .coordinator()
            .append(Sequence::Cards, column_id, |tx, position| {
                tx.execute(
                    "INSERT INTO cards (column_id, title, description, position) VALUES (?1, ?2, ?3, ?4)",
                    params![column_id, title, description, position],
                )
                .context("Failed to insert card")?;
                Ok(tx.last_insert_rowid())
            })?;
        self.get_card(board_id, id)?
            .context("Card not found after insert")
    }

    /// Replace a card's title, description and due date.
    pub fn update_card(
        &self,
        board_id: i64,
        card_id: i64,
        title: &str,
        description: &str,
        due_date: Option<&str>,
    ) -> Result<Card> {
        let title = require_text(title, "Title")?;
        let due_date = due_date.map(normalize_due_date).transpose()?;
        self.require_card(board_id, card_id)?;

        self.conn
            .execute(
                "UPDATE cards SET title = ?1, description = ?2, due_date = ?3,
                 updated_at = datetime('now') WHERE id = ?4",
                params![title, description, due_date, card_id],
            )
            .context("Failed to update card")?;
        self.get_card(board_id, card_id)?
            .context("Card not found after update")
    }

    /// Delete a card and close the gap in its column.
    pub fn delete_card(&self, board_id: i64, card_id: i64) -> Result<()> {
        self.require_card(board_id, card_id)?;
        self.coordinator().delete(Sequence::Cards, card_id)?;
        Ok(())
    }

    /// Move a card within its column or to another column of the same board.
    /// `new_column_id = None` keeps the current column; `new_position = None`
    /// appends to the end of the destination.
    pub fn move_card(
        &self,
        board_id: i64,
        card_id: i64,
        new_column_id: Option<i64>,
        new_position: Option<i32>,
    ) -> Result<ReorderOutcome> {
        self.require_card(board_id, card_id)?;
        if let Some(column_id) = new_column_id
            && self.get_column(board_id, column_id)?.is_none()
        {
            return Err(BoardError::ColumnNotFound { id: column_id }.into());
        }
        self.coordinator().move_item(
            Sequence::Cards,
            MoveRequest {
                item_id: card_id,
                target_parent: new_column_id,
                target_position: new_position,
            },
        )
    }

    // ── Assignees ─────────────────────────────────────────────────────

    fn list_card_assignees(&self, card_id: i64) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT u.id, u.name, u.email FROM card_assignees a
                 JOIN users u ON u.id = a.user_id WHERE a.card_id = ?1 ORDER BY u.id",
            )
            .context("Failed to prepare list_card_assignees")?;
        let rows = stmt
            .query_map(params![card_id], user_from_row)
            .context("Failed to query assignees")?;
        collect_rows(rows, "assignee")
    }

    pub fn assign_user(&self, board_id: i64, card_id: i64, user_id: i64) -> Result<()> {
        self.require_card(board_id, card_id)?;
        if self.get_user(user_id)?.is_none() {
            return Err(BoardError::UserNotFound.into());
        }
        if self.member_role(board_id, user_id)?.is_none() {
            return Err(
                BoardError::BadRequest("User is not a member of this board".into()).into(),
            );
        }

        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO card_assignees (card_id, user_id) VALUES (?1, ?2)",
                params![card_id, user_id],
            )
            .context("Failed to assign user")?;
        if inserted == 0 {
            return Err(BoardError::BadRequest("User already assigned".into()).into());
        }
        Ok(())
    }

    pub fn unassign_user(&self, board_id: i64, card_id: i64, user_id: i64) -> Result<()> {
        self.require_card(board_id, card_id)?;
        let count = self
            .conn
            .execute(
                "DELETE FROM card_assignees WHERE card_id = ?1 AND user_id = ?2",
                params![card_id, user_id],
            )
            .context("Failed to unassign user")?;
        if count == 0 {
            return Err(BoardError::AssignmentNotFound { card_id, user_id }.into());
        }
        Ok(())
    }

    // ── Labels ────────────────────────────────────────────────────────

    pub fn list_labels(&self, board_id: i64) -> Result<Vec<Label>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, board_id, title, color FROM labels WHERE board_id = ?1 ORDER BY id")
            .context("Failed to prepare list_labels")?;
        let rows = stmt
            .query_map(params![board_id], label_from_row)
            .context("Failed to query labels")?;
        collect_rows(rows, "label")
    }

    pub fn get_label(&self, board_id: i64, label_id: i64) -> Result<Option<Label>> {
        self.conn
            .query_row(
                "SELECT id, board_id, title, color FROM labels WHERE id = ?1 AND board_id = ?2",
                params![label_id, board_id],
                label_from_row,
            )
            .optional()
            .context("Failed to query label")
    }

    pub fn create_label(&self, board_id: i64, title: &str, color: &str) -> Result<Label> {
        let color = normalize_color(color)?;
        if self.get_board(board_id)?.is_none() {
            return Err(BoardError::BoardNotFound { id: board_id }.into());
        }
        self.conn
            .execute(
                "INSERT INTO labels (board_id, title, color) VALUES (?1, ?2, ?3)",
                params![board_id, title.trim(), color],
            )
            .context("Failed to insert label")?;
        let id = self.conn.last_insert_rowid();
        self.get_label(board_id, id)?
            .context("Label not found after insert")
    }

    pub fn update_label(
        &self,
        board_id: i64,
        label_id: i64,
        title: &str,
        color: &str,
    ) -> Result<Label> {
        let color = normalize_color(color)?;
        let count = self
            .conn
            .execute(
                "UPDATE labels SET title = ?1, color = ?2 WHERE id = ?3 AND board_id = ?4",
                params![title.trim(), color, label_id, board_id],
            )
            .context("Failed to update label")?;
        if count == 0 {
            return Err(BoardError::LabelNotFound { id: label_id }.into());
        }
        self.get_label(board_id, label_id)?
            .context("Label not found after update")
    }

    pub fn delete_label(&self, board_id: i64, label_id: i64) -> Result<()> {
        let count = self
            .conn
            .execute(
                "DELETE FROM labels WHERE id = ?1 AND board_id = ?2",
                params![label_id, board_id],
            )
            .context("Failed to delete label")?;
        if count == 0 {
            return Err(BoardError::LabelNotFound { id: label_id }.into());
        }
        Ok(())
    }

    fn list_card_labels(&self, card_id: i64) -> Result<Vec<Label>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT l.id, l.board_id, l.title, l.color FROM card_labels cl
                 JOIN labels l ON l.id = cl.label_id WHERE cl.card_id = ?1 ORDER BY l.id",
            )
            .context("Failed to prepare list_card_labels")?;
        let rows = stmt
            .query_map(params![card_id], label_from_row)
            .context("Failed to query card labels")?;
        collect_rows(rows, "card label")
    }

    pub fn attach_label(&self, board_id: i64, card_id: i64, label_id: i64) -> Result<()> {
        self.require_card(board_id, card_id)?;
        if self.get_label(board_id, label_id)?.is_none() {
            return Err(BoardError::LabelNotFound { id: label_id }.into());
        }
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO card_labels (card_id, label_id) VALUES (?1, ?2)",
                params![card_id, label_id],
            )
            .context("Failed to attach label")?;
        if inserted == 0 {
            return Err(BoardError::BadRequest("Label already attached".into()).into());
        }
        Ok(())
    }

    pub fn detach_label(&self, board_id: i64, card_id: i64, label_id: i64) -> Result<()> {
        self.require_card(board_id, card_id)?;
        let count = self
            .conn
            .execute(
                "DELETE FROM card_labels WHERE card_id = ?1 AND label_id = ?2",
                params![card_id, label_id],
            )
            .context("Failed to detach label")?;
        if count == 0 {
            return Err(BoardError::LabelNotAttached { card_id, label_id }.into());
        }
        Ok(())
    }

    // ── Comments ──────────────────────────────────────────────────────

    fn list_card_comments(&self, card_id: i64) -> Result<Vec<Comment>> {
        let sql = format!(
            "SELECT {COMMENT_FIELDS} FROM comments cm JOIN users u ON u.id = cm.user_id
             WHERE cm.card_id = ?1 ORDER BY cm.created_at, cm.id"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_card_comments")?;
        let rows = stmt
            .query_map(params![card_id], comment_from_row)
            .context("Failed to query comments")?;
        collect_rows(rows, "comment")
    }

    pub fn list_comments(&self, board_id: i64, card_id: i64) -> Result<Vec<Comment>> {
        self.require_card(board_id, card_id)?;
        self.list_card_comments(card_id)
    }

    pub fn get_comment(
        &self,
        board_id: i64,
        card_id: i64,
        comment_id: i64,
    ) -> Result<Option<Comment>> {
        if self.get_card(board_id, card_id)?.is_none() {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {COMMENT_FIELDS} FROM comments cm JOIN users u ON u.id = cm.user_id
             WHERE cm.id = ?1 AND cm.card_id = ?2"
        );
        self.conn
            .query_row(&sql, params![comment_id, card_id], comment_from_row)
            .optional()
            .context("Failed to query comment")
    }

    pub fn create_comment(
        &self,
        board_id: i64,
        card_id: i64,
        user_id: i64,
        content: &str,
    ) -> Result<Comment> {
        let content = require_text(content, "Content")?;
        self.require_card(board_id, card_id)?;
        self.conn
            .execute(
                "INSERT INTO comments (card_id, user_id, content) VALUES (?1, ?2, ?3)",
                params![card_id, user_id, content],
            )
            .context("Failed to insert comment")?;
        let id = self.conn.last_insert_rowid();
        self.get_comment(board_id, card_id, id)?
            .context("Comment not found after insert")
    }

    /// Edit a comment. Only its author may do so.
    pub fn update_comment(
        &self,
        board_id: i64,
        card_id: i64,
        comment_id: i64,
        user_id: i64,
        content: &str,
    ) -> Result<Comment> {
        let content = require_text(content, "Content")?;
        self.require_author(board_id, card_id, comment_id, user_id)?;
        self.conn
            .execute(
                "UPDATE comments SET content = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![content, comment_id],
            )
            .context("Failed to update comment")?;
        self.get_comment(board_id, card_id, comment_id)?
            .context("Comment not found after update")
    }

    pub fn delete_comment(
        &self,
        board_id: i64,
        card_id: i64,
        comment_id: i64,
        user_id: i64,
    ) -> Result<()> {
        self.require_author(board_id, card_id, comment_id, user_id)?;
        self.conn
            .execute("DELETE FROM comments WHERE id = ?1", params![comment_id])
            .context("Failed to delete comment")?;
        Ok(())
    }

    fn require_author(
        &self,
        board_id: i64,
        card_id: i64,
        comment_id: i64,
        user_id: i64,
    ) -> Result<Comment> {
        let comment = self
            .get_comment(board_id, card_id, comment_id)?
            .ok_or(BoardError::CommentNotFound { id: comment_id })?;
        if comment.user_id != user_id {
            return Err(
                BoardError::Forbidden("Only the author can change this comment".into()).into(),
            );
        }
        Ok(comment)
    }
}

// ── Row mapping ───────────────────────────────────────────────────────

const CARD_FIELDS: &str = "c.id, c.column_id, c.title, c.description, c.due_date, c.position, \
                           c.revision, c.created_at, c.updated_at";

const COMMENT_FIELDS: &str =
    "cm.id, cm.card_id, cm.user_id, u.name, cm.content, cm.created_at, cm.updated_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
    })
}

fn board_from_row(row: &Row<'_>) -> rusqlite::Result<Board> {
    Ok(Board {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn column_from_row(row: &Row<'_>) -> rusqlite::Result<Column> {
    Ok(Column {
        id: row.get(0)?,
        board_id: row.get(1)?,
        title: row.get(2)?,
        position: row.get(3)?,
        revision: row.get(4)?,
    })
}

fn card_from_row(row: &Row<'_>) -> rusqlite::Result<Card> {
    Ok(Card {
        id: row.get(0)?,
        column_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        due_date: row.get(4)?,
        position: row.get(5)?,
        revision: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn label_from_row(row: &Row<'_>) -> rusqlite::Result<Label> {
    Ok(Label {
        id: row.get(0)?,
        board_id: row.get(1)?,
        title: row.get(2)?,
        color: row.get(3)?,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        card_id: row.get(1)?,
        user_id: row.get(2)?,
        author: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Membership row with the role still as stored text.
struct MemberRow {
    board_id: i64,
    user_id: i64,
    name: String,
    email: String,
    role: String,
}

impl MemberRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            board_id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            email: row.get(3)?,
            role: row.get(4)?,
        })
    }

    fn into_member(self) -> Result<BoardMember> {
        Ok(BoardMember {
            board_id: self.board_id,
            user_id: self.user_id,
            name: self.name,
            email: self.email,
            role: parse_role(&self.role)?,
        })
    }
}

fn parse_role(role: &str) -> Result<MemberRole> {
    MemberRole::from_str(role)
        .map_err(|e| anyhow::anyhow!(e))
        .context("Invalid role stored in board_members")
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    what: &str,
) -> Result<Vec<T>> {
    let mut items = Vec::new();
    for row in rows {
        items.push(row.with_context(|| format!("Failed to read {} row", what))?);
    }
    Ok(items)
}

// ── Validation ────────────────────────────────────────────────────────

fn require_text<'a>(value: &'a str, field: &str) -> Result<&'a str, BoardError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(BoardError::BadRequest(format!("{} is required", field)))
    } else {
        Ok(trimmed)
    }
}

/// `#RRGGBB`, stored upper-case.
fn normalize_color(color: &str) -> Result<String, BoardError> {
    let color = color.trim();
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        Ok(color.to_ascii_uppercase())
    } else {
        Err(BoardError::BadRequest(format!(
            "Invalid color '{}'. Expected #RRGGBB",
            color
        )))
    }
}

/// Parse an ISO-8601 instant and store it as UTC.
fn normalize_due_date(value: &str) -> Result<String, BoardError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| {
            dt.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Secs, true)
        })
        .map_err(|_| BoardError::BadRequest("Invalid ISO-8601 instant for dueDate".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::positioning::is_dense;

    fn board_error(err: &anyhow::Error) -> &BoardError {
        err.downcast_ref::<BoardError>()
            .unwrap_or_else(|| panic!("expected BoardError, got {:?}", err))
    }

    struct Seed {
        db: BoardDb,
        owner: User,
        board: Board,
    }

    fn seed() -> Result<Seed> {
        let db = BoardDb::new_in_memory()?;
        let owner = db.create_user("Ada", "ada@example.com")?;
        let board = db.create_board(owner.id, "Roadmap", "Q3 plans")?;
        Ok(Seed { db, owner, board })
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN
             ('users', 'boards', 'board_members', 'board_columns', 'cards',
              'labels', 'card_labels', 'card_assignees', 'comments')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 9);
        Ok(())
    }

    #[test]
    fn test_migrations_are_idempotent() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        db.run_migrations()?;
        db.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_open_file_database_persists() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("board.db");
        {
            let db = BoardDb::new(&path)?;
            db.create_user("Ada", "ada@example.com")?;
        }
        let db = BoardDb::new(&path)?;
        assert!(db.find_user_by_email("ada@example.com")?.is_some());
        Ok(())
    }

    #[test]
    fn test_create_user_rejects_duplicate_email() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        db.create_user("Ada", "ada@example.com")?;
        let err = db.create_user("Other Ada", "ADA@example.com").unwrap_err();
        assert!(matches!(board_error(&err), BoardError::BadRequest(_)));
        Ok(())
    }

    #[test]
    fn test_create_board_seeds_owner_and_labels() -> Result<()> {
        let s = seed()?;
        assert_eq!(s.board.title, "Roadmap");
        assert_eq!(
            s.db.member_role(s.board.id, s.owner.id)?,
            Some(MemberRole::Owner)
        );
        let labels = s.db.list_labels(s.board.id)?;
        assert_eq!(labels.len(), 6);
        assert!(labels.iter().all(|l| l.title.is_empty()));
        assert_eq!(labels[0].color, "#EF4444");
        Ok(())
    }

    #[test]
    fn test_create_board_for_unknown_user_fails() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let err = db.create_board(99, "Nope", "").unwrap_err();
        assert!(matches!(board_error(&err), BoardError::UserNotFound));
        assert!(db.list_boards_for_user(99)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_list_boards_for_user_only_returns_memberships() -> Result<()> {
        let s = seed()?;
        let bob = s.db.create_user("Bob", "bob@example.com")?;
        s.db.create_board(bob.id, "Bob's", "")?;

        let boards = s.db.list_boards_for_user(s.owner.id)?;
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].id, s.board.id);
        Ok(())
    }

    #[test]
    fn test_require_member_distinguishes_missing_board_and_outsider() -> Result<()> {
        let s = seed()?;
        let outsider = s.db.create_user("Eve", "eve@example.com")?;

        let err = s.db.require_member(404, s.owner.id).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::BoardNotFound { id: 404 }));

        let err = s.db.require_member(s.board.id, outsider.id).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::AccessDenied { .. }));

        assert_eq!(s.db.require_member(s.board.id, s.owner.id)?, MemberRole::Owner);
        Ok(())
    }

    #[test]
    fn test_update_and_delete_board() -> Result<()> {
        let s = seed()?;
        let updated = s.db.update_board(s.board.id, "Renamed", "new")?;
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.description, "new");

        let col = s.db.create_column(s.board.id, "Todo")?;
        s.db.create_card(s.board.id, col.id, "A", "")?;
        assert!(s.db.delete_board(s.board.id)?);
        assert!(s.db.get_board(s.board.id)?.is_none());
        assert!(s.db.list_column_cards(col.id)?.is_empty());
        assert!(!s.db.delete_board(s.board.id)?);
        Ok(())
    }

    #[test]
    fn test_board_view_orders_columns_and_cards() -> Result<()> {
        let s = seed()?;
        let todo = s.db.create_column(s.board.id, "Todo")?;
        let done = s.db.create_column(s.board.id, "Done")?;
        s.db.create_card(s.board.id, todo.id, "first", "")?;
        s.db.create_card(s.board.id, todo.id, "second", "")?;
        s.db.move_column(s.board.id, done.id, Some(0))?;

        let view = s.db.get_board_view(s.board.id)?.expect("board view");
        let titles: Vec<&str> = view.columns.iter().map(|c| c.column.title.as_str()).collect();
        assert_eq!(titles, vec!["Done", "Todo"]);
        let cards: Vec<&str> = view.columns[1].cards.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(cards, vec!["first", "second"]);
        assert_eq!(view.members.len(), 1);
        Ok(())
    }

    #[test]
    fn test_columns_append_in_order() -> Result<()> {
        let s = seed()?;
        let mut created = Vec::new();
        for (i, title) in ["Todo", "Doing", "Done"].iter().enumerate() {
            let col = s.db.create_column(s.board.id, title)?;
            assert_eq!(col.position, i as i32);
            assert_eq!(col.revision, 0);
            created.push(col.id);

            let stored: Vec<(i64, i32, i64)> = s
                .db
                .list_columns(s.board.id)?
                .into_iter()
                .map(|c| (c.id, c.position, c.revision))
                .collect();
            let expected: Vec<(i64, i32, i64)> = created
                .iter()
                .enumerate()
                .map(|(pos, &id)| (id, pos as i32, 0))
                .collect();
            assert_eq!(stored, expected, "append touched an earlier column");
        }
        let err = s.db.create_column(s.board.id, "   ").unwrap_err();
        assert!(matches!(board_error(&err), BoardError::BadRequest(_)));
        Ok(())
    }

    #[test]
    fn test_card_append_leaves_earlier_cards_untouched() -> Result<()> {
        let s = seed()?;
        let col = s.db.create_column(s.board.id, "Todo")?;
        let mut created = Vec::new();
        for title in ["a", "b", "c", "d"] {
            let card = s.db.create_card(s.board.id, col.id, title, "")?;
            assert_eq!(card.position, created.len() as i32);
            created.push(card.id);
        }

        let stored: Vec<(i64, i32, i64)> = s
            .db
            .list_column_cards(col.id)?
            .into_iter()
            .map(|c| (c.id, c.position, c.revision))
            .collect();
        let expected: Vec<(i64, i32, i64)> = created
            .iter()
            .enumerate()
            .map(|(pos, &id)| (id, pos as i32, 0))
            .collect();
        assert_eq!(stored, expected);
        Ok(())
    }

    #[test]
    fn test_create_column_on_missing_board() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let err = db.create_column(5, "Todo").unwrap_err();
        assert!(matches!(board_error(&err), BoardError::BoardNotFound { id: 5 }));
        Ok(())
    }

    #[test]
    fn test_move_column_to_end_when_position_missing() -> Result<()> {
        let s = seed()?;
        let a = s.db.create_column(s.board.id, "A")?;
        s.db.create_column(s.board.id, "B")?;
        s.db.create_column(s.board.id, "C")?;

        let outcome = s.db.move_column(s.board.id, a.id, None)?;
        assert_eq!(outcome.new_position, 2);
        let titles: Vec<String> = s
            .db
            .list_columns(s.board.id)?
            .into_iter()
            .map(|c| c.title)
            .collect();
        assert_eq!(titles, vec!["B", "C", "A"]);
        Ok(())
    }

    #[test]
    fn test_column_operations_are_scoped_to_board() -> Result<()> {
        let s = seed()?;
        let other = s.db.create_board(s.owner.id, "Other", "")?;
        let col = s.db.create_column(other.id, "Elsewhere")?;

        assert!(s.db.get_column(s.board.id, col.id)?.is_none());
        let err = s.db.delete_column(s.board.id, col.id).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::ColumnNotFound { .. }));
        let err = s.db.move_column(s.board.id, col.id, Some(0)).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::ColumnNotFound { .. }));
        let err = s.db.rename_column(s.board.id, col.id, "x").unwrap_err();
        assert!(matches!(board_error(&err), BoardError::ColumnNotFound { .. }));
        Ok(())
    }

    #[test]
    fn test_rename_column_keeps_position() -> Result<()> {
        let s = seed()?;
        s.db.create_column(s.board.id, "A")?;
        let b = s.db.create_column(s.board.id, "B")?;
        let renamed = s.db.rename_column(s.board.id, b.id, "Bee")?;
        assert_eq!(renamed.title, "Bee");
        assert_eq!(renamed.position, 1);
        Ok(())
    }

    #[test]
    fn test_create_card_requires_column_on_board() -> Result<()> {
        let s = seed()?;
        let other = s.db.create_board(s.owner.id, "Other", "")?;
        let foreign = s.db.create_column(other.id, "Elsewhere")?;

        let err = s
            .db
            .create_card(s.board.id, foreign.id, "Lost", "")
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::ColumnNotFound { .. }));
        assert!(s.db.list_column_cards(foreign.id)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_update_card_normalizes_due_date() -> Result<()> {
        let s = seed()?;
        let col = s.db.create_column(s.board.id, "Todo")?;
        let card = s.db.create_card(s.board.id, col.id, "A", "")?;

        let updated = s.db.update_card(
            s.board.id,
            card.id,
            "A2",
            "details",
            Some("2026-03-01T12:00:00+02:00"),
        )?;
        assert_eq!(updated.title, "A2");
        assert_eq!(updated.description, "details");
        assert_eq!(updated.due_date.as_deref(), Some("2026-03-01T10:00:00Z"));
        assert_eq!(updated.position, card.position);

        let cleared = s.db.update_card(s.board.id, card.id, "A2", "", None)?;
        assert!(cleared.due_date.is_none());

        let err = s
            .db
            .update_card(s.board.id, card.id, "A2", "", Some("next tuesday"))
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::BadRequest(_)));
        Ok(())
    }

    #[test]
    fn test_move_card_validates_destination_on_board() -> Result<()> {
        let s = seed()?;
        let col = s.db.create_column(s.board.id, "Todo")?;
        let card = s.db.create_card(s.board.id, col.id, "A", "")?;
        let other = s.db.create_board(s.owner.id, "Other", "")?;
        let foreign = s.db.create_column(other.id, "Elsewhere")?;

        let err = s
            .db
            .move_card(s.board.id, card.id, Some(foreign.id), Some(0))
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::ColumnNotFound { .. }));
        assert_eq!(s.db.list_column_cards(col.id)?.len(), 1);

        let err = s.db.move_card(other.id, card.id, None, Some(0)).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::CardNotFound { .. }));
        Ok(())
    }

    #[test]
    fn test_reject_policy_flows_from_db() -> Result<()> {
        let db = BoardDb::new_in_memory()?.with_policy(TargetPolicy::Reject);
        let user = db.create_user("Ada", "ada@example.com")?;
        let board = db.create_board(user.id, "Roadmap", "")?;
        let col = db.create_column(board.id, "Todo")?;
        let card = db.create_card(board.id, col.id, "A", "")?;
        db.create_card(board.id, col.id, "B", "")?;

        let err = db.move_card(board.id, card.id, None, Some(9)).unwrap_err();
        assert!(matches!(
            board_error(&err),
            BoardError::InvalidTarget { requested: 9, max: 1 }
        ));
        Ok(())
    }

    #[test]
    fn test_delete_card_removes_dependents() -> Result<()> {
        let s = seed()?;
        let col = s.db.create_column(s.board.id, "Todo")?;
        let card = s.db.create_card(s.board.id, col.id, "A", "")?;
        let label = s.db.list_labels(s.board.id)?.remove(0);
        s.db.attach_label(s.board.id, card.id, label.id)?;
        s.db.assign_user(s.board.id, card.id, s.owner.id)?;
        s.db.create_comment(s.board.id, card.id, s.owner.id, "hello")?;

        s.db.delete_card(s.board.id, card.id)?;

        let links: i64 = s.db.conn.query_row(
            "SELECT (SELECT COUNT(*) FROM card_labels) + (SELECT COUNT(*) FROM card_assignees)
                  + (SELECT COUNT(*) FROM comments)",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(links, 0);
        // The label itself belongs to the board and survives.
        assert!(s.db.get_label(s.board.id, label.id)?.is_some());
        Ok(())
    }

    #[test]
    fn test_membership_lifecycle() -> Result<()> {
        let s = seed()?;
        let bob = s.db.create_user("Bob", "bob@example.com")?;
        let cy = s.db.create_user("Cy", "cy@example.com")?;

        let added = s
            .db
            .add_member(s.board.id, s.owner.id, "bob@example.com", MemberRole::Admin)?;
        assert_eq!(added.role, MemberRole::Admin);
        assert_eq!(added.name, "Bob");

        // Admins add members but not admins.
        s.db.add_member(s.board.id, bob.id, "cy@example.com", MemberRole::Member)?;
        let err = s
            .db
            .set_member_role(s.board.id, bob.id, cy.id, MemberRole::Admin)
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::BadRequest(_)));

        let changed = s
            .db
            .set_member_role(s.board.id, bob.id, cy.id, MemberRole::Observer)?;
        assert_eq!(changed.role, MemberRole::Observer);

        let err = s
            .db
            .add_member(s.board.id, s.owner.id, "cy@example.com", MemberRole::Member)
            .unwrap_err();
        assert_eq!(err.to_string(), "User is already a member of this board");

        let err = s
            .db
            .add_member(s.board.id, s.owner.id, "ghost@example.com", MemberRole::Member)
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::UserNotFound));

        s.db.remove_member(s.board.id, bob.id, cy.id)?;
        assert!(s.db.member_role(s.board.id, cy.id)?.is_none());
        assert_eq!(s.db.list_members(s.board.id)?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_owner_cannot_be_removed_or_leave() -> Result<()> {
        let s = seed()?;
        s.db.create_user("Bob", "bob@example.com")?;
        s.db.add_member(s.board.id, s.owner.id, "bob@example.com", MemberRole::Admin)?;
        let bob = s.db.find_user_by_email("bob@example.com")?.expect("bob");

        let err = s.db.remove_member(s.board.id, bob.id, s.owner.id).unwrap_err();
        assert_eq!(err.to_string(), "Cannot remove the owner");
        let err = s.db.leave_board(s.board.id, s.owner.id).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::BadRequest(_)));

        s.db.leave_board(s.board.id, bob.id)?;
        assert!(s.db.member_role(s.board.id, bob.id)?.is_none());
        Ok(())
    }

    #[test]
    fn test_leaving_drops_card_assignments() -> Result<()> {
        let s = seed()?;
        let bob = s.db.create_user("Bob", "bob@example.com")?;
        s.db.add_member(s.board.id, s.owner.id, "bob@example.com", MemberRole::Member)?;
        let col = s.db.create_column(s.board.id, "Todo")?;
        let card = s.db.create_card(s.board.id, col.id, "A", "")?;
        s.db.assign_user(s.board.id, card.id, bob.id)?;

        s.db.leave_board(s.board.id, bob.id)?;

        let detail = s.db.get_card_detail(s.board.id, card.id)?.expect("card");
        assert!(detail.assigned_to.is_empty());
        Ok(())
    }

    #[test]
    fn test_transfer_ownership_swaps_roles() -> Result<()> {
        let s = seed()?;
        let bob = s.db.create_user("Bob", "bob@example.com")?;
        s.db.add_member(s.board.id, s.owner.id, "bob@example.com", MemberRole::Member)?;

        let err = s
            .db
            .transfer_ownership(s.board.id, bob.id, bob.id)
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::BadRequest(_)));

        s.db.transfer_ownership(s.board.id, s.owner.id, bob.id)?;
        assert_eq!(s.db.member_role(s.board.id, bob.id)?, Some(MemberRole::Owner));
        assert_eq!(
            s.db.member_role(s.board.id, s.owner.id)?,
            Some(MemberRole::Admin)
        );

        let err = s.db.transfer_ownership(s.board.id, bob.id, 777).unwrap_err();
        assert!(matches!(
            board_error(&err),
            BoardError::MemberNotFound { user_id: 777 }
        ));
        Ok(())
    }

    #[test]
    fn test_assignees_must_be_members_once() -> Result<()> {
        let s = seed()?;
        let outsider = s.db.create_user("Eve", "eve@example.com")?;
        let col = s.db.create_column(s.board.id, "Todo")?;
        let card = s.db.create_card(s.board.id, col.id, "A", "")?;

        let err = s.db.assign_user(s.board.id, card.id, outsider.id).unwrap_err();
        assert_eq!(err.to_string(), "User is not a member of this board");
        let err = s.db.assign_user(s.board.id, card.id, 999).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::UserNotFound));

        s.db.assign_user(s.board.id, card.id, s.owner.id)?;
        let err = s.db.assign_user(s.board.id, card.id, s.owner.id).unwrap_err();
        assert_eq!(err.to_string(), "User already assigned");

        s.db.unassign_user(s.board.id, card.id, s.owner.id)?;
        let err = s.db.unassign_user(s.board.id, card.id, s.owner.id).unwrap_err();
        assert!(matches!(
            board_error(&err),
            BoardError::AssignmentNotFound { .. }
        ));
        Ok(())
    }

    #[test]
    fn test_label_crud_and_attachment() -> Result<()> {
        let s = seed()?;
        let label = s.db.create_label(s.board.id, "Bug", "#a1b2c3")?;
        assert_eq!(label.color, "#A1B2C3");

        let err = s.db.create_label(s.board.id, "Bad", "red").unwrap_err();
        assert!(matches!(board_error(&err), BoardError::BadRequest(_)));

        let updated = s.db.update_label(s.board.id, label.id, "Defect", "#000000")?;
        assert_eq!(updated.title, "Defect");

        let col = s.db.create_column(s.board.id, "Todo")?;
        let card = s.db.create_card(s.board.id, col.id, "A", "")?;
        s.db.attach_label(s.board.id, card.id, label.id)?;
        let err = s.db.attach_label(s.board.id, card.id, label.id).unwrap_err();
        assert_eq!(err.to_string(), "Label already attached");

        let detail = s.db.get_card_detail(s.board.id, card.id)?.expect("card");
        assert_eq!(detail.labels.len(), 1);

        s.db.detach_label(s.board.id, card.id, label.id)?;
        let err = s.db.detach_label(s.board.id, card.id, label.id).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::LabelNotAttached { .. }));

        s.db.delete_label(s.board.id, label.id)?;
        let err = s.db.delete_label(s.board.id, label.id).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::LabelNotFound { .. }));
        Ok(())
    }

    #[test]
    fn test_labels_from_other_boards_cannot_be_attached() -> Result<()> {
        let s = seed()?;
        let other = s.db.create_board(s.owner.id, "Other", "")?;
        let foreign = s.db.list_labels(other.id)?.remove(0);
        let col = s.db.create_column(s.board.id, "Todo")?;
        let card = s.db.create_card(s.board.id, col.id, "A", "")?;

        let err = s.db.attach_label(s.board.id, card.id, foreign.id).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::LabelNotFound { .. }));
        Ok(())
    }

    #[test]
    fn test_comments_are_author_only() -> Result<()> {
        let s = seed()?;
        let bob = s.db.create_user("Bob", "bob@example.com")?;
        s.db.add_member(s.board.id, s.owner.id, "bob@example.com", MemberRole::Member)?;
        let col = s.db.create_column(s.board.id, "Todo")?;
        let card = s.db.create_card(s.board.id, col.id, "A", "")?;

        let comment = s.db.create_comment(s.board.id, card.id, s.owner.id, "first!")?;
        assert_eq!(comment.author, "Ada");
        assert!(comment.updated_at.is_none());

        let err = s
            .db
            .update_comment(s.board.id, card.id, comment.id, bob.id, "hijack")
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Forbidden(_)));
        let err = s
            .db
            .delete_comment(s.board.id, card.id, comment.id, bob.id)
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Forbidden(_)));

        let edited =
            s.db
                .update_comment(s.board.id, card.id, comment.id, s.owner.id, "edited")?;
        assert_eq!(edited.content, "edited");
        assert!(edited.updated_at.is_some());

        s.db.delete_comment(s.board.id, card.id, comment.id, s.owner.id)?;
        assert!(s.db.list_comments(s.board.id, card.id)?.is_empty());
        let err = s
            .db
            .delete_comment(s.board.id, card.id, comment.id, s.owner.id)
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::CommentNotFound { .. }));
        Ok(())
    }

    #[test]
    fn test_list_board_cards_follows_column_order() -> Result<()> {
        let s = seed()?;
        let a = s.db.create_column(s.board.id, "A")?;
        let b = s.db.create_column(s.board.id, "B")?;
        s.db.create_card(s.board.id, b.id, "b0", "")?;
        s.db.create_card(s.board.id, a.id, "a0", "")?;
        s.db.create_card(s.board.id, a.id, "a1", "")?;

        let titles: Vec<String> = s
            .db
            .list_board_cards(s.board.id)?
            .into_iter()
            .map(|c| c.title)
            .collect();
        assert_eq!(titles, vec!["a0", "a1", "b0"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_db_handle_call_runs_on_blocking_pool() -> Result<()> {
        let handle = DbHandle::new(BoardDb::new_in_memory()?);
        let user = handle
            .call(|db| db.create_user("Ada", "ada@example.com"))
            .await?;
        let found = handle
            .call(move |db| db.get_user(user.id))
            .await?
            .expect("user");
        assert_eq!(found.email, "ada@example.com");
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_moves_keep_columns_dense() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let user = db.create_user("Ada", "ada@example.com")?;
        let board = db.create_board(user.id, "Roadmap", "")?;
        let left = db.create_column(board.id, "Todo")?;
        let right = db.create_column(board.id, "Done")?;
        let mut card_ids = Vec::new();
        for (i, title) in ["a", "b", "c", "d", "e", "f"].iter().enumerate() {
            let column = if i % 2 == 0 { left.id } else { right.id };
            card_ids.push(db.create_card(board.id, column, title, "")?.id);
        }
        let handle = DbHandle::new(db);
        let (board_id, columns) = (board.id, [left.id, right.id]);

        let mut tasks = Vec::new();
        for i in 0..200usize {
            let handle = handle.clone();
            let card_id = card_ids[i % card_ids.len()];
            // Every third move stays in the card's current column.
            let column = (i % 3 != 0).then(|| columns[(i / 3) % 2]);
            let position = (i % 5) as i32;
            tasks.push(tokio::spawn(async move {
                handle
                    .call(move |db| db.move_card(board_id, card_id, column, Some(position)))
                    .await
            }));
        }
        for task in tasks {
            task.await??;
        }

        let (left_cards, right_cards) = handle
            .call(move |db| {
                Ok((
                    db.list_column_cards(columns[0])?,
                    db.list_column_cards(columns[1])?,
                ))
            })
            .await?;
        for cards in [&left_cards, &right_cards] {
            let positions: Vec<i32> = cards.iter().map(|c| c.position).collect();
            assert!(
                is_dense(positions.iter().copied()),
                "column is not dense: {:?}",
                positions
            );
        }
        let mut seen: Vec<i64> = left_cards
            .iter()
            .chain(right_cards.iter())
            .map(|c| c.id)
            .collect();
        seen.sort_unstable();
        card_ids.sort_unstable();
        assert_eq!(seen, card_ids);
        Ok(())
    }

    #[tokio::test]
    async fn test_db_handle_surfaces_typed_errors() -> Result<()> {
        let handle = DbHandle::new(BoardDb::new_in_memory()?);
        let err = handle
            .call(|db| db.require_member(1, 1))
            .await
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::BoardNotFound { id: 1 }));
        Ok(())
    }
}
