//! Kanban board service.
//!
//! ## Overview
//!
//! Boards hold ordered columns, columns hold ordered cards. Every create,
//! delete and move keeps each parent's child positions dense (`0..n`) and
//! commits all position writes of one operation in a single SQLite
//! transaction, including a card moving between columns.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    ├─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│    └─ ws.rs   (BoardEvent feed)                  │
//!                       │         │                                        │
//!                       │         │ DbHandle::call()                       │
//!                       │         v                                        │
//!                       │  db.rs  (BoardDb, DbHandle)                      │
//!                       │         │                                        │
//!                       │         │ append / delete / move_item            │
//!                       │         v                                        │
//!                       │  reorder.rs  (ReorderCoordinator)                │
//!                       │         │                                        │
//!                       │         v                                        │
//!                       │  positioning.rs  (PositionedCollection)          │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module    | Responsibility                                              |
//! |-----------|-------------------------------------------------------------|
//! | `models`  | Shared types: `Board`, `Column`, `Card`, `MemberRole`       |
//! | `members` | Owner/admin/member/observer rules                           |
//!
//! ## Typical Request Flow (move card to another column)
//!
//! 1. `POST /api/boards/{board_id}/cards/{card_id}/move` → `api::move_card()`
//! 2. The handler checks membership and calls `BoardDb::move_card()` on the
//!    blocking pool; the `DbHandle` mutex serializes it against every other
//!    database call.
//! 3. `ReorderCoordinator::move_item()` re-reads both columns, plans the
//!    destination order, compacts the source and writes only changed rows,
//!    then commits once.
//! 4. After the commit the handler broadcasts `BoardEvent::CardMoved`.

pub mod api;
pub mod db;
pub mod members;
pub mod models;
pub mod positioning;
pub mod reorder;
pub mod server;
pub mod ws;
