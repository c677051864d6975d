//! Membership rules for a board.
//!
//! Owners manage everyone; admins manage members and observers. There is
//! always exactly one owner, changed only by an ownership transfer. Rule
//! violations are reported as `BadRequest`, board-level permissions as
//! `Forbidden`.

use crate::errors::BoardError;

use super::models::MemberRole;

fn deny(message: &str) -> BoardError {
    BoardError::BadRequest(message.to_string())
}

/// Title, description and label edits need an owner or admin.
pub fn check_manage_board(actor: MemberRole) -> Result<(), BoardError> {
    if actor.can_manage() {
        Ok(())
    } else {
        Err(BoardError::Forbidden(
            "Only owners and admins can change the board".into(),
        ))
    }
}

pub fn check_delete_board(actor: MemberRole) -> Result<(), BoardError> {
    if actor == MemberRole::Owner {
        Ok(())
    } else {
        Err(BoardError::Forbidden(
            "Only the owner can delete the board".into(),
        ))
    }
}

pub fn check_add(actor: MemberRole, role: MemberRole) -> Result<(), BoardError> {
    if !actor.can_manage() {
        return Err(deny("Only admins and owners can add members"));
    }
    match role {
        MemberRole::Owner => Err(deny(
            "A board has exactly one owner. Use transfer ownership instead",
        )),
        MemberRole::Admin if actor != MemberRole::Owner => {
            Err(deny("Only the owner can add admins"))
        }
        _ => Ok(()),
    }
}

pub fn check_role_change(
    actor: MemberRole,
    current: MemberRole,
    requested: MemberRole,
) -> Result<(), BoardError> {
    if requested == MemberRole::Owner || current == MemberRole::Owner {
        return Err(deny(
            "Cannot change owner's role. Use transfer ownership instead",
        ));
    }
    if requested == MemberRole::Admin || current == MemberRole::Admin {
        if actor != MemberRole::Owner {
            return Err(deny("Only the owner can manage admins"));
        }
    } else if !actor.can_manage() {
        return Err(deny("You don't have permission to change roles"));
    }
    Ok(())
}

pub fn check_remove(actor: MemberRole, target: MemberRole) -> Result<(), BoardError> {
    match target {
        MemberRole::Owner => Err(deny("Cannot remove the owner")),
        MemberRole::Admin if actor != MemberRole::Owner => {
            Err(deny("Only the owner can remove admins"))
        }
        MemberRole::Admin => Ok(()),
        _ if actor.can_manage() => Ok(()),
        _ => Err(deny("You don't have permission to remove members")),
    }
}

pub fn check_leave(role: MemberRole) -> Result<(), BoardError> {
    if role == MemberRole::Owner {
        Err(deny(
            "Board owner cannot leave. Transfer ownership or delete the board.",
        ))
    } else {
        Ok(())
    }
}

pub fn check_transfer(actor: MemberRole) -> Result<(), BoardError> {
    if actor == MemberRole::Owner {
        Ok(())
    } else {
        Err(deny("You are not the owner of this board"))
    }
}
