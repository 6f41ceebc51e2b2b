//! Support tickets

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::users::UserRole;
use super::validation::{length_between, ValidationErrors};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    Closed,
    Locked,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Locked => "locked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            "locked" => Some(Self::Locked),
            _ => None,
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketAction {
    Close,
    Reopen,
    Lock,
    Unlock,
}

impl TicketAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Close => "close",
            Self::Reopen => "reopen",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
        }
    }
}

/// Status after `actor` performs `action`, or why it is not allowed.
pub fn ticket_transition(
    from: TicketStatus,
    action: TicketAction,
    actor: UserRole,
) -> Result<TicketStatus, String> {
    use TicketAction as A;
    use TicketStatus as S;

    let admin = actor == UserRole::Admin;
    match (from, action) {
        (S::Open, A::Close) => Ok(S::Closed),
        (S::Closed, A::Reopen) if admin => Ok(S::Open),
        (S::Open | S::Closed, A::Lock) if admin => Ok(S::Locked),
        (S::Locked, A::Unlock) if admin => Ok(S::Closed),
        (_, A::Reopen | A::Lock | A::Unlock) if !admin => {
            Err(format!("Only staff can {} a ticket", action.as_str()))
        }
        _ => Err(format!(
            "Cannot {} a ticket that is {}",
            action.as_str(),
            from.as_str()
        )),
    }
}

/// Status after a reply, or an error when replies are not accepted.
///
/// A customer reply reopens a closed ticket; staff replies leave the status alone.
pub fn status_after_reply(from: TicketStatus, actor: UserRole) -> Result<TicketStatus, String> {
    match (from, actor) {
        (TicketStatus::Locked, _) => Err("Ticket is locked and does not accept replies".to_string()),
        (TicketStatus::Closed, UserRole::Customer) => Ok(TicketStatus::Open),
        (status, _) => Ok(status),
    }
}

// ============================================================================
// DTOs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTicketRequest {
    pub subject: String,
    pub message: String,
    #[serde(default)]
    pub priority: TicketPriority,
}

fn validate_body(errors: &mut ValidationErrors, field: &str, body: &str) {
    errors.check(length_between(body, 1, 20_000), field, "must be 1-20000 characters");
}

impl CreateTicketRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        errors.check(length_between(&self.subject, 1, 200), "subject", "must be 1-200 characters");
        validate_body(&mut errors, "message", &self.message);
        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplyRequest {
    pub message: String,
}

impl ReplyRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        validate_body(&mut errors, "message", &self.message);
        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignTicketRequest {
    pub admin_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TicketListFilter {
    #[serde(default)]
    pub status: Option<TicketStatus>,
    #[serde(default)]
    pub assigned_to: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TicketListItem {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub subject: String,
    pub status: String,
    pub priority: String,
    pub assigned_to: Option<Uuid>,
    pub assignee_name: Option<String>,
    pub last_reply_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AttachmentMeta {
    pub id: Uuid,
    pub message_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketMessageResponse {
    pub id: Uuid,
    pub author_id: Uuid,
    pub author_name: String,
    pub author_role: UserRole,
    pub body: String,
    pub attachments: Vec<AttachmentMeta>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketResponse {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub subject: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub assigned_to: Option<Uuid>,
    pub assignee_name: Option<String>,
    pub messages: Vec<TicketMessageResponse>,
    pub last_reply_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use TicketAction as A;
    use TicketStatus as S;

    #[test]
    fn both_sides_can_close_open_tickets() {
        assert_eq!(ticket_transition(S::Open, A::Close, UserRole::Customer), Ok(S::Closed));
        assert_eq!(ticket_transition(S::Open, A::Close, UserRole::Admin), Ok(S::Closed));
        assert!(ticket_transition(S::Closed, A::Close, UserRole::Customer).is_err());
        assert!(ticket_transition(S::Locked, A::Close, UserRole::Admin).is_err());
    }

    #[test]
    fn staff_only_actions() {
        assert_eq!(ticket_transition(S::Closed, A::Reopen, UserRole::Admin), Ok(S::Open));
        assert_eq!(ticket_transition(S::Open, A::Lock, UserRole::Admin), Ok(S::Locked));
        assert_eq!(ticket_transition(S::Closed, A::Lock, UserRole::Admin), Ok(S::Locked));
        assert_eq!(ticket_transition(S::Locked, A::Unlock, UserRole::Admin), Ok(S::Closed));

        let err = ticket_transition(S::Closed, A::Reopen, UserRole::Customer).unwrap_err();
        assert_eq!(err, "Only staff can reopen a ticket");
        assert!(ticket_transition(S::Open, A::Lock, UserRole::Customer).is_err());
        assert!(ticket_transition(S::Locked, A::Unlock, UserRole::Customer).is_err());
    }

    #[test]
    fn invalid_staff_transitions_explain_state() {
        let err = ticket_transition(S::Locked, A::Lock, UserRole::Admin).unwrap_err();
        assert_eq!(err, "Cannot lock a ticket that is locked");
        assert!(ticket_transition(S::Open, A::Reopen, UserRole::Admin).is_err());
        assert!(ticket_transition(S::Open, A::Unlock, UserRole::Admin).is_err());
    }

    #[test]
    fn replies() {
        assert_eq!(status_after_reply(S::Closed, UserRole::Customer), Ok(S::Open));
        assert_eq!(status_after_reply(S::Closed, UserRole::Admin), Ok(S::Closed));
        assert_eq!(status_after_reply(S::Open, UserRole::Customer), Ok(S::Open));
        assert!(status_after_reply(S::Locked, UserRole::Admin).is_err());
        assert!(status_after_reply(S::Locked, UserRole::Customer).is_err());
    }

    #[test]
    fn create_validation() {
        let req = CreateTicketRequest {
            subject: " ".into(),
            message: "".into(),
            priority: TicketPriority::High,
        };
        assert_eq!(req.validate().unwrap_err().into_inner().len(), 2);
    }
}
