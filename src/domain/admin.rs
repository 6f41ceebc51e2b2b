//! Admin domain types
//!
//! Audit log vocabulary and back-office statistics.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Admin action types for audit logging
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    Create,
    Update,
    Delete,
    RegenerateKey,
    RevokeClient,
    IssueInvoice,
    MarkInvoicePaid,
    RefundInvoice,
    RevokeInvoice,
    RestoreInvoice,
    CancelContract,
    UncancelContract,
    BillContract,
    ReplyTicket,
    AssignTicket,
    CloseTicket,
    ReopenTicket,
    LockTicket,
    UnlockTicket,
    ProvisionTenant,
    RetryTenant,
    SuspendTenant,
    ResumeTenant,
}

impl std::fmt::Display for AdminAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_default();
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// Target types for audit logging
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditTargetType {
    User,
    ApiAccount,
    OauthClient,
    Invoice,
    Contract,
    Ticket,
    Page,
    Gateway,
    Tenant,
}

impl std::fmt::Display for AuditTargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_default();
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// Audit log row joined with the acting admin
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub admin_id: Uuid,
    pub admin_name: Option<String>,
    pub action: String,
    pub target_type: String,
    pub target_id: Option<Uuid>,
    pub details: sqlx::types::Json<serde_json::Value>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Query params for audit log
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuditLogQuery {
    #[serde(default)]
    pub admin_id: Option<Uuid>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub target_type: Option<String>,
}

/// Admin dashboard stats
#[derive(Debug, Clone, Serialize)]
pub struct AdminStats {
    pub customers: i64,
    pub open_tickets: i64,
    pub unpaid_invoices: i64,
    pub unpaid_total: Decimal,
    pub active_contracts: i64,
    pub active_tenants: i64,
}

/// Customer portal landing numbers
#[derive(Debug, Clone, Serialize)]
pub struct CustomerDashboard {
    pub unpaid_invoices: i64,
    pub unpaid_total: Decimal,
    pub open_tickets: i64,
    pub active_contracts: i64,
    pub unread_notifications: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_vocabulary_is_snake_case() {
        assert_eq!(AdminAction::MarkInvoicePaid.to_string(), "mark_invoice_paid");
        assert_eq!(AdminAction::RegenerateKey.to_string(), "regenerate_key");
        assert_eq!(AuditTargetType::OauthClient.to_string(), "oauth_client");
        assert_eq!(AuditTargetType::ApiAccount.to_string(), "api_account");
    }
}
