//! Notification service
//!
//! Called by routes when something happens that a customer should see in
//! their portal.

use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::invoices::InvoiceAction;
use crate::domain::notifications::NotificationType;

/// Create a notification for a user
pub async fn create_notification(
    db: &PgPool,
    user_id: Uuid,
    notification_type: NotificationType,
    title: &str,
    message: Option<&str>,
    data: Option<serde_json::Value>,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    let type_str = notification_type.to_string();
    let data = data.unwrap_or(serde_json::json!({}));

    sqlx::query(
        r#"
        INSERT INTO notifications (id, user_id, type, title, message, data)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(&type_str)
    .bind(title)
    .bind(message)
    .bind(&data)
    .execute(db)
    .await?;

    tracing::info!(
        user_id = %user_id,
        notification_type = %type_str,
        notification_id = %id,
        "Notification created"
    );

    Ok(id)
}

fn invoice_notification(action: InvoiceAction, number: &str) -> Option<(NotificationType, String)> {
    match action {
        InvoiceAction::Issue => Some((NotificationType::InvoiceIssued, format!("New invoice {}", number))),
        InvoiceAction::MarkPaid => Some((
            NotificationType::InvoicePaid,
            format!("Payment received for invoice {}", number),
        )),
        InvoiceAction::Refund => Some((NotificationType::InvoiceRefunded, format!("Invoice {} was refunded", number))),
        InvoiceAction::Revoke => Some((NotificationType::InvoiceRevoked, format!("Invoice {} was revoked", number))),
        InvoiceAction::Restore => None,
    }
}

/// Tell a customer about a change to one of their invoices.
///
/// Restoring an invoice turns it back into a template the customer cannot
/// see, so that action produces nothing.
pub async fn notify_invoice_event(
    db: &PgPool,
    customer_id: Uuid,
    invoice_id: Uuid,
    number: &str,
    action: InvoiceAction,
) -> Result<Option<Uuid>, sqlx::Error> {
    let Some((kind, title)) = invoice_notification(action, number) else {
        return Ok(None);
    };
    create_notification(
        db,
        customer_id,
        kind,
        &title,
        None,
        Some(serde_json::json!({
            "invoice_id": invoice_id,
            "number": number,
        })),
    )
    .await
    .map(Some)
}

/// Staff answered a ticket
pub async fn notify_ticket_reply(
    db: &PgPool,
    customer_id: Uuid,
    ticket_id: Uuid,
    subject: &str,
) -> Result<Uuid, sqlx::Error> {
    create_notification(
        db,
        customer_id,
        NotificationType::TicketReply,
        &format!("New reply on \"{}\"", subject),
        Some("Our support team has answered your ticket."),
        Some(serde_json::json!({ "ticket_id": ticket_id })),
    )
    .await
}

pub async fn notify_ticket_closed(
    db: &PgPool,
    customer_id: Uuid,
    ticket_id: Uuid,
    subject: &str,
) -> Result<Uuid, sqlx::Error> {
    create_notification(
        db,
        customer_id,
        NotificationType::TicketClosed,
        &format!("Ticket \"{}\" was closed", subject),
        None,
        Some(serde_json::json!({ "ticket_id": ticket_id })),
    )
    .await
}

pub async fn notify_contract_cancelled(
    db: &PgPool,
    customer_id: Uuid,
    contract_id: Uuid,
    product_name: &str,
    cancellation_date: chrono::NaiveDate,
) -> Result<Uuid, sqlx::Error> {
    create_notification(
        db,
        customer_id,
        NotificationType::ContractCancelled,
        &format!("{} has been cancelled", product_name),
        Some(&format!("The contract ends on {}.", cancellation_date)),
        Some(serde_json::json!({
            "contract_id": contract_id,
            "cancellation_date": cancellation_date,
        })),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_titles() {
        let (kind, title) = invoice_notification(InvoiceAction::Issue, "INV-2024-00001").unwrap();
        assert_eq!(kind, NotificationType::InvoiceIssued);
        assert_eq!(title, "New invoice INV-2024-00001");
        assert!(invoice_notification(InvoiceAction::Restore, "INV-2024-00001").is_none());
    }
}
