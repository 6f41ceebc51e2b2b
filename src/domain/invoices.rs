//! Invoice lifecycle and totals
//!
//! An invoice starts as an editable `template`. Issuing it assigns a number
//! and makes it `unpaid`. From there it is either paid or revoked. A paid
//! invoice can be refunded, which marks it `refunded` and produces a separate
//! credit note in status `refund`. A revoked invoice can be restored to a
//! template and issued again under a new number.

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use super::validation::{length_between, ValidationErrors};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Template,
    Unpaid,
    Paid,
    Refunded,
    Refund,
    Revoked,
}

impl InvoiceStatus {
    const ALL: [InvoiceStatus; 6] = [
        Self::Template,
        Self::Unpaid,
        Self::Paid,
        Self::Refunded,
        Self::Refund,
        Self::Revoked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
            Self::Refunded => "refunded",
            Self::Refund => "refund",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Header and line items can only change before issuing.
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Template)
    }

    /// Templates are drafts and never shown to customers.
    pub fn is_visible_to_customer(&self) -> bool {
        !matches!(self, Self::Template)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceAction {
    Issue,
    MarkPaid,
    Refund,
    Revoke,
    Restore,
}

impl InvoiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::MarkPaid => "mark_paid",
            Self::Refund => "refund",
            Self::Revoke => "revoke",
            Self::Restore => "restore",
        }
    }

    /// Name of the event emitted after the action succeeds.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Issue => "invoice.issued",
            Self::MarkPaid => "invoice.paid",
            Self::Refund => "invoice.refunded",
            Self::Revoke => "invoice.revoked",
            Self::Restore => "invoice.restored",
        }
    }
}

impl fmt::Display for InvoiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Cannot {action} an invoice in status '{from}'")]
pub struct TransitionError {
    pub from: InvoiceStatus,
    pub action: InvoiceAction,
}

/// The complete transition table.
pub fn transition(
    from: InvoiceStatus,
    action: InvoiceAction,
) -> Result<InvoiceStatus, TransitionError> {
    use InvoiceAction as A;
    use InvoiceStatus as S;

    match (from, action) {
        (S::Template, A::Issue) => Ok(S::Unpaid),
        (S::Unpaid, A::MarkPaid) => Ok(S::Paid),
        (S::Unpaid, A::Revoke) => Ok(S::Revoked),
        (S::Paid, A::Refund) => Ok(S::Refunded),
        (S::Revoked, A::Restore) => Ok(S::Template),
        _ => Err(TransitionError { from, action }),
    }
}

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn line_net(quantity: Decimal, unit_price: Decimal) -> Decimal {
    round_money(quantity * unit_price)
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TaxLine {
    pub rate: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InvoiceTotals {
    pub net: Decimal,
    pub taxes: Vec<TaxLine>,
    pub gross: Decimal,
}

/// Tax is computed once per rate on the summed line nets, not per line.
pub fn compute_totals<I>(lines: I) -> InvoiceTotals
where
    I: IntoIterator<Item = (Decimal, Decimal, Decimal)>,
{
    let mut net_by_rate: BTreeMap<Decimal, Decimal> = BTreeMap::new();
    for (quantity, unit_price, tax_rate) in lines {
        *net_by_rate.entry(tax_rate.normalize()).or_default() += line_net(quantity, unit_price);
    }

    let net: Decimal = net_by_rate.values().copied().sum();
    let taxes: Vec<TaxLine> = net_by_rate
        .into_iter()
        .filter(|(rate, _)| !rate.is_zero())
        .map(|(rate, base)| TaxLine {
            rate,
            amount: round_money(base * rate / Decimal::ONE_HUNDRED),
        })
        .collect();
    let gross = net + taxes.iter().map(|t| t.amount).sum::<Decimal>();

    InvoiceTotals { net, taxes, gross }
}

pub fn format_invoice_number(prefix: &str, year: i32, sequence: i32) -> String {
    format!("{}-{}-{:05}", prefix, year, sequence)
}

pub fn due_date(issued_at: NaiveDate, payment_terms_days: u32) -> NaiveDate {
    issued_at
        .checked_add_days(Days::new(payment_terms_days as u64))
        .unwrap_or(NaiveDate::MAX)
}

// ============================================================================
// DTOs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceItemInput {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub tax_rate: Decimal,
}

fn validate_items(items: &[InvoiceItemInput], errors: &mut ValidationErrors) {
    if items.len() > 200 {
        errors.add("items", "at most 200 line items are allowed");
    }
    for (i, item) in items.iter().enumerate() {
        errors.check(
            length_between(&item.description, 1, 500),
            &format!("items.{}.description", i),
            "must be 1-500 characters",
        );
        errors.check(
            item.quantity > Decimal::ZERO,
            &format!("items.{}.quantity", i),
            "must be greater than zero",
        );
        errors.check(
            item.tax_rate >= Decimal::ZERO && item.tax_rate <= Decimal::ONE_HUNDRED,
            &format!("items.{}.tax_rate", i),
            "must be between 0 and 100",
        );
    }
}

fn is_valid_currency(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInvoiceRequest {
    pub customer_id: Uuid,
    #[serde(default)]
    pub contract_id: Option<Uuid>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub items: Vec<InvoiceItemInput>,
}

impl CreateInvoiceRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if let Some(currency) = &self.currency {
            errors.check(is_valid_currency(currency), "currency", "must be a 3-letter ISO code");
        }
        validate_items(&self.items, &mut errors);
        errors.into_result()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateInvoiceRequest {
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Replaces all line items when present
    #[serde(default)]
    pub items: Option<Vec<InvoiceItemInput>>,
}

impl UpdateInvoiceRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if let Some(currency) = &self.currency {
            errors.check(is_valid_currency(currency), "currency", "must be a 3-letter ISO code");
        }
        if let Some(items) = &self.items {
            validate_items(items, &mut errors);
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarkPaidRequest {
    #[serde(default)]
    pub payment_gateway_id: Option<Uuid>,
    #[serde(default)]
    pub payment_reference: Option<String>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceListFilter {
    #[serde(default)]
    pub status: Option<InvoiceStatus>,
    #[serde(default)]
    pub customer_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceItemResponse {
    pub id: Uuid,
    pub position: i32,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    pub net: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceResponse {
    pub id: Uuid,
    pub number: Option<String>,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub contract_id: Option<Uuid>,
    pub refund_of: Option<Uuid>,
    pub status: InvoiceStatus,
    pub currency: String,
    pub notes: Option<String>,
    pub issued_at: Option<NaiveDate>,
    pub due_at: Option<NaiveDate>,
    pub paid_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub payment_gateway_id: Option<Uuid>,
    pub payment_reference: Option<String>,
    pub items: Vec<InvoiceItemResponse>,
    pub totals: InvoiceTotals,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row shape for invoice lists; totals are aggregated in SQL with the same
/// rounding rules as [`compute_totals`].
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct InvoiceListItem {
    pub id: Uuid,
    pub number: Option<String>,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub customer_email: String,
    pub status: String,
    pub currency: String,
    pub issued_at: Option<NaiveDate>,
    pub due_at: Option<NaiveDate>,
    pub paid_at: Option<DateTime<Utc>>,
    pub net_total: Decimal,
    pub gross_total: Decimal,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const STATUSES: [InvoiceStatus; 6] = [
        InvoiceStatus::Template,
        InvoiceStatus::Unpaid,
        InvoiceStatus::Paid,
        InvoiceStatus::Refunded,
        InvoiceStatus::Refund,
        InvoiceStatus::Revoked,
    ];

    const ACTIONS: [InvoiceAction; 5] = [
        InvoiceAction::Issue,
        InvoiceAction::MarkPaid,
        InvoiceAction::Refund,
        InvoiceAction::Revoke,
        InvoiceAction::Restore,
    ];

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn transition_table_is_exact() {
        use InvoiceAction as A;
        use InvoiceStatus as S;

        let allowed = [
            (S::Template, A::Issue, S::Unpaid),
            (S::Unpaid, A::MarkPaid, S::Paid),
            (S::Unpaid, A::Revoke, S::Revoked),
            (S::Paid, A::Refund, S::Refunded),
            (S::Revoked, A::Restore, S::Template),
        ];

        for from in STATUSES {
            for action in ACTIONS {
                let expected = allowed
                    .iter()
                    .find(|(f, a, _)| *f == from && *a == action)
                    .map(|(_, _, to)| *to);
                match expected {
                    Some(to) => assert_eq!(transition(from, action), Ok(to)),
                    None => assert_eq!(
                        transition(from, action),
                        Err(TransitionError { from, action })
                    ),
                }
            }
        }
    }

    #[test]
    fn terminal_states_reject_everything() {
        for action in ACTIONS {
            assert!(transition(InvoiceStatus::Refunded, action).is_err());
            assert!(transition(InvoiceStatus::Refund, action).is_err());
        }
    }

    #[test]
    fn transition_error_message_names_status_and_action() {
        let err = transition(InvoiceStatus::Paid, InvoiceAction::Revoke).unwrap_err();
        assert_eq!(err.to_string(), "Cannot revoke an invoice in status 'paid'");
    }

    #[test]
    fn status_parse_round_trip() {
        for status in STATUSES {
            assert_eq!(InvoiceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(InvoiceStatus::parse("draft"), None);
        assert!(InvoiceStatus::Template.is_editable());
        assert!(!InvoiceStatus::Unpaid.is_editable());
        assert!(!InvoiceStatus::Template.is_visible_to_customer());
        assert!(InvoiceStatus::Refund.is_visible_to_customer());
    }

    #[test]
    fn line_rounding_is_half_away_from_zero() {
        assert_eq!(line_net(d("3"), d("0.335")), d("1.01"));
        assert_eq!(line_net(d("1"), d("2.345")), d("2.35"));
        assert_eq!(line_net(d("-1"), d("2.345")), d("-2.35"));
    }

    #[test]
    fn totals_group_tax_by_rate() {
        let totals = compute_totals(vec![
            (d("2"), d("10.00"), d("19")),
            (d("1"), d("5.55"), d("19.00")),
            (d("3"), d("1.99"), d("7")),
            (d("1"), d("4.00"), d("0")),
        ]);
        assert_eq!(totals.net, d("35.52"));
        assert_eq!(
            totals.taxes,
            vec![
                TaxLine {
                    rate: d("7"),
                    amount: d("0.42")
                },
                TaxLine {
                    rate: d("19"),
                    amount: d("4.85")
                },
            ]
        );
        assert_eq!(totals.gross, d("40.79"));
    }

    #[test]
    fn credit_note_totals_are_negative() {
        let totals = compute_totals(vec![(d("-2"), d("10.00"), d("19"))]);
        assert_eq!(totals.net, d("-20.00"));
        assert_eq!(totals.gross, d("-23.80"));
    }

    #[test]
    fn empty_invoice_totals_are_zero() {
        let totals = compute_totals(Vec::new());
        assert!(totals.net.is_zero());
        assert!(totals.taxes.is_empty());
        assert!(totals.gross.is_zero());
    }

    #[test]
    fn number_format_and_due_date() {
        assert_eq!(format_invoice_number("INV", 2024, 42), "INV-2024-00042");
        assert_eq!(format_invoice_number("RE", 2025, 123456), "RE-2025-123456");

        let issued = NaiveDate::from_ymd_opt(2024, 12, 20).unwrap();
        assert_eq!(due_date(issued, 14), NaiveDate::from_ymd_opt(2025, 1, 3).unwrap());
        assert_eq!(due_date(issued, 0), issued);
    }

    #[test]
    fn item_validation() {
        let req = CreateInvoiceRequest {
            customer_id: Uuid::new_v4(),
            contract_id: None,
            currency: Some("eur".into()),
            notes: None,
            items: vec![InvoiceItemInput {
                description: "".into(),
                quantity: d("0"),
                unit_price: d("10"),
                tax_rate: d("120"),
            }],
        };
        let fields: Vec<_> = req
            .validate()
            .unwrap_err()
            .into_inner()
            .into_iter()
            .map(|e| e.field)
            .collect();
        assert_eq!(
            fields,
            vec![
                "currency",
                "items.0.description",
                "items.0.quantity",
                "items.0.tax_rate"
            ]
        );
    }
}
