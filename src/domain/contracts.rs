//! Recurring contracts and cancellation-date arithmetic

use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::validation::{length_between, ValidationErrors};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    Monthly,
    Quarterly,
    Semiannual,
    Yearly,
}

impl BillingPeriod {
    pub fn months(&self) -> u32 {
        match self {
            Self::Monthly => 1,
            Self::Quarterly => 3,
            Self::Semiannual => 6,
            Self::Yearly => 12,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Semiannual => "semiannual",
            Self::Yearly => "yearly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "monthly" => Some(Self::Monthly),
            "quarterly" => Some(Self::Quarterly),
            "semiannual" => Some(Self::Semiannual),
            "yearly" => Some(Self::Yearly),
            _ => None,
        }
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Active,
    Cancelled,
    Ended,
}

pub fn contract_status(cancellation_date: Option<NaiveDate>, today: NaiveDate) -> ContractStatus {
    match cancellation_date {
        None => ContractStatus::Active,
        Some(end) if end < today => ContractStatus::Ended,
        Some(_) => ContractStatus::Cancelled,
    }
}

/// Terms needed for the period and cancellation arithmetic.
#[derive(Debug, Clone, Copy)]
pub struct ContractTerms {
    pub start_date: NaiveDate,
    pub billing_period: BillingPeriod,
    pub minimum_term_months: u32,
    pub notice_period_days: u32,
}

impl ContractTerms {
    /// Last day of the `n`-th billing period (1-based). Month arithmetic
    /// clamps to the end of shorter months.
    pub fn period_end(&self, n: u32) -> NaiveDate {
        self.start_date
            .checked_add_months(Months::new(n * self.billing_period.months()))
            .and_then(|d| d.checked_sub_days(Days::new(1)))
            .unwrap_or(NaiveDate::MAX)
    }

    /// Earliest date the contract can end when cancellation is requested on
    /// `requested_on`: the end of the first period that both satisfies the
    /// minimum term and lies at least the notice period after the request.
    pub fn earliest_end_date(&self, requested_on: NaiveDate) -> NaiveDate {
        let period_months = self.billing_period.months();
        let min_periods = self.minimum_term_months.div_ceil(period_months).max(1);
        let notice_deadline = requested_on
            .checked_add_days(Days::new(self.notice_period_days as u64))
            .unwrap_or(NaiveDate::MAX);

        // Jump close to the deadline instead of walking from the start.
        let elapsed_months = months_between(self.start_date, notice_deadline);
        let mut n = min_periods.max(elapsed_months / period_months);
        loop {
            let end = self.period_end(n);
            if end >= notice_deadline || end == NaiveDate::MAX {
                return end;
            }
            n += 1;
        }
    }

    /// Index of the billing period containing `date`, at least 1.
    fn period_index(&self, date: NaiveDate) -> u32 {
        let mut n = (months_between(self.start_date, date) / self.billing_period.months()).max(1);
        loop {
            let end = self.period_end(n);
            if end >= date || end == NaiveDate::MAX {
                return n;
            }
            n += 1;
        }
    }

    /// Billing window following `billed_until`, or the first period when
    /// nothing has been billed yet. The window ends on the contract's own
    /// period boundary and never runs past `ends_on`; `None` when nothing is
    /// left to bill.
    pub fn next_billing_period(
        &self,
        billed_until: Option<NaiveDate>,
        ends_on: Option<NaiveDate>,
    ) -> Option<(NaiveDate, NaiveDate)> {
        let from = match billed_until {
            Some(d) => d.checked_add_days(Days::new(1))?.max(self.start_date),
            None => self.start_date,
        };
        let mut to = self.period_end(self.period_index(from));
        if let Some(end) = ends_on {
            if from > end {
                return None;
            }
            to = to.min(end);
        }
        Some((from, to))
    }
}

/// Whole months from `from` to `to`, zero when `to` is earlier.
fn months_between(from: NaiveDate, to: NaiveDate) -> u32 {
    use chrono::Datelike;
    if to <= from {
        return 0;
    }
    let months = (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32;
    months.saturating_sub(1).max(0) as u32
}

// ============================================================================
// DTOs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateContractRequest {
    pub customer_id: Uuid,
    pub product_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Decimal,
    pub billing_period: BillingPeriod,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub minimum_term_months: u32,
    #[serde(default)]
    pub notice_period_days: u32,
}

fn validate_terms(
    errors: &mut ValidationErrors,
    price: Option<Decimal>,
    minimum_term_months: Option<u32>,
    notice_period_days: Option<u32>,
) {
    if let Some(price) = price {
        errors.check(price >= Decimal::ZERO, "price", "must not be negative");
    }
    if let Some(months) = minimum_term_months {
        errors.check(months <= 120, "minimum_term_months", "must be between 0 and 120");
    }
    if let Some(days) = notice_period_days {
        errors.check(days <= 365, "notice_period_days", "must be between 0 and 365");
    }
}

impl CreateContractRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        errors.check(
            length_between(&self.product_name, 1, 200),
            "product_name",
            "must be 1-200 characters",
        );
        validate_terms(
            &mut errors,
            Some(self.price),
            Some(self.minimum_term_months),
            Some(self.notice_period_days),
        );
        errors.into_result()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateContractRequest {
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub billing_period: Option<BillingPeriod>,
    #[serde(default)]
    pub minimum_term_months: Option<u32>,
    #[serde(default)]
    pub notice_period_days: Option<u32>,
}

impl UpdateContractRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if let Some(name) = &self.product_name {
            errors.check(length_between(name, 1, 200), "product_name", "must be 1-200 characters");
        }
        validate_terms(
            &mut errors,
            self.price,
            self.minimum_term_months,
            self.notice_period_days,
        );
        errors.into_result()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminCancelRequest {
    /// Explicit end date; the earliest possible date is used when absent
    #[serde(default)]
    pub cancellation_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractListFilter {
    #[serde(default)]
    pub customer_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractResponse {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub product_name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub billing_period: BillingPeriod,
    pub start_date: NaiveDate,
    pub minimum_term_months: i32,
    pub notice_period_days: i32,
    pub billed_until: Option<NaiveDate>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_date: Option<NaiveDate>,
    pub status: ContractStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancellationPreview {
    pub contract_id: Uuid,
    pub requested_on: NaiveDate,
    pub cancellation_date: NaiveDate,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BillContractRequest {
    #[serde(default)]
    pub tax_rate: Decimal,
}

/// Line item text for one billed period.
pub fn period_line(product_name: &str, from: NaiveDate, to: NaiveDate) -> String {
    format!("{} ({} – {})", product_name, from, to)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn terms(start: NaiveDate, period: BillingPeriod, min: u32, notice: u32) -> ContractTerms {
        ContractTerms {
            start_date: start,
            billing_period: period,
            minimum_term_months: min,
            notice_period_days: notice,
        }
    }

    #[test]
    fn period_line_format() {
        assert_eq!(
            period_line("Hosting M", date(2024, 1, 1), date(2024, 1, 31)),
            "Hosting M (2024-01-01 – 2024-01-31)"
        );
    }

    #[test]
    fn period_end_clamps_to_month_end() {
        let t = terms(date(2024, 1, 31), BillingPeriod::Monthly, 0, 0);
        // Jan 31 + 1 month = Feb 29 (leap year), minus one day
        assert_eq!(t.period_end(1), date(2024, 2, 28));
        assert_eq!(t.period_end(2), date(2024, 3, 30));

        let t = terms(date(2024, 3, 1), BillingPeriod::Yearly, 0, 0);
        assert_eq!(t.period_end(1), date(2025, 2, 28));
    }

    #[test]
    fn cancellation_without_notice_ends_current_period() {
        let t = terms(date(2024, 1, 1), BillingPeriod::Monthly, 0, 0);
        assert_eq!(t.earliest_end_date(date(2024, 3, 15)), date(2024, 3, 31));
        assert_eq!(t.earliest_end_date(date(2024, 3, 31)), date(2024, 3, 31));
        assert_eq!(t.earliest_end_date(date(2024, 4, 1)), date(2024, 4, 30));
    }

    #[test]
    fn notice_period_can_push_into_next_period() {
        let t = terms(date(2024, 1, 1), BillingPeriod::Monthly, 0, 30);
        // 2024-03-15 + 30 days = 2024-04-14
        assert_eq!(t.earliest_end_date(date(2024, 3, 15)), date(2024, 4, 30));
        // 2024-03-01 + 30 days = 2024-03-31, exactly a period end
        assert_eq!(t.earliest_end_date(date(2024, 3, 1)), date(2024, 3, 31));
    }

    #[test]
    fn minimum_term_is_respected() {
        let t = terms(date(2024, 1, 1), BillingPeriod::Monthly, 12, 30);
        assert_eq!(t.earliest_end_date(date(2024, 2, 1)), date(2024, 12, 31));
        // After the minimum term has passed, normal rules apply
        assert_eq!(t.earliest_end_date(date(2025, 5, 10)), date(2025, 6, 30));
    }

    #[test]
    fn minimum_term_rounds_up_to_whole_periods() {
        let t = terms(date(2024, 1, 1), BillingPeriod::Quarterly, 4, 0);
        // 4 months needs two quarters
        assert_eq!(t.earliest_end_date(date(2024, 1, 2)), date(2024, 6, 30));
    }

    #[test]
    fn request_before_start_ends_first_period() {
        let t = terms(date(2024, 6, 1), BillingPeriod::Yearly, 0, 14);
        assert_eq!(t.earliest_end_date(date(2024, 5, 1)), date(2025, 5, 31));
    }

    #[test]
    fn long_running_contract_jumps_ahead() {
        let t = terms(date(2010, 1, 15), BillingPeriod::Quarterly, 0, 90);
        // 2024-02-01 + 90 days = 2024-05-01; quarters end on the 14th of Jan/Apr/Jul/Oct
        assert_eq!(t.earliest_end_date(date(2024, 2, 1)), date(2024, 7, 14));
    }

    #[test]
    fn billing_periods_follow_each_other() {
        let t = terms(date(2024, 1, 31), BillingPeriod::Monthly, 0, 0);
        let mut billed_until = None;
        let mut ends = Vec::new();
        for _ in 0..3 {
            let (from, to) = t.next_billing_period(billed_until, None).unwrap();
            if let Some(prev) = billed_until {
                assert_eq!(from, prev + Days::new(1));
            }
            ends.push(to);
            billed_until = Some(to);
        }
        // Same boundaries the cancellation arithmetic uses
        assert_eq!(ends, vec![t.period_end(1), t.period_end(2), t.period_end(3)]);
        assert_eq!(ends, vec![date(2024, 2, 28), date(2024, 3, 30), date(2024, 4, 29)]);

        let q = terms(date(2024, 1, 1), BillingPeriod::Quarterly, 0, 0);
        assert_eq!(
            q.next_billing_period(Some(date(2024, 3, 31)), None),
            Some((date(2024, 4, 1), date(2024, 6, 30)))
        );
    }

    #[test]
    fn billing_stops_at_cancellation_date() {
        let t = terms(date(2024, 1, 31), BillingPeriod::Monthly, 0, 0);
        let end = Some(date(2024, 3, 30));
        assert_eq!(
            t.next_billing_period(Some(date(2024, 2, 28)), end),
            Some((date(2024, 2, 29), date(2024, 3, 30)))
        );
        assert_eq!(t.next_billing_period(Some(date(2024, 3, 30)), end), None);

        // An explicit date inside a period cuts the last window short
        let mid = Some(date(2024, 3, 15));
        assert_eq!(
            t.next_billing_period(Some(date(2024, 2, 28)), mid),
            Some((date(2024, 2, 29), date(2024, 3, 15)))
        );
        assert_eq!(t.next_billing_period(Some(date(2024, 3, 15)), mid), None);
    }

    #[test]
    fn billing_realigns_to_period_boundaries() {
        // billed_until left mid-period by an older run
        let t = terms(date(2024, 1, 31), BillingPeriod::Monthly, 0, 0);
        assert_eq!(
            t.next_billing_period(Some(date(2024, 3, 28)), None),
            Some((date(2024, 3, 29), date(2024, 3, 30)))
        );
        assert_eq!(
            t.next_billing_period(None, Some(date(2024, 1, 30))),
            None
        );
    }

    #[test]
    fn status_is_derived_from_cancellation_date() {
        let today = date(2024, 6, 15);
        assert_eq!(contract_status(None, today), ContractStatus::Active);
        assert_eq!(contract_status(Some(date(2024, 6, 30)), today), ContractStatus::Cancelled);
        assert_eq!(contract_status(Some(today), today), ContractStatus::Cancelled);
        assert_eq!(contract_status(Some(date(2024, 6, 14)), today), ContractStatus::Ended);
    }

    #[test]
    fn validation_bounds() {
        let req = UpdateContractRequest {
            price: Some(Decimal::NEGATIVE_ONE),
            minimum_term_months: Some(121),
            notice_period_days: Some(400),
            ..Default::default()
        };
        assert_eq!(req.validate().unwrap_err().into_inner().len(), 3);
    }
}
