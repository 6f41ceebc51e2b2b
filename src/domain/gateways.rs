//! Payment gateway configuration records

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::invoices::round_money;
use super::validation::{length_between, ValidationErrors};

/// Replacement shown for secret settings values
pub const MASK: &str = "********";

const SECRET_MARKERS: [&str; 4] = ["secret", "key", "password", "token"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatewayDriver {
    BankTransfer,
    Stripe,
    Paypal,
    Manual,
}

impl GatewayDriver {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BankTransfer => "bank_transfer",
            Self::Stripe => "stripe",
            Self::Paypal => "paypal",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bank_transfer" => Some(Self::BankTransfer),
            "stripe" => Some(Self::Stripe),
            "paypal" => Some(Self::Paypal),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

pub fn gateway_fee(amount: Decimal, fee_percent: Decimal, fee_fixed: Decimal) -> Decimal {
    round_money(amount * fee_percent / Decimal::ONE_HUNDRED) + fee_fixed
}

fn is_secret_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SECRET_MARKERS.iter().any(|marker| key.contains(marker))
}

/// Copy of `settings` with secret values replaced by [`MASK`].
pub fn mask_settings(settings: &Value) -> Value {
    match settings {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if is_secret_key(k) && !v.is_null() {
                        Value::String(MASK.to_string())
                    } else {
                        mask_settings(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Apply an update where masked values mean "keep what is stored".
pub fn merge_settings(stored: &Value, incoming: &Value) -> Value {
    match (stored, incoming) {
        (Value::Object(old), Value::Object(new)) => {
            let mut merged = Map::new();
            for (k, v) in new {
                let value = match (v, old.get(k)) {
                    (Value::String(s), Some(previous)) if s == MASK => previous.clone(),
                    (Value::Object(_), Some(previous)) => merge_settings(previous, v),
                    _ => v.clone(),
                };
                merged.insert(k.clone(), value);
            }
            Value::Object(merged)
        }
        _ => incoming.clone(),
    }
}

fn validate_fees(errors: &mut ValidationErrors, fee_percent: Option<Decimal>, fee_fixed: Option<Decimal>) {
    if let Some(pct) = fee_percent {
        errors.check(
            pct >= Decimal::ZERO && pct <= Decimal::ONE_HUNDRED,
            "fee_percent",
            "must be between 0 and 100",
        );
    }
    if let Some(fixed) = fee_fixed {
        errors.check(fixed >= Decimal::ZERO, "fee_fixed", "must not be negative");
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateGatewayRequest {
    pub name: String,
    pub driver: GatewayDriver,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub fee_percent: Decimal,
    #[serde(default)]
    pub fee_fixed: Decimal,
    #[serde(default)]
    pub settings: Option<Value>,
}

impl CreateGatewayRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        errors.check(length_between(&self.name, 1, 100), "name", "must be 1-100 characters");
        validate_fees(&mut errors, Some(self.fee_percent), Some(self.fee_fixed));
        if let Some(settings) = &self.settings {
            errors.check(settings.is_object(), "settings", "must be an object");
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateGatewayRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub driver: Option<GatewayDriver>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub sort_order: Option<i32>,
    #[serde(default)]
    pub fee_percent: Option<Decimal>,
    #[serde(default)]
    pub fee_fixed: Option<Decimal>,
    #[serde(default)]
    pub settings: Option<Value>,
}

impl UpdateGatewayRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if let Some(name) = &self.name {
            errors.check(length_between(name, 1, 100), "name", "must be 1-100 characters");
        }
        validate_fees(&mut errors, self.fee_percent, self.fee_fixed);
        if let Some(settings) = &self.settings {
            errors.check(settings.is_object(), "settings", "must be an object");
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayResponse {
    pub id: Uuid,
    pub name: String,
    pub driver: GatewayDriver,
    pub enabled: bool,
    pub sort_order: i32,
    pub fee_percent: Decimal,
    pub fee_fixed: Decimal,
    pub settings: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What customers see when choosing how to pay
#[derive(Debug, Clone, Serialize)]
pub struct PublicGateway {
    pub id: Uuid,
    pub name: String,
    pub driver: GatewayDriver,
    pub fee_percent: Decimal,
    pub fee_fixed: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayFeeQuery {
    #[serde(default)]
    pub amount: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn fee_combines_percent_and_fixed() {
        assert_eq!(gateway_fee(d("100.00"), d("1.4"), d("0.25")), d("1.65"));
        assert_eq!(gateway_fee(d("19.99"), d("2.9"), d("0.30")), d("0.88"));
        assert_eq!(gateway_fee(d("50"), d("0"), d("0")), d("0"));
    }

    #[test]
    fn secrets_are_masked_recursively() {
        let settings = json!({
            "account_id": "acct_1",
            "secret_key": "sk_live_abc",
            "webhook": {"signing_token": "whsec", "url": "https://x"},
            "API_KEY": null
        });
        let masked = mask_settings(&settings);
        assert_eq!(masked["account_id"], "acct_1");
        assert_eq!(masked["secret_key"], MASK);
        assert_eq!(masked["webhook"]["signing_token"], MASK);
        assert_eq!(masked["webhook"]["url"], "https://x");
        assert!(masked["API_KEY"].is_null());
    }

    #[test]
    fn masked_values_keep_stored_secret_on_update() {
        let stored = json!({"secret_key": "sk_live_abc", "account_id": "acct_1", "nested": {"password": "p"}});
        let incoming = json!({"secret_key": MASK, "account_id": "acct_2", "nested": {"password": MASK}});
        let merged = merge_settings(&stored, &incoming);
        assert_eq!(merged["secret_key"], "sk_live_abc");
        assert_eq!(merged["account_id"], "acct_2");
        assert_eq!(merged["nested"]["password"], "p");

        // keys left out of the update are dropped
        let merged = merge_settings(&stored, &json!({"account_id": "acct_3"}));
        assert!(merged.get("secret_key").is_none());
    }

    #[test]
    fn fee_validation() {
        let req = UpdateGatewayRequest {
            fee_percent: Some(d("101")),
            fee_fixed: Some(d("-1")),
            settings: Some(json!([1, 2])),
            ..Default::default()
        };
        assert_eq!(req.validate().unwrap_err().into_inner().len(), 3);
    }
}
