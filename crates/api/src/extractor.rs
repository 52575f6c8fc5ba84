//! Translation of attribution data into SaleBot callback parameters

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ApiError, ApiResult};

/// Appended to the UTM content of a first payment
pub const NEW_PAYMENT_SUFFIX: &str = " ГАМАРДЖОБА_ГЕНАЦВАЛЕ1321312421";

/// Sent verbatim for every recurring payment
pub const RECURRING_MESSAGE: &str = "Продление ГАМАРДЖОБА_ГЕНАЦВАЛЕ7447213141232";

/// Subscription length used when the content names no known plan
pub const DEFAULT_SUBSCRIPTION_DAYS: u32 = 30;

/// Plan length in months → days credited downstream
const MONTHS_TO_DAYS: &[(u32, u32)] = &[(1, 30), (3, 90), (6, 180), (12, 365)];

#[allow(clippy::unwrap_used)] // Literal pattern
static SUBSCRIPTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:subscription|подписка)\s+([0-9]+)\s+(?:month|месяц)").unwrap()
});

/// Magic strings SaleBot uses to tell message intents apart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTokens {
    pub new_payment_suffix: String,
    pub recurring_message: String,
}

impl Default for MessageTokens {
    fn default() -> Self {
        Self {
            new_payment_suffix: NEW_PAYMENT_SUFFIX.to_string(),
            recurring_message: RECURRING_MESSAGE.to_string(),
        }
    }
}

/// Query parameters for one SaleBot callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundParams {
    pub message: String,
    pub client_id: String,
    pub contract_id: String,
    pub days_add: Option<u32>,
}

impl OutboundParams {
    /// Parameters in wire order; `days_add` only when set
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("message", self.message.clone()),
            ("client_id", self.client_id.clone()),
            ("contract_id", self.contract_id.clone()),
        ];
        if let Some(days) = self.days_add {
            pairs.push(("days_add", days.to_string()));
        }
        pairs
    }
}

/// Build callback parameters from attribution data.
///
/// `source` becomes the SaleBot `client_id` and must be non-empty.
pub fn build_outbound_params(
    tokens: &MessageTokens,
    content: &str,
    source: &str,
    contract_id: &str,
    is_recurring: bool,
    days_to_add: Option<u32>,
) -> ApiResult<OutboundParams> {
    if source.is_empty() {
        return Err(ApiError::Validation("utm_source is required".to_string()));
    }

    let message = if is_recurring {
        tokens.recurring_message.clone()
    } else {
        format!("{}{}", content, tokens.new_payment_suffix)
    };

    Ok(OutboundParams {
        message,
        client_id: source.to_string(),
        contract_id: contract_id.to_string(),
        days_add: days_to_add,
    })
}

/// Days to credit for a renewal, inferred from the first payment's UTM content.
///
/// This is a fixed business table, not calendar arithmetic.
pub fn subscription_days(content: &str) -> u32 {
    SUBSCRIPTION_PATTERN
        .captures(content)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .and_then(|months| {
            MONTHS_TO_DAYS
                .iter()
                .find(|(m, _)| *m == months)
                .map(|(_, days)| *days)
        })
        .unwrap_or(DEFAULT_SUBSCRIPTION_DAYS)
}
