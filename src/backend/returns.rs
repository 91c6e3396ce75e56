//! Return-registration vocabulary and the acceptance decision table.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::orders::Order;

/// Why the customer wants to return the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnReason {
    Defective,
    Damaged,
    WrongItem,
    SizeIssue,
    ImageDifferent,
    Other,
}

impl ReturnReason {
    /// Seller-fault reasons: the shop pays return shipping and the 7-day /
    /// opened-condition restrictions do not bar acceptance.
    pub fn is_seller_fault(self) -> bool {
        matches!(self, Self::Defective | Self::Damaged | Self::WrongItem)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Defective => "不良品",
            Self::Damaged => "破損",
            Self::WrongItem => "誤配送",
            Self::SizeIssue => "サイズ違い",
            Self::ImageDifferent => "イメージ違い",
            Self::Other => "その他",
        }
    }
}

/// Whether the package has been opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemCondition {
    Unopened,
    Opened,
}

impl ItemCondition {
    pub fn label(self) -> &'static str {
        match self {
            Self::Unopened => "未開封",
            Self::Opened => "開封済み",
        }
    }
}

/// What the customer wants in exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    Refund,
    Exchange,
}

impl ReturnKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Refund => "返金",
            Self::Exchange => "交換",
        }
    }
}

/// Who pays the return shipping when a return is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingPayer {
    Seller,
    Buyer,
}

/// Outcome of the acceptance check. Refusals are not errors: they carry a
/// spoken message and a handoff flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Eligibility {
    pub eligible: bool,
    pub requires_handoff: bool,
    pub shipping_payer: Option<ShippingPayer>,
    pub message: String,
}

impl Eligibility {
    fn handoff(message: &str) -> Self {
        Self {
            eligible: false,
            requires_handoff: true,
            shipping_payer: None,
            message: message.to_string(),
        }
    }

    fn accepted(payer: ShippingPayer, message: &str) -> Self {
        Self {
            eligible: true,
            requires_handoff: false,
            shipping_payer: Some(payer),
            message: message.to_string(),
        }
    }
}

/// Orders at or above this amount are handled by a human agent.
pub const HIGH_VALUE_THRESHOLD: i64 = 10_000;

/// Customer-convenience returns are accepted up to this many days after
/// delivery.
pub const RETURN_WINDOW_DAYS: i64 = 7;

/// The acceptance decision table, evaluated top to bottom:
///
/// 1. high-value order → agent
/// 2. outside the return window → agent
/// 3. seller-fault reason → accepted, shop pays shipping
/// 4. opened package → agent
/// 5. otherwise → accepted, customer pays shipping
pub fn assess(
    order: &Order,
    reason: ReturnReason,
    condition: ItemCondition,
    today: NaiveDate,
) -> Eligibility {
    if order.total_amount >= HIGH_VALUE_THRESHOLD {
        return Eligibility::handoff("高額商品のため、担当者が対応いたします。");
    }

    if let Some(shipped) = order.shipped_date_parsed() {
        if (today - shipped).num_days() > RETURN_WINDOW_DAYS {
            return Eligibility::handoff(
                "お届けから7日を過ぎているため、担当者が対応いたします。",
            );
        }
    }

    if reason.is_seller_fault() {
        return Eligibility::accepted(
            ShippingPayer::Seller,
            "返品を承ります。返送料は当店負担でございます。",
        );
    }

    if condition == ItemCondition::Opened {
        return Eligibility::handoff("開封済みの商品のため、担当者が対応いたします。");
    }

    Eligibility::accepted(
        ShippingPayer::Buyer,
        "返品を承ります。返送料はお客様のご負担となります。",
    )
}
