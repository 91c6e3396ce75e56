//! Order domain model and backend wire mapping.
//!
//! The order backend speaks an all-strings wire format: every column of an
//! order record arrives as a string, numeric or not. This module owns the
//! parsing of those records into typed [`Order`] values, plus the small
//! inference tables (status codes, delivery carriers, sales platform) the
//! rest of the bridge relies on.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Order lifecycle status, mapped from backend status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Preparing,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
    Returned,
}

/// Map a backend status code to an [`OrderStatus`].
///
/// Unknown codes map to `Pending` rather than failing: a new backend code
/// must never take a call down.
pub fn map_status(code: &str) -> OrderStatus {
    match code.trim() {
        "10" => OrderStatus::Pending,
        "20" => OrderStatus::Preparing,
        "30" => OrderStatus::Confirmed,
        "40" => OrderStatus::Shipped,
        "50" => OrderStatus::Delivered,
        "99" => OrderStatus::Cancelled,
        _ => OrderStatus::Pending,
    }
}

/// Sales platform, inferred from the backend store id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Rakuten,
    Amazon,
    Shopify,
}

/// Infer the sales platform from a store id.
pub fn infer_platform(store_id: &str) -> Platform {
    let id = store_id.trim().to_ascii_lowercase();
    if id.starts_with("rakuten") || id.starts_with('1') {
        Platform::Rakuten
    } else if id.starts_with("amazon") || id.starts_with('2') {
        Platform::Amazon
    } else {
        Platform::Shopify
    }
}

/// Known delivery carriers and their canonical display names.
const CARRIER_TABLE: &[(&str, &str)] = &[
    ("ヤマト", "ヤマト運輸"),
    ("佐川", "佐川急便"),
    ("日本郵便", "日本郵便"),
    ("ゆうパック", "日本郵便"),
    ("西濃", "西濃運輸"),
    ("福山", "福山通運"),
];

/// Infer the canonical carrier name from a free-form delivery-method string.
///
/// Unmatched strings come back verbatim so an unusual carrier still reads
/// sensibly in a status sentence.
pub fn extract_carrier(delivery_method: &str) -> String {
    for (needle, canonical) in CARRIER_TABLE {
        if delivery_method.contains(needle) {
            return (*canonical).to_string();
        }
    }
    delivery_method.to_string()
}

/// Normalize a dialed number to the backend's national form.
///
/// `+81…` and bare `81…` (11+ digits) collapse to `0…`; dashes are removed.
/// Idempotent: normalizing an already-national number is a no-op.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| *c != '-' && *c != ' ').collect();
    if let Some(rest) = digits.strip_prefix("+81") {
        return format!("0{rest}");
    }
    if digits.len() >= 11 {
        if let Some(rest) = digits.strip_prefix("81") {
            return format!("0{rest}");
        }
    }
    digits
}

/// A single order line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub name: String,
    pub qty: u32,
    pub price: i64,
}

/// An order snapshot. Backend-owned; read-only inside the bridge except
/// through the explicit return-registration write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_phone: String,
    pub status: OrderStatus,
    pub order_date: String,
    pub shipped_date: Option<String>,
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub items: Vec<OrderItem>,
    pub total_amount: i64,
    pub platform: Platform,
}

impl Order {
    /// Parse the order date (`YYYY-MM-DD`), if well-formed.
    pub fn order_date_parsed(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.order_date, "%Y-%m-%d").ok()
    }

    /// Parse the ship date (`YYYY-MM-DD`), if present and well-formed.
    pub fn shipped_date_parsed(&self) -> Option<NaiveDate> {
        self.shipped_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    }
}

/// Human-readable status sentence for an order, in the register the
/// assistant speaks. Shipped orders name the carrier and tracking number
/// when known.
pub fn status_message(order: &Order) -> String {
    match order.status {
        OrderStatus::Pending => "ご注文を確認いたしました。発送準備を進めております。".to_string(),
        OrderStatus::Preparing => "商品の発送準備中でございます。".to_string(),
        OrderStatus::Confirmed => "ご注文が確定いたしました。まもなく発送いたします。".to_string(),
        OrderStatus::Shipped => match (&order.carrier, &order.tracking_number) {
            (Some(carrier), Some(tracking)) => format!(
                "{carrier}にて発送済みでございます。お問い合わせ番号は{tracking}です。"
            ),
            (Some(carrier), None) => format!("{carrier}にて発送済みでございます。"),
            _ => "発送済みでございます。".to_string(),
        },
        OrderStatus::Delivered => "お届け済みでございます。".to_string(),
        OrderStatus::Cancelled => "キャンセル済みのご注文でございます。".to_string(),
        OrderStatus::Returned => "返品手続き済みのご注文でございます。".to_string(),
    }
}

/// Compact order view carried inside the identification context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub order_id: String,
    pub order_date: String,
    pub status: OrderStatus,
    pub item_names: Vec<String>,
    pub total_amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
    pub status_message: String,
}

impl From<&Order> for OrderSummary {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.order_id.clone(),
            order_date: order.order_date.clone(),
            status: order.status,
            item_names: order.items.iter().map(|i| i.name.clone()).collect(),
            total_amount: order.total_amount,
            carrier: order.carrier.clone(),
            tracking_number: order.tracking_number.clone(),
            status_message: status_message(order),
        }
    }
}

/// Result of the pre-call phone lookup, carried through the carrier's
/// custom stream parameters as base64 JSON. Lookup failure is expressed as
/// `found=false, error=true`, never as an absent context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdentificationContext {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    pub greeting_hint: String,
    #[serde(default)]
    pub orders: Vec<OrderSummary>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

impl IdentificationContext {
    /// Context for a caller the backend does not know.
    pub fn unknown() -> Self {
        Self {
            found: false,
            customer_name: None,
            greeting_hint: "お電話ありがとうございます。ご用件をお伺いいたします。".to_string(),
            orders: Vec::new(),
            error: false,
        }
    }

    /// Context when the lookup itself failed. The call proceeds with the
    /// neutral greeting; the flag only changes what gets logged.
    pub fn lookup_failed() -> Self {
        Self {
            error: true,
            ..Self::unknown()
        }
    }

    /// Context for an identified caller.
    pub fn identified(customer_name: String, orders: Vec<OrderSummary>) -> Self {
        let greeting_hint = format!(
            "お電話ありがとうございます。{customer_name}様でいらっしゃいますね。ご用件をお伺いいたします。"
        );
        Self {
            found: true,
            customer_name: Some(customer_name),
            greeting_hint,
            orders,
            error: false,
        }
    }
}

// =============================================================================
// Wire format
// =============================================================================

/// Search/response envelope of the order backend.
#[derive(Debug, Deserialize)]
pub struct BackendEnvelope {
    pub result: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub count: Option<String>,
    #[serde(default)]
    pub data: Option<Vec<OrderRecord>>,
}

/// An order record as the backend sends it: every value a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub order_id: String,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_phone: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub order_date: String,
    #[serde(default)]
    pub shipped_date: Option<String>,
    #[serde(default)]
    pub delivery_method: Option<String>,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub items: Vec<ItemRecord>,
    #[serde(default)]
    pub total_amount: String,
    #[serde(default)]
    pub store_id: String,
}

/// An order line as the backend sends it.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub qty: String,
    #[serde(default)]
    pub price: String,
}

impl OrderRecord {
    /// Convert a wire record into a typed [`Order`].
    pub fn into_order(self) -> Order {
        let carrier = self
            .delivery_method
            .as_deref()
            .filter(|m| !m.is_empty())
            .map(extract_carrier);
        let tracking_number = self.tracking_number.filter(|t| !t.is_empty());
        let shipped_date = self.shipped_date.filter(|d| !d.is_empty());
        Order {
            status: map_status(&self.status),
            platform: infer_platform(&self.store_id),
            items: self
                .items
                .into_iter()
                .map(|i| OrderItem {
                    name: i.name,
                    qty: i.qty.trim().parse().unwrap_or(1),
                    price: i.price.trim().parse().unwrap_or(0),
                })
                .collect(),
            total_amount: self.total_amount.trim().parse().unwrap_or(0),
            order_id: self.order_id,
            customer_name: self.customer_name,
            customer_email: self.customer_email.filter(|e| !e.is_empty()),
            customer_phone: self.customer_phone,
            order_date: self.order_date,
            shipped_date,
            carrier,
            tracking_number,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
