//! Order-management backend integration: the HTTP client, the order
//! domain model, and the return-acceptance rules.

pub mod client;
pub mod orders;
pub mod returns;

pub use client::{BackendError, OrderClient, ReturnReceipt, ReturnRequest};
pub use orders::{
    extract_carrier, infer_platform, map_status, normalize_phone, status_message,
    IdentificationContext, Order, OrderItem, OrderStatus, OrderSummary, Platform,
};
pub use returns::{
    assess, Eligibility, ItemCondition, ReturnKind, ReturnReason, ShippingPayer,
};
