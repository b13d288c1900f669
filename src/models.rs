//! Wire and domain types shared by the order client and the order server.
//!
//! Field names follow the JSON contract of `POST /api/orders/public`
//! (camelCase). The same `OrderSubmission::validate` runs on both sides so a
//! payload the client accepts for queueing is one the server will accept too.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Notes stored on a public order when the customer leaves none.
pub const DEFAULT_PUBLIC_ORDER_NOTES: &str = "Online order";

const PHONE_PATTERN: &str = r"^\(\d{2}\)\s\d{4,5}-\d{4}$";

static PHONE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PHONE_PATTERN).expect("Invalid phone regex"));

// ---------------------------------------------------------------------------
// Submission payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemInput {
    pub product_id: i64,
    pub quantity: i64,
    /// Client-side price. Only used when the product is missing from the catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
}

/// Public order payload as sent by the storefront.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSubmission {
    pub customer: CustomerInput,
    #[serde(default)]
    pub items: Vec<OrderItemInput>,
    #[serde(default)]
    pub payment_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl CustomerInput {
    /// Email with blanks folded into `None`.
    pub fn normalized_email(&self) -> Option<String> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
    }
}

impl OrderSubmission {
    /// Check required fields and item invariants.
    ///
    /// Collects every problem instead of stopping at the first one so the
    /// caller can show all field errors at once.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();

        if self.customer.name.trim().is_empty() {
            errors.push("customer.name", "name is required");
        }
        let phone = self.customer.phone.trim();
        if phone.is_empty() {
            errors.push("customer.phone", "phone is required");
        } else if !PHONE_REGEX.is_match(phone) {
            errors.push(
                "customer.phone",
                "phone must look like (11) 91234-5678 or (11) 1234-5678",
            );
        }
        if self.customer.address.trim().is_empty() {
            errors.push("customer.address", "address is required");
        }
        if let Some(email) = self.customer.normalized_email() {
            if !looks_like_email(&email) {
                errors.push("customer.email", "email is invalid");
            }
        }
        if self.payment_method.trim().is_empty() {
            errors.push("paymentMethod", "payment method is required");
        }

        if self.items.is_empty() {
            errors.push("items", "order must have at least one item");
        }
        for (idx, item) in self.items.iter().enumerate() {
            if item.product_id < 1 {
                errors.push(format!("items[{idx}].productId"), "product id is invalid");
            }
            if item.quantity < 1 {
                errors.push(
                    format!("items[{idx}].quantity"),
                    "quantity must be at least 1",
                );
            }
            if let Some(price) = item.unit_price {
                if !price.is_finite() || price < 0.0 {
                    errors.push(
                        format!("items[{idx}].unitPrice"),
                        "unit price must be zero or more",
                    );
                }
            }
        }

        errors.into_result()
    }
}

fn looks_like_email(value: &str) -> bool {
    let mut parts = value.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !value.chars().any(char::is_whitespace)
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// All field-level problems found in one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("invalid order payload: {}", self.summary())]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.push(field, message);
        errors
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    fn into_result(self) -> Result<(), Self> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// ---------------------------------------------------------------------------
// Server results
// ---------------------------------------------------------------------------

/// Acknowledgement returned once an order is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub order_id: i64,
    pub total_amount: f64,
    #[serde(default)]
    pub deduplicated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Preparing,
    Ready,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Preparing,
        Self::Ready,
        Self::OutForDelivery,
        Self::Delivered,
        Self::Cancelled,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|s| s.as_str() == normalized)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    /// `None` when the product no longer exists in the catalog.
    pub product_name: Option<String>,
    pub quantity: i64,
    pub unit_price: f64,
    pub subtotal: f64,
}

/// Order header with its customer summary and nested line items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub customer_id: i64,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub status: OrderStatus,
    pub total_amount: f64,
    pub payment_method: String,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub items: Vec<OrderLineItem>,
}

/// Filters accepted by the order listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFilter {
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub customer_id: Option<i64>,
    /// Inclusive `YYYY-MM-DD`.
    #[serde(default)]
    pub date_from: Option<String>,
    /// Inclusive `YYYY-MM-DD`.
    #[serde(default)]
    pub date_to: Option<String>,
}

// ---------------------------------------------------------------------------
// Client-side queue types
// ---------------------------------------------------------------------------

/// An order waiting in the local queue. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOrder {
    pub local_id: String,
    pub payload: OrderSubmission,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncItemError {
    pub local_id: String,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Per-cycle delivery counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<SyncItemError>,
}

/// Result of one `sync_pending_orders` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<SyncReport>,
}

/// Last drained cycle, overwritten wholesale every time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub last_sync_at: DateTime<Utc>,
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub errors: Vec<SyncItemError>,
}

/// Round a money amount to cents.
pub fn round_money(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
