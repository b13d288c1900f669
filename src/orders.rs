//! Order persistence.
//!
//! `submit_public_order` runs customer upsert, pricing, header insert and
//! line-item inserts as one `BEGIN IMMEDIATE` transaction, so an order is
//! either stored with all its items or not at all.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::catalog;
use crate::customers;
use crate::db::DbState;
use crate::error::OrderError;
use crate::models::{
    round_money, Order, OrderFilter, OrderLineItem, OrderStatus, OrderSubmission, SubmitReceipt,
    ValidationErrors, DEFAULT_PUBLIC_ORDER_NOTES,
};

/// A line item ready to insert.
struct PricedLine {
    product_id: i64,
    quantity: i64,
    unit_price: f64,
    subtotal: f64,
}

/// Price submitted items against the catalog.
///
/// Items whose product is missing add nothing to the total. They still get
/// a line item when the client sent a `unitPrice`, and are dropped
/// otherwise.
fn price_items(conn: &Connection, submission: &OrderSubmission) -> Result<(Vec<PricedLine>, f64), String> {
    let mut lines = Vec::with_capacity(submission.items.len());
    let mut total = 0.0;

    for item in &submission.items {
        match catalog::product_price(conn, item.product_id)? {
            Some(price) => {
                let subtotal = round_money(price * item.quantity as f64);
                total += subtotal;
                lines.push(PricedLine {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: price,
                    subtotal,
                });
            }
            None => match item.unit_price {
                Some(fallback) => {
                    warn!(
                        product_id = item.product_id,
                        fallback, "Unknown product, storing line with client price"
                    );
                    lines.push(PricedLine {
                        product_id: item.product_id,
                        quantity: item.quantity,
                        unit_price: fallback,
                        subtotal: round_money(fallback * item.quantity as f64),
                    });
                }
                None => {
                    warn!(product_id = item.product_id, "Unknown product without price, item skipped");
                }
            },
        }
    }

    Ok((lines, round_money(total)))
}

fn find_by_idempotency_key(conn: &Connection, key: &str) -> Result<Option<SubmitReceipt>, String> {
    conn.query_row(
        "SELECT id, total_amount FROM orders WHERE idempotency_key = ?1",
        params![key],
        |row| {
            Ok(SubmitReceipt {
                order_id: row.get(0)?,
                total_amount: row.get(1)?,
                deduplicated: true,
            })
        },
    )
    .optional()
    .map_err(|e| format!("query idempotent order: {e}"))
}

/// Persist a public order. See the module docs for the atomicity contract.
///
/// With an `idempotency_key` already seen, the stored order is returned
/// with `deduplicated = true` and nothing is written.
pub fn submit_public_order(
    db: &DbState,
    submission: &OrderSubmission,
    idempotency_key: Option<&str>,
) -> Result<SubmitReceipt, OrderError> {
    submission.validate()?;

    let key = idempotency_key.map(str::trim).filter(|k| !k.is_empty());
    let conn = db
        .conn
        .lock()
        .map_err(|e| OrderError::Persistence(e.to_string()))?;

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| OrderError::Persistence(format!("begin transaction: {e}")))?;

    let result = (|| -> Result<SubmitReceipt, String> {
        if let Some(key) = key {
            if let Some(existing) = find_by_idempotency_key(&conn, key)? {
                info!(
                    order_id = existing.order_id,
                    idempotency_key = %key,
                    "Public order deduplicated via idempotency key"
                );
                return Ok(existing);
            }
        }

        let (customer_id, _created) = customers::upsert_by_phone(&conn, &submission.customer)?;
        let (lines, total) = price_items(&conn, submission)?;

        let notes = submission
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_PUBLIC_ORDER_NOTES);

        conn.execute(
            "INSERT INTO orders (customer_id, status, total_amount, payment_method, notes, idempotency_key)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                customer_id,
                OrderStatus::Pending.as_str(),
                total,
                submission.payment_method.trim(),
                notes,
                key,
            ],
        )
        .map_err(|e| format!("insert order: {e}"))?;
        let order_id = conn.last_insert_rowid();

        for line in &lines {
            conn.execute(
                "INSERT INTO order_items (order_id, product_id, quantity, unit_price, subtotal)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![order_id, line.product_id, line.quantity, line.unit_price, line.subtotal],
            )
            .map_err(|e| format!("insert order item: {e}"))?;
        }

        Ok(SubmitReceipt {
            order_id,
            total_amount: total,
            deduplicated: false,
        })
    })();

    match result {
        Ok(receipt) => {
            if let Err(e) = conn.execute_batch("COMMIT") {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(OrderError::Persistence(format!("commit: {e}")));
            }
            if !receipt.deduplicated {
                info!(
                    order_id = receipt.order_id,
                    total_amount = receipt.total_amount,
                    "Public order created"
                );
            }
            Ok(receipt)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(OrderError::Persistence(e))
        }
    }
}

// ---------------------------------------------------------------------------
// Order queries
// ---------------------------------------------------------------------------

const ORDER_SELECT: &str = "SELECT o.id, o.customer_id, c.name, c.phone, o.status, o.total_amount,
        o.payment_method, o.notes, o.created_at, o.updated_at
     FROM orders o
     LEFT JOIN customers c ON c.id = o.customer_id";

fn order_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Order> {
    let status: String = row.get(4)?;
    Ok(Order {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        customer_name: row.get(2)?,
        customer_phone: row.get(3)?,
        status: OrderStatus::parse(&status).unwrap_or_default(),
        total_amount: row.get(5)?,
        payment_method: row.get(6)?,
        notes: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        items: Vec::new(),
    })
}

fn load_items(conn: &Connection, order_id: i64) -> Result<Vec<OrderLineItem>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT i.id, i.order_id, i.product_id, p.name, i.quantity, i.unit_price, i.subtotal
             FROM order_items i
             LEFT JOIN products p ON p.id = i.product_id
             WHERE i.order_id = ?1
             ORDER BY i.id",
        )
        .map_err(|e| format!("prepare order items: {e}"))?;
    let rows = stmt
        .query_map(params![order_id], |row| {
            Ok(OrderLineItem {
                id: row.get(0)?,
                order_id: row.get(1)?,
                product_id: row.get(2)?,
                product_name: row.get(3)?,
                quantity: row.get(4)?,
                unit_price: row.get(5)?,
                subtotal: row.get(6)?,
            })
        })
        .map_err(|e| format!("query order items: {e}"))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("read order items: {e}"))
}

fn check_date(field: &str, value: Option<&str>, errors: &mut ValidationErrors) {
    if let Some(v) = value {
        if NaiveDate::parse_from_str(v, "%Y-%m-%d").is_err() {
            errors.push(field, "date must be YYYY-MM-DD");
        }
    }
}

/// Orders matching `filter`, oldest id first, with nested line items.
pub fn list_orders(db: &DbState, filter: &OrderFilter) -> Result<Vec<Order>, OrderError> {
    let mut errors = ValidationErrors::default();
    check_date("dateFrom", filter.date_from.as_deref(), &mut errors);
    check_date("dateTo", filter.date_to.as_deref(), &mut errors);
    if !errors.is_empty() {
        return Err(errors.into());
    }

    let conn = db
        .conn
        .lock()
        .map_err(|e| OrderError::Persistence(e.to_string()))?;

    let mut stmt = conn
        .prepare(&format!(
            "{ORDER_SELECT}
             WHERE (?1 IS NULL OR o.status = ?1)
               AND (?2 IS NULL OR o.customer_id = ?2)
               AND (?3 IS NULL OR date(o.created_at) >= ?3)
               AND (?4 IS NULL OR date(o.created_at) <= ?4)
             ORDER BY o.id ASC"
        ))
        .map_err(|e| OrderError::Persistence(format!("prepare orders: {e}")))?;
    let mut orders = stmt
        .query_map(
            params![
                filter.status.map(OrderStatus::as_str),
                filter.customer_id,
                filter.date_from,
                filter.date_to,
            ],
            order_from_row,
        )
        .map_err(|e| OrderError::Persistence(format!("query orders: {e}")))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| OrderError::Persistence(format!("read orders: {e}")))?;

    for order in &mut orders {
        order.items = load_items(&conn, order.id).map_err(OrderError::Persistence)?;
    }
    Ok(orders)
}

pub fn get_order(db: &DbState, id: i64) -> Result<Option<Order>, OrderError> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| OrderError::Persistence(e.to_string()))?;
    let order = conn
        .query_row(
            &format!("{ORDER_SELECT} WHERE o.id = ?1"),
            params![id],
            order_from_row,
        )
        .optional()
        .map_err(|e| OrderError::Persistence(format!("get order: {e}")))?;
    match order {
        Some(mut order) => {
            order.items = load_items(&conn, order.id).map_err(OrderError::Persistence)?;
            Ok(Some(order))
        }
        None => Ok(None),
    }
}

pub fn update_status(db: &DbState, id: i64, status: OrderStatus) -> Result<(), OrderError> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| OrderError::Persistence(e.to_string()))?;
    let changed = conn
        .execute(
            "UPDATE orders SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![status.as_str(), id],
        )
        .map_err(|e| OrderError::Persistence(format!("update order status: {e}")))?;
    if changed == 0 {
        return Err(OrderError::NotFound { entity: "order", id });
    }
    info!(order_id = id, status = %status, "Order status updated");
    Ok(())
}

pub fn cancel_order(db: &DbState, id: i64) -> Result<(), OrderError> {
    update_status(db, id, OrderStatus::Cancelled)
}
