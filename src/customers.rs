//! Customer records keyed by phone for public submissions.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::CustomerInput;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub phone: String,
    pub address: Option<String>,
    pub email: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

const CUSTOMER_COLUMNS: &str = "id, name, phone, address, email, created_at, updated_at";

fn customer_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Customer> {
    Ok(Customer {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        address: row.get(3)?,
        email: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Lowest-id customer with exactly this phone string.
pub fn find_by_phone(conn: &Connection, phone: &str) -> Result<Option<Customer>, String> {
    conn.query_row(
        &format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE phone = ?1 ORDER BY id LIMIT 1"),
        params![phone],
        customer_from_row,
    )
    .optional()
    .map_err(|e| format!("find customer by phone: {e}"))
}

pub fn get_customer(conn: &Connection, id: i64) -> Result<Option<Customer>, String> {
    conn.query_row(
        &format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ?1"),
        params![id],
        customer_from_row,
    )
    .optional()
    .map_err(|e| format!("get customer: {e}"))
}

/// Update the customer with this phone, or create one.
///
/// Name, address and email are overwritten; an absent email clears the
/// stored one. Returns `(customer_id, created)`. Callers wanting the
/// lookup and write to be atomic must hold a transaction.
pub fn upsert_by_phone(conn: &Connection, input: &CustomerInput) -> Result<(i64, bool), String> {
    let phone = input.phone.trim();
    let name = input.name.trim();
    let address = input.address.trim();
    let email = input.normalized_email();

    if let Some(existing) = find_by_phone(conn, phone)? {
        conn.execute(
            "UPDATE customers SET name = ?1, address = ?2, email = ?3,
                updated_at = datetime('now')
             WHERE id = ?4",
            params![name, address, email, existing.id],
        )
        .map_err(|e| format!("update customer: {e}"))?;
        debug!(customer_id = existing.id, "Customer updated from public order");
        return Ok((existing.id, false));
    }

    conn.execute(
        "INSERT INTO customers (name, phone, address, email) VALUES (?1, ?2, ?3, ?4)",
        params![name, phone, address, email],
    )
    .map_err(|e| format!("insert customer: {e}"))?;
    let id = conn.last_insert_rowid();
    debug!(customer_id = id, "Customer created from public order");
    Ok((id, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn input(name: &str, address: &str, email: Option<&str>) -> CustomerInput {
        CustomerInput {
            name: name.into(),
            phone: "(11) 91234-5678".into(),
            address: address.into(),
            email: email.map(str::to_string),
        }
    }

    #[test]
    fn test_upsert_creates_then_overwrites() {
        let db = db::init_in_memory().unwrap();
        let conn = db.conn.lock().unwrap();

        let (id, created) =
            upsert_by_phone(&conn, &input("Ana", "Rua X, 10", Some("ana@example.com"))).unwrap();
        assert!(created);

        let (same, created) = upsert_by_phone(&conn, &input("Ana Maria", "Rua Y, 20", None)).unwrap();
        assert_eq!(same, id);
        assert!(!created);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM customers", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);

        let c = get_customer(&conn, id).unwrap().unwrap();
        assert_eq!(c.name, "Ana Maria");
        assert_eq!(c.address.as_deref(), Some("Rua Y, 20"));
        assert_eq!(c.email, None);
    }

    #[test]
    fn test_different_phone_creates_new_customer() {
        let db = db::init_in_memory().unwrap();
        let conn = db.conn.lock().unwrap();
        let (a, _) = upsert_by_phone(&conn, &input("Ana", "Rua X", None)).unwrap();
        let mut other = input("Bruno", "Rua Z", None);
        other.phone = "(21) 3456-7890".into();
        let (b, created) = upsert_by_phone(&conn, &other).unwrap();
        assert!(created);
        assert_ne!(a, b);
        assert_eq!(find_by_phone(&conn, "(21) 3456-7890").unwrap().unwrap().id, b);
    }
}
