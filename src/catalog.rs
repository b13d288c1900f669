//! Product catalog.
//!
//! The catalog is the authoritative price source for order submission.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::DbState;
use crate::error::OrderError;
use crate::models::{round_money, ValidationErrors};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub category: String,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub size: Option<String>,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

impl NewProduct {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if self.category.trim().is_empty() {
            errors.push("category", "category is required");
        }
        if self.name.trim().is_empty() {
            errors.push("name", "name is required");
        }
        if !self.price.is_finite() || self.price < 0.0 {
            errors.push("price", "price must be zero or more");
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

const PRODUCT_COLUMNS: &str = "id, category, name, description, price, size, available";

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        category: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        price: row.get(4)?,
        size: row.get(5)?,
        available: row.get::<_, i64>(6)? != 0,
    })
}

/// Current unit price of a product, whether or not it is available.
pub fn product_price(conn: &Connection, product_id: i64) -> Result<Option<f64>, String> {
    conn.query_row(
        "SELECT price FROM products WHERE id = ?1",
        params![product_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| format!("product price lookup: {e}"))
}

pub fn create_product(db: &DbState, input: NewProduct) -> Result<Product, OrderError> {
    input.validate()?;
    let conn = db
        .conn
        .lock()
        .map_err(|e| OrderError::Persistence(e.to_string()))?;
    conn.execute(
        "INSERT INTO products (category, name, description, price, size, available)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            input.category.trim(),
            input.name.trim(),
            input.description,
            round_money(input.price),
            input.size,
            input.available as i64,
        ],
    )
    .map_err(|e| OrderError::Persistence(format!("insert product: {e}")))?;
    let id = conn.last_insert_rowid();
    info!(product_id = id, name = %input.name, "Product created");

    conn.query_row(
        &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"),
        params![id],
        product_from_row,
    )
    .map_err(|e| OrderError::Persistence(format!("read product: {e}")))
}

pub fn get_product(db: &DbState, id: i64) -> Result<Option<Product>, OrderError> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| OrderError::Persistence(e.to_string()))?;
    conn.query_row(
        &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"),
        params![id],
        product_from_row,
    )
    .optional()
    .map_err(|e| OrderError::Persistence(format!("get product: {e}")))
}

/// Products ordered by category then name.
pub fn list_products(db: &DbState, only_available: bool) -> Result<Vec<Product>, OrderError> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| OrderError::Persistence(e.to_string()))?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products
             WHERE (?1 = 0 OR available = 1)
             ORDER BY category, name"
        ))
        .map_err(|e| OrderError::Persistence(format!("prepare products: {e}")))?;
    let rows = stmt
        .query_map(params![only_available as i64], product_from_row)
        .map_err(|e| OrderError::Persistence(format!("query products: {e}")))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| OrderError::Persistence(format!("read products: {e}")))
}

/// (category, name, description, price, size)
const SAMPLE_CATALOG: &[(&str, &str, &str, f64, &str)] = &[
    ("Traditional Pizza", "Calabresa", "Calabresa sausage, onion and olives", 45.0, "L"),
    ("Traditional Pizza", "Mozzarella", "Mozzarella and tomato", 40.0, "L"),
    ("Special Pizza", "Portuguesa", "Ham, egg, onion, peas and olives", 52.0, "L"),
    ("Special Pizza", "Margherita", "Mozzarella, tomato and basil", 48.0, "L"),
    ("Special Pizza", "Four Cheese", "Mozzarella, provolone, parmesan and gorgonzola", 55.0, "L"),
    ("Drinks", "Soda 2L", "Cola, guarana or orange", 10.0, "2L"),
    ("Drinks", "Fresh Juice 1L", "Orange, lime or strawberry", 12.0, "1L"),
    ("Drinks", "Mineral Water", "Still or sparkling", 4.0, "500ml"),
    ("Sides", "French Fries", "Large portion of fries", 20.0, "Large"),
    ("Sides", "Calabresa with Onions", "Grilled calabresa sausage with onion", 28.0, "Large"),
    ("Desserts", "Brownie", "Chocolate brownie with ice cream", 15.0, "Single"),
    ("Desserts", "Pudding", "Condensed milk pudding", 12.0, "Single"),
];

/// Insert the sample menu when the catalog is empty. Returns rows inserted.
pub fn seed_sample_catalog(db: &DbState) -> Result<usize, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let existing: i64 = conn
        .query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))
        .map_err(|e| format!("count products: {e}"))?;
    if existing > 0 {
        info!(existing, "Catalog already populated, skipping seed");
        return Ok(0);
    }

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| format!("begin transaction: {e}"))?;
    let result = (|| -> Result<(), String> {
        for (category, name, description, price, size) in SAMPLE_CATALOG {
            conn.execute(
                "INSERT INTO products (category, name, description, price, size, available)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1)",
                params![category, name, description, price, size],
            )
            .map_err(|e| format!("seed product {name}: {e}"))?;
        }
        Ok(())
    })();
    match result {
        Ok(()) => {
            if let Err(e) = conn.execute_batch("COMMIT") {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(format!("commit: {e}"));
            }
            info!(count = SAMPLE_CATALOG.len(), "Sample catalog seeded");
            Ok(SAMPLE_CATALOG.len())
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn pizza(name: &str, price: f64, available: bool) -> NewProduct {
        NewProduct {
            category: "Pizza".into(),
            name: name.into(),
            description: None,
            price,
            size: Some("L".into()),
            available,
        }
    }

    #[test]
    fn test_create_and_lookup_price() {
        let db = db::init_in_memory().unwrap();
        let p = create_product(&db, pizza("Mozzarella", 40.0, true)).unwrap();
        assert_eq!(get_product(&db, p.id).unwrap(), Some(p.clone()));

        let conn = db.conn.lock().unwrap();
        assert_eq!(product_price(&conn, p.id).unwrap(), Some(40.0));
        assert_eq!(product_price(&conn, 999).unwrap(), None);
    }

    #[test]
    fn test_list_filters_unavailable_and_sorts() {
        let db = db::init_in_memory().unwrap();
        create_product(&db, pizza("Portuguesa", 52.0, true)).unwrap();
        create_product(&db, pizza("Calabresa", 45.0, false)).unwrap();
        create_product(
            &db,
            NewProduct {
                category: "Drinks".into(),
                ..pizza("Soda", 10.0, true)
            },
        )
        .unwrap();

        let names: Vec<String> = list_products(&db, true)
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Soda", "Portuguesa"]);
        assert_eq!(list_products(&db, false).unwrap().len(), 3);
    }

    #[test]
    fn test_invalid_product_rejected() {
        let db = db::init_in_memory().unwrap();
        let err = create_product(&db, pizza("", -1.0, true)).unwrap_err();
        match err {
            OrderError::Validation(v) => {
                assert!(v.has_field("name"));
                assert!(v.has_field("price"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_seed_only_when_empty() {
        let db = db::init_in_memory().unwrap();
        assert_eq!(seed_sample_catalog(&db).unwrap(), SAMPLE_CATALOG.len());
        assert_eq!(seed_sample_catalog(&db).unwrap(), 0);
        assert_eq!(list_products(&db, false).unwrap().len(), SAMPLE_CATALOG.len());
    }
}
