//! Demo data for the analytical store
//!
//! Recreates `users`, `products` and `orders` and fills `orders` with 90
//! days of random activity ending today.

use chrono::{Duration, NaiveDate};
use rand::Rng;
use sqlx::sqlite::SqlitePool;
use tracing::info;

const USERS: &[(i64, &str, &str)] = &[
    (1, "Alice", "Beijing"),
    (2, "Bob", "Shanghai"),
    (3, "Charlie", "Guangzhou"),
    (4, "David", "Shenzhen"),
    (5, "Eva", "Beijing"),
];

const PRODUCTS: &[(i64, &str, f64)] = &[
    (1, "iPhone", 6999.0),
    (2, "Laptop", 8999.0),
    (3, "Tablet", 3999.0),
    (4, "Headset", 799.0),
    (5, "Smartwatch", 1999.0),
];

const SCHEMA: &[&str] = &[
    "DROP TABLE IF EXISTS orders",
    "DROP TABLE IF EXISTS users",
    "DROP TABLE IF EXISTS products",
    "CREATE TABLE users (id INTEGER PRIMARY KEY, name VARCHAR, city VARCHAR)",
    "CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER, amount DOUBLE, date DATE)",
    "CREATE TABLE products (id INTEGER PRIMARY KEY, name VARCHAR, price DOUBLE)",
];

pub const ORDER_DAYS: i64 = 90;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedSummary {
    pub users: usize,
    pub products: usize,
    pub orders: usize,
}

/// Rebuild the demo tables. Order history covers the `ORDER_DAYS` days up
/// to and including `today`, 5 to 15 orders per day, amounts 20 to 800.
pub async fn seed_example_data<R: Rng>(
    pool: &SqlitePool,
    today: NaiveDate,
    rng: &mut R,
) -> Result<SeedSummary, sqlx::Error> {
    let mut tx = pool.begin().await?;

    info!("Creating tables...");
    for statement in SCHEMA {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    for (id, name, city) in USERS {
        sqlx::query("INSERT INTO users VALUES (?1, ?2, ?3)")
            .bind(*id)
            .bind(*name)
            .bind(*city)
            .execute(&mut *tx)
            .await?;
    }

    for (id, name, price) in PRODUCTS {
        sqlx::query("INSERT INTO products VALUES (?1, ?2, ?3)")
            .bind(*id)
            .bind(*name)
            .bind(*price)
            .execute(&mut *tx)
            .await?;
    }

    info!("Generating {} days of orders...", ORDER_DAYS);
    let mut order_id: i64 = 1;
    for offset in 0..ORDER_DAYS {
        let day = today - Duration::days(offset);
        let count = rng.gen_range(5..=15);
        for _ in 0..count {
            let user_id = rng.gen_range(1..=USERS.len() as i64);
            let amount = (rng.gen_range(20.0..800.0_f64) * 100.0).round() / 100.0;
            sqlx::query("INSERT INTO orders VALUES (?1, ?2, ?3, ?4)")
                .bind(order_id)
                .bind(user_id)
                .bind(amount)
                .bind(day)
                .execute(&mut *tx)
                .await?;
            order_id += 1;
        }
    }

    tx.commit().await?;

    let summary = SeedSummary {
        users: USERS.len(),
        products: PRODUCTS.len(),
        orders: (order_id - 1) as usize,
    };
    info!("Generated {} orders", summary.orders);
    Ok(summary)
}
