use rust_decimal::Decimal;
use sqlx::types::Json;
use storefront_api::{
    db::create_pool,
    models::ProductVariant,
    services::auth_service::hash_password,
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")?;

    let pool = create_pool(&database_url).await?;
    // Ensure migrations are applied.
    sqlx::migrate!("./migrations").run(&pool).await?;

    let admin_id = ensure_user(&pool, "Admin", "admin@example.com", "admin123", "admin").await?;
    let user_id = ensure_user(&pool, "Demo User", "user@example.com", "user123", "user").await?;
    seed_products(&pool).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user(
    pool: &sqlx::PgPool,
    name: &str,
    email: &str,
    password: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    let password_hash = hash_password(password).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        INSERT INTO users (id, name, email, password_hash, role)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .fetch_optional(pool)
    .await?;

    let user_id = match row {
        Some((id,)) => id,
        None => {
            let existing: (Uuid,) = sqlx::query_as("SELECT id FROM users WHERE email = $1")
                .bind(email)
                .fetch_one(pool)
                .await?;
            existing.0
        }
    };

    println!("Ensured user {email} (role={role})");
    Ok(user_id)
}

async fn seed_products(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let electronics = |brand: &str, warranty: &str| {
        Some(Json(ProductVariant::Electronics {
            brand: brand.to_string(),
            warranty: warranty.to_string(),
        }))
    };

    let products: Vec<(&str, &str, &str, &str, i32, Option<Json<ProductVariant>>)> = vec![
        (
            "Laptop",
            "14-inch ultrabook",
            "999.99",
            "electronics",
            25,
            electronics("Lenovo", "2 years"),
        ),
        (
            "Wireless Mouse",
            "Quiet clicks, long battery life",
            "24.50",
            "electronics",
            120,
            electronics("Logitech", "1 year"),
        ),
        ("Book", "A paperback worth rereading", "19.99", "books", 80, None),
        ("Coffee Mug", "Holds 350ml of motivation", "12.00", "kitchen", 200, None),
    ];

    for (name, desc, price, category, stock, variant) in products {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, price, category, stock, variant)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(desc)
        .bind(price.parse::<Decimal>()?)
        .bind(category)
        .bind(stock)
        .bind(variant)
        .execute(pool)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}
