use rust_decimal::Decimal;
use storefront_api::{
    config::AppConfig,
    db::create_pool,
    routes::params::{Pagination, ProductQuery},
    services::product_service,
    state::AppState,
};
use uuid::Uuid;

async fn setup_state() -> anyhow::Result<Option<AppState>> {
    let database_url =
        match std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            Ok(url) => url,
            Err(_) => {
                eprintln!(
                    "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration tests."
                );
                return Ok(None);
            }
        };

    let pool = create_pool(&database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let config = AppConfig {
        database_url,
        host: "127.0.0.1".into(),
        port: 0,
        jwt_secret: "integration-test-secret".into(),
        token_ttl_hours: 24,
    };

    Ok(Some(AppState { pool, config }))
}

fn query(q: Option<String>) -> ProductQuery {
    ProductQuery {
        pagination: Pagination {
            page: None,
            per_page: None,
        },
        q,
        min_price: None,
        max_price: None,
        sort_by: None,
        sort_order: None,
    }
}

#[tokio::test]
async fn search_matches_name_and_description_case_insensitively() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    // Unique marker so this test does not see other tests' products.
    let marker = Uuid::new_v4().simple().to_string();

    sqlx::query(
        "INSERT INTO products (id, name, description, price, stock) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(Uuid::new_v4())
    .bind(format!("GADGET-{}", marker.to_uppercase()))
    .bind("a fine gadget")
    .bind("9.99".parse::<Decimal>()?)
    .bind(5)
    .execute(&state.pool)
    .await?;

    sqlx::query(
        "INSERT INTO products (id, name, description, price, stock) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(Uuid::new_v4())
    .bind(format!("Widget {}", Uuid::new_v4().simple()))
    .bind(format!("pairs well with GADGET-{}", marker.to_uppercase()))
    .bind("4.99".parse::<Decimal>()?)
    .bind(5)
    .execute(&state.pool)
    .await?;

    // Lowercase search term matches uppercase name and description.
    let resp =
        product_service::list_products(&state, query(Some(format!("gadget-{marker}")))).await?;
    let items = resp.data.expect("product list").items;
    assert_eq!(items.len(), 2);

    Ok(())
}

#[tokio::test]
async fn search_with_no_match_returns_empty_not_error() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let resp = product_service::list_products(
        &state,
        query(Some(format!("no-such-product-{}", Uuid::new_v4().simple()))),
    )
    .await?;
    let data = resp.data.expect("product list");
    assert!(data.items.is_empty());
    assert_eq!(resp.meta.and_then(|m| m.total), Some(0));
    Ok(())
}
