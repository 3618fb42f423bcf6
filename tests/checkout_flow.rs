use rust_decimal::Decimal;
use storefront_api::{
    config::AppConfig,
    db::create_pool,
    dto::{
        cart::{AddToCartRequest, UpdateCartItemRequest},
        orders::CheckoutRequest,
    },
    error::AppError,
    middleware::auth::AuthUser,
    payment::{CashOnDelivery, PaymentMethod, PaymentProcessor},
    services::{cart_service, order_service},
    state::AppState,
};
use uuid::Uuid;

struct DecliningProcessor;

impl PaymentProcessor for DecliningProcessor {
    fn process_payment(&self, _amount: Decimal) -> bool {
        false
    }
}

// Integration tests run against a real Postgres instance and skip when none
// is configured. Each test seeds its own users and products so the tests can
// run concurrently against one database.
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

async fn create_user(state: &AppState) -> anyhow::Result<AuthUser> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, name, email, password_hash) VALUES ($1, $2, $3, 'x')")
        .bind(id)
        .bind(format!("Test User {id}"))
        .bind(format!("{id}@example.com"))
        .execute(&state.pool)
        .await?;
    Ok(AuthUser {
        user_id: id,
        role: "user".into(),
    })
}

async fn create_product(state: &AppState, price: &str, stock: i32) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO products (id, name, description, price, stock) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(format!("Product {id}"))
    .bind("test product")
    .bind(price.parse::<Decimal>()?)
    .bind(stock)
    .execute(&state.pool)
    .await?;
    Ok(id)
}

async fn stock_of(state: &AppState, product_id: Uuid) -> anyhow::Result<i32> {
    let (stock,): (i32,) = sqlx::query_as("SELECT stock FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_one(&state.pool)
        .await?;
    Ok(stock)
}

async fn cart_line_count(state: &AppState, user: &AuthUser) -> anyhow::Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cart_items WHERE user_id = $1")
        .bind(user.user_id)
        .fetch_one(&state.pool)
        .await?;
    Ok(count)
}

async fn order_count(state: &AppState, user: &AuthUser) -> anyhow::Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE user_id = $1")
        .bind(user.user_id)
        .fetch_one(&state.pool)
        .await?;
    Ok(count)
}

async fn add(state: &AppState, user: &AuthUser, product_id: Uuid, quantity: i32) -> anyhow::Result<()> {
    cart_service::add_to_cart(state, user, AddToCartRequest { product_id, quantity })
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(())
}

fn checkout_request() -> CheckoutRequest {
    CheckoutRequest {
        shipping_address: "1 Test Street".into(),
        payment_method: PaymentMethod::CashOnDelivery,
    }
}

#[tokio::test]
async fn checkout_totals_clears_cart_and_decrements_stock() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = create_user(&state).await?;
    let laptop = create_product(&state, "999.99", 25).await?;
    let book = create_product(&state, "19.99", 80).await?;

    add(&state, &user, laptop, 1).await?;
    add(&state, &user, book, 2).await?;

    let resp =
        order_service::checkout(&state, &user, checkout_request(), &CashOnDelivery).await?;
    let data = resp.data.expect("checkout data");

    assert_eq!(data.order.total_amount, "1039.97".parse::<Decimal>()?);
    assert_eq!(data.items.len(), 2);

    // Every item's price snapshot times quantity sums to the order total.
    let line_sum: Decimal = data
        .items
        .iter()
        .map(|item| item.price * Decimal::from(item.quantity))
        .sum();
    assert_eq!(line_sum, data.order.total_amount);

    assert_eq!(cart_line_count(&state, &user).await?, 0);
    assert_eq!(stock_of(&state, laptop).await?, 24);
    assert_eq!(stock_of(&state, book).await?, 78);
    Ok(())
}

#[tokio::test]
async fn repeated_adds_accumulate_into_one_line() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = create_user(&state).await?;
    let product = create_product(&state, "5.00", 50).await?;

    add(&state, &user, product, 2).await?;
    add(&state, &user, product, 3).await?;

    let (count, quantity): (i64, i32) = {
        let rows: Vec<(i32,)> =
            sqlx::query_as("SELECT quantity FROM cart_items WHERE user_id = $1 AND product_id = $2")
                .bind(user.user_id)
                .bind(product)
                .fetch_all(&state.pool)
                .await?;
        (rows.len() as i64, rows.first().map(|r| r.0).unwrap_or(0))
    };
    assert_eq!(count, 1);
    assert_eq!(quantity, 5);
    Ok(())
}

#[tokio::test]
async fn non_positive_quantity_is_rejected() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = create_user(&state).await?;
    let product = create_product(&state, "5.00", 50).await?;

    let err = cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id: product,
            quantity: 0,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(cart_line_count(&state, &user).await?, 0);
    Ok(())
}

#[tokio::test]
async fn checkout_with_empty_cart_changes_nothing() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = create_user(&state).await?;

    let err = order_service::checkout(&state, &user, checkout_request(), &CashOnDelivery)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::EmptyCart));
    assert_eq!(order_count(&state, &user).await?, 0);
    Ok(())
}

#[tokio::test]
async fn declined_payment_leaves_every_store_untouched() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = create_user(&state).await?;
    let product = create_product(&state, "42.00", 10).await?;
    add(&state, &user, product, 3).await?;

    let err = order_service::checkout(&state, &user, checkout_request(), &DecliningProcessor)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PaymentFailed));

    assert_eq!(order_count(&state, &user).await?, 0);
    assert_eq!(cart_line_count(&state, &user).await?, 1);
    assert_eq!(stock_of(&state, product).await?, 10);
    Ok(())
}

#[tokio::test]
async fn order_read_back_matches_what_checkout_returned() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = create_user(&state).await?;
    let product = create_product(&state, "7.25", 30).await?;
    add(&state, &user, product, 4).await?;

    let created = order_service::checkout(&state, &user, checkout_request(), &CashOnDelivery)
        .await?
        .data
        .expect("checkout data");

    let fetched = order_service::get_order(&state, &user, created.order.id)
        .await?
        .data
        .expect("order data");

    assert_eq!(fetched.order.id, created.order.id);
    assert_eq!(fetched.order.user_id, created.order.user_id);
    assert_eq!(fetched.order.total_amount, created.order.total_amount);
    assert_eq!(fetched.order.shipping_address, created.order.shipping_address);
    assert_eq!(fetched.order.payment_method, created.order.payment_method);
    assert_eq!(fetched.order.status, created.order.status);

    // Item sets match regardless of order.
    let mut created_items: Vec<(Uuid, i32, Decimal)> = created
        .items
        .iter()
        .map(|i| (i.product_id, i.quantity, i.price))
        .collect();
    let mut fetched_items: Vec<(Uuid, i32, Decimal)> = fetched
        .items
        .iter()
        .map(|i| (i.product_id, i.quantity, i.price))
        .collect();
    created_items.sort();
    fetched_items.sort();
    assert_eq!(created_items, fetched_items);
    Ok(())
}

#[tokio::test]
async fn concurrent_checkouts_never_drive_stock_negative() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let stock = 2;
    let buyers = 4;
    let product = create_product(&state, "10.00", stock).await?;

    let mut users = Vec::new();
    for _ in 0..buyers {
        let user = create_user(&state).await?;
        add(&state, &user, product, 1).await?;
        users.push(user);
    }

    let mut handles = Vec::new();
    for user in users {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            order_service::checkout(&state, &user, checkout_request(), &CashOnDelivery).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => successes += 1,
            Err(AppError::BadRequest(msg)) => {
                assert!(msg.contains("Insufficient stock"), "unexpected error: {msg}");
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, stock);
    assert_eq!(stock_of(&state, product).await?, 0);
    Ok(())
}

async fn reconcile_audit_count(state: &AppState, user: &AuthUser) -> anyhow::Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM audit_logs WHERE user_id = $1 AND action = 'checkout_reconcile'",
    )
    .bind(user.user_id)
    .fetch_one(&state.pool)
    .await?;
    Ok(count)
}

// Drive the order total past what the orders.total_amount column can hold:
// the per-line price fits NUMERIC(12, 2) but 1000 lines' worth does not, so
// the header insert fails only after the payment has been confirmed.
#[tokio::test]
async fn persistence_failure_after_payment_is_surfaced_for_reconciliation() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = create_user(&state).await?;
    let product = create_product(&state, "9999999999.99", 2000).await?;
    add(&state, &user, product, 1000).await?;

    let err = order_service::checkout(&state, &user, checkout_request(), &CashOnDelivery)
        .await
        .unwrap_err();
    assert!(
        matches!(err, AppError::PostPaymentPersistence(_)),
        "unexpected error: {err}"
    );

    // The transaction rolled back, so no order exists and nothing was
    // consumed, but a durable reconciliation record was written.
    assert_eq!(order_count(&state, &user).await?, 0);
    assert_eq!(cart_line_count(&state, &user).await?, 1);
    assert_eq!(stock_of(&state, product).await?, 2000);
    assert_eq!(reconcile_audit_count(&state, &user).await?, 1);
    Ok(())
}

#[tokio::test]
async fn removing_an_absent_line_is_not_an_error() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = create_user(&state).await?;

    let resp = cart_service::remove_from_cart(&state, &user, Uuid::new_v4()).await?;
    assert!(resp.success);
    Ok(())
}

#[tokio::test]
async fn setting_quantity_to_zero_removes_the_line() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = create_user(&state).await?;
    let product = create_product(&state, "3.00", 10).await?;
    add(&state, &user, product, 2).await?;

    cart_service::update_quantity(
        &state,
        &user,
        product,
        UpdateCartItemRequest { quantity: 0 },
    )
    .await?;

    assert_eq!(cart_line_count(&state, &user).await?, 0);
    Ok(())
}
