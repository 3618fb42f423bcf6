use rust_decimal::Decimal;
use sqlx::{FromRow, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use crate::{
    audit::{AuditAction, log_audit},
    dto::orders::{CheckoutRequest, OrderList, OrderWithItems},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem},
    payment::PaymentProcessor,
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    state::AppState,
};

#[derive(Debug, FromRow)]
struct CartProductRow {
    product_id: Uuid,
    quantity: i32,
    price: Decimal,
    stock: i32,
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let status = query.status.as_ref().filter(|s| !s.is_empty());
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut count_qb: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT COUNT(*) FROM orders WHERE user_id = ");
    count_qb.push_bind(user.user_id);
    if let Some(status) = status {
        count_qb.push(" AND status = ").push_bind(status.clone());
    }
    let total: i64 = count_qb
        .build_query_scalar()
        .fetch_one(&state.pool)
        .await?;

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM orders WHERE user_id = ");
    qb.push_bind(user.user_id);
    if let Some(status) = status {
        qb.push(" AND status = ").push_bind(status.clone());
    }
    qb.push(" ORDER BY created_at ").push(sort_order.as_sql());
    qb.push(" LIMIT ").push_bind(limit);
    qb.push(" OFFSET ").push_bind(offset);

    let orders: Vec<Order> = qb.build_query_as().fetch_all(&state.pool).await?;

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

/// Convert the caller's cart into a persisted order.
///
/// The whole workflow runs in one transaction: cart lines and their product
/// rows are locked up front, the payment capability is consulted before any
/// write, and header, items, stock decrements, and cart clear all commit
/// together. A failure after the payment confirmed is surfaced as
/// `PostPaymentPersistence` so it is never mistaken for a declined payment.
pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
    processor: &dyn PaymentProcessor,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let mut txn = state.pool.begin().await?;

    // Lock in a stable order so concurrent checkouts cannot deadlock.
    let rows: Vec<CartProductRow> = sqlx::query_as(
        r#"
        SELECT ci.product_id, ci.quantity, p.price, p.stock
        FROM cart_items ci
        JOIN products p ON p.id = ci.product_id
        WHERE ci.user_id = $1
        ORDER BY p.id
        FOR UPDATE
        "#,
    )
    .bind(user.user_id)
    .fetch_all(&mut *txn)
    .await?;

    if rows.is_empty() {
        return Err(AppError::EmptyCart);
    }

    for row in &rows {
        if row.quantity <= 0 {
            return Err(AppError::BadRequest("Cart has invalid quantity".into()));
        }
        if row.stock < row.quantity {
            return Err(AppError::BadRequest(format!(
                "Insufficient stock for product {}",
                row.product_id
            )));
        }
    }

    let total_amount = order_total(&rows);

    // Nothing has been written yet; a declined payment leaves every store
    // untouched.
    if !processor.process_payment(total_amount) {
        return Err(AppError::PaymentFailed);
    }

    let persisted = persist_order(&mut txn, user.user_id, &payload, total_amount, &rows).await;
    let (order, items) = match persisted {
        Ok(v) => v,
        Err(err) => {
            txn.rollback().await.ok();
            return Err(reconcile_failure(state, user, total_amount, err).await);
        }
    };

    if let Err(err) = txn.commit().await {
        return Err(reconcile_failure(state, user, total_amount, err.into()).await);
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::Checkout,
        Some(serde_json::json!({ "order_id": order.id, "total": order.total_amount })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Checkout success",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

/// Order header, one item per cart line, conditional stock decrement, cart
/// clear. Caller holds FOR UPDATE locks on the product rows, so the guarded
/// decrement cannot race; zero rows affected means the invariant was broken
/// some other way and the write must not stand.
async fn persist_order(
    txn: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    payload: &CheckoutRequest,
    total_amount: Decimal,
    rows: &[CartProductRow],
) -> anyhow::Result<(Order, Vec<OrderItem>)> {
    let order: Order = sqlx::query_as(
        r#"
        INSERT INTO orders (id, user_id, total_amount, shipping_address, payment_method, status)
        VALUES ($1, $2, $3, $4, $5, 'paid')
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(total_amount)
    .bind(payload.shipping_address.as_str())
    .bind(payload.payment_method.as_str())
    .fetch_one(&mut **txn)
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let item: OrderItem = sqlx::query_as(
            r#"
            INSERT INTO order_items (id, order_id, product_id, quantity, price)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order.id)
        .bind(row.product_id)
        .bind(row.quantity)
        .bind(row.price)
        .fetch_one(&mut **txn)
        .await?;
        items.push(item);

        let decremented = sqlx::query(
            "UPDATE products SET stock = stock - $2 WHERE id = $1 AND stock >= $2",
        )
        .bind(row.product_id)
        .bind(row.quantity)
        .execute(&mut **txn)
        .await?;
        if decremented.rows_affected() != 1 {
            anyhow::bail!(
                "stock for product {} changed during checkout",
                row.product_id
            );
        }
    }

    sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut **txn)
        .await?;

    Ok((order, items))
}

/// A payment was confirmed but the order did not persist. Log loudly and
/// leave a durable audit row so the charge can be reconciled by hand.
async fn reconcile_failure(
    state: &AppState,
    user: &AuthUser,
    total_amount: Decimal,
    err: anyhow::Error,
) -> AppError {
    tracing::error!(
        user_id = %user.user_id,
        total = %total_amount,
        error = %err,
        "payment confirmed but order not persisted, manual reconciliation required"
    );

    if let Err(audit_err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::CheckoutReconcile,
        Some(serde_json::json!({
            "total": total_amount,
            "error": err.to_string(),
        })),
    )
    .await
    {
        tracing::warn!(error = %audit_err, "audit log failed");
    }

    AppError::PostPaymentPersistence(err)
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order: Option<Order> =
        sqlx::query_as("SELECT * FROM orders WHERE user_id = $1 AND id = $2")
            .bind(user.user_id)
            .bind(id)
            .fetch_optional(&state.pool)
            .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let items: Vec<OrderItem> = sqlx::query_as("SELECT * FROM order_items WHERE order_id = $1")
        .bind(order.id)
        .fetch_all(&state.pool)
        .await?;

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

fn order_total(rows: &[CartProductRow]) -> Decimal {
    rows.iter()
        .map(|row| row.price * Decimal::from(row.quantity))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(price: &str, quantity: i32) -> CartProductRow {
        CartProductRow {
            product_id: Uuid::new_v4(),
            quantity,
            price: price.parse().unwrap(),
            stock: i32::MAX,
        }
    }

    #[test]
    fn total_is_the_sum_of_line_extensions() {
        let rows = vec![row("999.99", 1), row("19.99", 2)];
        assert_eq!(order_total(&rows), "1039.97".parse::<Decimal>().unwrap());
    }

    #[test]
    fn total_of_no_lines_is_zero() {
        assert_eq!(order_total(&[]), Decimal::ZERO);
    }
}
