use serde_json::Value;
use uuid::Uuid;

use crate::{db::DbPool, error::AppResult};

/// Closed set of actions the API records in the audit trail. Each action
/// knows the resource it touches, so call sites cannot drift apart on
/// spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    UserRegister,
    UserLogin,
    ProductCreate,
    ProductUpdate,
    ProductDelete,
    CartAdd,
    CartUpdate,
    CartRemove,
    CartClear,
    Checkout,
    CheckoutReconcile,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::UserRegister => "user_register",
            AuditAction::UserLogin => "user_login",
            AuditAction::ProductCreate => "product_create",
            AuditAction::ProductUpdate => "product_update",
            AuditAction::ProductDelete => "product_delete",
            AuditAction::CartAdd => "cart_add",
            AuditAction::CartUpdate => "cart_update",
            AuditAction::CartRemove => "cart_remove",
            AuditAction::CartClear => "cart_clear",
            AuditAction::Checkout => "checkout",
            AuditAction::CheckoutReconcile => "checkout_reconcile",
        }
    }

    pub fn resource(&self) -> &'static str {
        match self {
            AuditAction::UserRegister | AuditAction::UserLogin => "users",
            AuditAction::ProductCreate
            | AuditAction::ProductUpdate
            | AuditAction::ProductDelete => "products",
            AuditAction::CartAdd
            | AuditAction::CartUpdate
            | AuditAction::CartRemove
            | AuditAction::CartClear => "cart_items",
            AuditAction::Checkout | AuditAction::CheckoutReconcile => "orders",
        }
    }
}

pub async fn log_audit(
    pool: &DbPool,
    user_id: Option<Uuid>,
    action: AuditAction,
    metadata: Option<Value>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, user_id, action, resource, metadata)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(action.as_str())
    .bind(action.resource())
    .bind(metadata)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_action_names_itself_and_its_resource() {
        let actions = [
            (AuditAction::UserRegister, "user_register", "users"),
            (AuditAction::UserLogin, "user_login", "users"),
            (AuditAction::ProductCreate, "product_create", "products"),
            (AuditAction::ProductUpdate, "product_update", "products"),
            (AuditAction::ProductDelete, "product_delete", "products"),
            (AuditAction::CartAdd, "cart_add", "cart_items"),
            (AuditAction::CartUpdate, "cart_update", "cart_items"),
            (AuditAction::CartRemove, "cart_remove", "cart_items"),
            (AuditAction::CartClear, "cart_clear", "cart_items"),
            (AuditAction::Checkout, "checkout", "orders"),
            (AuditAction::CheckoutReconcile, "checkout_reconcile", "orders"),
        ];
        for (action, name, resource) in actions {
            assert_eq!(action.as_str(), name);
            assert_eq!(action.resource(), resource);
        }
    }
}
