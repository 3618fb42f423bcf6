use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Opaque payment capability consumed by the checkout workflow. The workflow
/// never assumes success; a `false` return aborts checkout before any write.
pub trait PaymentProcessor: Send + Sync {
    fn process_payment(&self, amount: Decimal) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    CashOnDelivery,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::CashOnDelivery => "cash_on_delivery",
        }
    }
}

pub fn processor_for(method: PaymentMethod) -> Box<dyn PaymentProcessor> {
    match method {
        PaymentMethod::CreditCard => Box::new(CreditCardPayment),
        PaymentMethod::CashOnDelivery => Box::new(CashOnDelivery),
    }
}

/// Simulated card gateway; confirms every charge.
pub struct CreditCardPayment;

impl PaymentProcessor for CreditCardPayment {
    fn process_payment(&self, amount: Decimal) -> bool {
        tracing::info!(%amount, "processing credit card payment");
        true
    }
}

/// Cash on delivery: nothing is charged up front, confirmation is immediate.
pub struct CashOnDelivery;

impl PaymentProcessor for CashOnDelivery {
    fn process_payment(&self, amount: Decimal) -> bool {
        tracing::info!(%amount, "order will be collected on delivery");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_round_trip_through_serde() {
        let json = serde_json::to_string(&PaymentMethod::CreditCard).unwrap();
        assert_eq!(json, "\"credit_card\"");
        let method: PaymentMethod = serde_json::from_str("\"cash_on_delivery\"").unwrap();
        assert_eq!(method, PaymentMethod::CashOnDelivery);
        assert_eq!(method.as_str(), "cash_on_delivery");
    }

    #[test]
    fn built_in_processors_confirm() {
        let amount: Decimal = "19.99".parse().unwrap();
        assert!(processor_for(PaymentMethod::CreditCard).process_payment(amount));
        assert!(processor_for(PaymentMethod::CashOnDelivery).process_payment(amount));
    }
}
