//! Pricing service contract.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use merx_domain::{Cart, CustomerId, GoodId};

/// One line of a quote request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteLine {
    /// The good being priced.
    pub product_id: GoodId,
    /// Units of the good.
    pub quantity: i32,
    /// Per-unit price as currently carried by the cart.
    pub price: Decimal,
}

/// Request shape of the quoter's `CalculateTotal` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    /// The customer checking out.
    pub customer_id: CustomerId,
    /// Cart lines to price.
    pub items: Vec<QuoteLine>,
    /// Opaque discount parameters passed through to the pricing rules.
    #[serde(default)]
    pub discount_params: serde_json::Value,
    /// Opaque tax parameters passed through to the pricing rules.
    #[serde(default)]
    pub tax_params: serde_json::Value,
}

impl QuoteRequest {
    /// Build a request from a cart's current lines.
    pub fn for_cart(cart: &Cart) -> Self {
        Self {
            customer_id: cart.customer_id(),
            items: cart
                .items()
                .iter()
                .map(|item| QuoteLine {
                    product_id: item.good_id().clone(),
                    quantity: item.quantity(),
                    price: item.unit_price(),
                })
                .collect(),
            discount_params: serde_json::Value::Null,
            tax_params: serde_json::Value::Null,
        }
    }
}

/// Figures returned by the quoter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteBreakdown {
    /// Sum of line prices before discount and tax.
    pub subtotal: Decimal,
    /// Total discount applied.
    pub total_discount: Decimal,
    /// Total tax applied.
    pub total_tax: Decimal,
    /// What the customer pays.
    pub final_price: Decimal,
    /// Names of the pricing policies that fired.
    pub policies: Vec<String>,
}

impl QuoteBreakdown {
    /// The all-zeros breakdown used when quoting degrades.
    pub fn zero() -> Self {
        Self {
            subtotal: Decimal::ZERO,
            total_discount: Decimal::ZERO,
            total_tax: Decimal::ZERO,
            final_price: Decimal::ZERO,
            policies: Vec::new(),
        }
    }
}

/// Pricing service consumed by checkout.
///
/// The pricing rules live on the other side of this contract. Callers
/// treat failures as degradation, not as checkout errors.
#[async_trait]
pub trait Quoter: Send + Sync {
    /// Price a set of cart lines.
    async fn calculate_total(&self, request: QuoteRequest) -> Result<QuoteBreakdown>;
}

/// A quoter that always answers with a fixed breakdown, or always fails.
///
/// Stand-in for environments without a pricing service and the double
/// used by the checkout tests.
#[derive(Debug, Clone)]
pub struct StaticQuoter {
    breakdown: Option<QuoteBreakdown>,
}

impl StaticQuoter {
    /// A quoter answering every request with `breakdown`.
    pub fn answering(breakdown: QuoteBreakdown) -> Self {
        Self {
            breakdown: Some(breakdown),
        }
    }

    /// A quoter failing every request.
    pub fn unavailable() -> Self {
        Self { breakdown: None }
    }
}

#[async_trait]
impl Quoter for StaticQuoter {
    async fn calculate_total(&self, _request: QuoteRequest) -> Result<QuoteBreakdown> {
        match &self.breakdown {
            Some(breakdown) => Ok(breakdown.clone()),
            None => anyhow::bail!("quoter unavailable"),
        }
    }
}
