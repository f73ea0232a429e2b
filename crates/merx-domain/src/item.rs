//! Item value object.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::rules::{check_item, ItemDraft};
use crate::{DomainError, GoodId};

/// A cart line: a good with quantity and per-unit pricing figures.
///
/// Items are immutable value objects compared by value; operations that
/// change a field return a new `Item` re-validated through the constructor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    good_id: GoodId,
    quantity: i32,
    unit_price: Decimal,
    discount: Decimal,
    tax: Decimal,
}

impl Item {
    /// Construct an item, evaluating every validation rule.
    pub fn new(
        good_id: impl Into<String>,
        quantity: i32,
        unit_price: Decimal,
        discount: Decimal,
        tax: Decimal,
    ) -> Result<Self, DomainError> {
        let good_id = good_id.into();
        check_item(&ItemDraft {
            good_id: &good_id,
            quantity,
            unit_price,
            discount,
            tax,
        })?;
        Ok(Self {
            // Already checked non-empty by the rules above.
            good_id: GoodId::new(good_id)?,
            quantity,
            unit_price,
            discount,
            tax,
        })
    }

    /// The good this line refers to.
    pub fn good_id(&self) -> &GoodId {
        &self.good_id
    }

    /// Units of the good in this line. Always positive.
    pub fn quantity(&self) -> i32 {
        self.quantity
    }

    /// Per-unit price.
    pub fn unit_price(&self) -> Decimal {
        self.unit_price
    }

    /// Per-unit discount. Never exceeds the unit price.
    pub fn discount(&self) -> Decimal {
        self.discount
    }

    /// Per-unit tax.
    pub fn tax(&self) -> Decimal {
        self.tax
    }

    /// A copy of this item with a different quantity.
    pub fn with_quantity(&self, quantity: i32) -> Result<Self, DomainError> {
        if quantity <= 0 {
            return Err(DomainError::NonPositiveQuantity(quantity));
        }
        let mut item = self.clone();
        item.quantity = quantity;
        Ok(item)
    }

    /// A copy of this item with `additional` units merged in.
    ///
    /// Used when a good already present in a cart is added again: the cart
    /// keeps a single line per good and merges quantities.
    pub fn merged(&self, additional: i32) -> Result<Self, DomainError> {
        if additional <= 0 {
            return Err(DomainError::NonPositiveQuantity(additional));
        }
        self.with_quantity(self.quantity.saturating_add(additional))
    }

    /// Price of the whole line before discount and tax.
    pub fn line_subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}
