//! Named validation rules for the [`Item`](crate::Item) value object.
//!
//! Composite validation is expressed as a set of named predicates over an
//! [`ItemDraft`]. Each rule can be exercised in isolation; constructors
//! evaluate the conjunction via [`check_item`], failing on the first
//! violated rule.

use rust_decimal::Decimal;

use crate::DomainError;

/// Raw item fields before construction.
#[derive(Debug, Clone, Copy)]
pub struct ItemDraft<'a> {
    /// Candidate good identifier.
    pub good_id: &'a str,
    /// Candidate quantity.
    pub quantity: i32,
    /// Candidate per-unit price.
    pub unit_price: Decimal,
    /// Candidate per-unit discount.
    pub discount: Decimal,
    /// Candidate per-unit tax.
    pub tax: Decimal,
}

/// A single named validation rule.
pub type ItemRule = fn(&ItemDraft<'_>) -> Result<(), DomainError>;

/// The good identifier must not be empty or blank.
pub fn good_id_not_empty(draft: &ItemDraft<'_>) -> Result<(), DomainError> {
    if draft.good_id.trim().is_empty() {
        return Err(DomainError::EmptyGoodId);
    }
    Ok(())
}

/// The quantity must be strictly positive.
pub fn quantity_positive(draft: &ItemDraft<'_>) -> Result<(), DomainError> {
    if draft.quantity <= 0 {
        return Err(DomainError::NonPositiveQuantity(draft.quantity));
    }
    Ok(())
}

/// The unit price must be non-negative.
pub fn price_non_negative(draft: &ItemDraft<'_>) -> Result<(), DomainError> {
    if draft.unit_price.is_sign_negative() {
        return Err(DomainError::NegativePrice(draft.unit_price));
    }
    Ok(())
}

/// The discount must be non-negative.
pub fn discount_non_negative(draft: &ItemDraft<'_>) -> Result<(), DomainError> {
    if draft.discount.is_sign_negative() {
        return Err(DomainError::NegativeDiscount(draft.discount));
    }
    Ok(())
}

/// The tax must be non-negative.
pub fn tax_non_negative(draft: &ItemDraft<'_>) -> Result<(), DomainError> {
    if draft.tax.is_sign_negative() {
        return Err(DomainError::NegativeTax(draft.tax));
    }
    Ok(())
}

/// The per-unit discount must not exceed the unit price.
pub fn discount_not_exceeds_price(draft: &ItemDraft<'_>) -> Result<(), DomainError> {
    if draft.discount > draft.unit_price {
        return Err(DomainError::DiscountExceedsPrice {
            discount: draft.discount,
            price: draft.unit_price,
        });
    }
    Ok(())
}

/// All item rules, evaluated in order by [`check_item`].
pub const ITEM_RULES: [ItemRule; 6] = [
    good_id_not_empty,
    quantity_positive,
    price_non_negative,
    discount_non_negative,
    tax_non_negative,
    discount_not_exceeds_price,
];

/// Evaluate the conjunction of all item rules, first violation wins.
pub fn check_item(draft: &ItemDraft<'_>) -> Result<(), DomainError> {
    for rule in ITEM_RULES {
        rule(draft)?;
    }
    Ok(())
}
