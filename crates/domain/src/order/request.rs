//! Client-submitted order requests and their validation.

use common::{Money, OwnerId, ProductId, Sku};
use serde::{Deserialize, Serialize};

use super::{OrderError, PaymentMethod, ShippingAddress};

/// A line item as submitted by the client.
///
/// `price` and `sale_percentage` are accepted for wire compatibility but are
/// never trusted: intake overwrites them with the inventory's values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemRequest {
    pub product_id: ProductId,
    pub sku: Sku,
    pub quantity: u32,
    #[serde(default)]
    pub price: Option<Money>,
    #[serde(default)]
    pub sale_percentage: Option<u8>,
}

impl LineItemRequest {
    /// Creates a line item request without a client price.
    pub fn new(product_id: impl Into<ProductId>, sku: impl Into<Sku>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            sku: sku.into(),
            quantity,
            price: None,
            sale_percentage: None,
        }
    }

    /// Attaches a client-side price, which intake will ignore.
    pub fn with_client_price(mut self, price: Money, sale_percentage: u8) -> Self {
        self.price = Some(price);
        self.sale_percentage = Some(sale_percentage);
        self
    }
}

/// An order as submitted by the client, before validation.
///
/// Fields are optional so that a missing field surfaces as a validation
/// error instead of a decode error.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderRequest {
    #[serde(default)]
    pub owner_id: Option<OwnerId>,
    /// Placeholder; its value is ignored and replaced by `pending`.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub shipping_address: Option<ShippingAddress>,
    #[serde(default)]
    pub items: Vec<LineItemRequest>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
}

/// An order request whose required fields have all been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub owner_id: OwnerId,
    pub shipping_address: ShippingAddress,
    pub items: Vec<LineItemRequest>,
    pub payment_method: PaymentMethod,
}

impl OrderRequest {
    /// Checks presence and shape of every required field.
    pub fn validate(self) -> Result<ValidatedRequest, OrderError> {
        let owner_id = self
            .owner_id
            .filter(|o| !o.is_blank())
            .ok_or(OrderError::OwnerRequired)?;

        if self.status.as_deref().is_none_or(|s| s.trim().is_empty()) {
            return Err(OrderError::StatusRequired);
        }

        let shipping_address = self
            .shipping_address
            .ok_or(OrderError::ShippingAddressRequired)?;
        shipping_address.validate()?;

        if self.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        for (index, item) in self.items.iter().enumerate() {
            if item.product_id.is_blank() {
                return Err(OrderError::ProductRequired { index });
            }
            if item.sku.is_blank() {
                return Err(OrderError::SkuRequired { index });
            }
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    index,
                    quantity: item.quantity,
                });
            }
            if let Some(value) = item.sale_percentage.filter(|v| *v > 100) {
                return Err(OrderError::InvalidSalePercentage { index, value });
            }
        }

        let payment_method = self
            .payment_method
            .filter(|p| !p.as_str().trim().is_empty())
            .ok_or(OrderError::PaymentMethodRequired)?;

        Ok(ValidatedRequest {
            owner_id,
            shipping_address,
            items: self.items,
            payment_method,
        })
    }
}
