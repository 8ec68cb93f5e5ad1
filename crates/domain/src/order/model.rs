//! Priced line items and orders.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, OwnerId, ProductId, Sku};
use serde::{Deserialize, Serialize};

use super::{LineItemRequest, OrderStatus, PaymentMethod, ShippingAddress, ValidatedRequest};

/// A line item whose price was resolved from the inventory at validation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub sku: Sku,
    pub quantity: u32,
    /// Effective unit price after the sale percentage was applied.
    pub unit_price: Money,
    /// Sale percentage in effect when the price was captured.
    pub sale_percentage: u8,
}

impl LineItem {
    /// Builds a priced item from a request and the authoritative pricing.
    ///
    /// The request's own price and sale fields are discarded.
    pub fn resolve(request: LineItemRequest, unit_price: Money, sale_percentage: u8) -> Self {
        Self {
            product_id: request.product_id,
            sku: request.sku,
            quantity: request.quantity,
            unit_price,
            sale_percentage,
        }
    }

    /// Returns quantity * unit price.
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// A validated, priced order that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    owner_id: OwnerId,
    shipping_address: ShippingAddress,
    items: Vec<LineItem>,
    total: Money,
    payment_method: PaymentMethod,
    created_at: DateTime<Utc>,
}

impl NewOrder {
    /// Assembles an order from a validated request and its priced items.
    ///
    /// The total is always computed here from the items.
    pub fn new(request: ValidatedRequest, items: Vec<LineItem>) -> Self {
        let total = items.iter().map(LineItem::line_total).sum();
        Self {
            owner_id: request.owner_id,
            shipping_address: request.shipping_address,
            items,
            total,
            payment_method: request.payment_method,
            created_at: Utc::now(),
        }
    }

    /// Overrides the creation timestamp.
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Returns who placed the order.
    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    /// Returns the priced items.
    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    /// Returns the computed total.
    pub fn total(&self) -> Money {
        self.total
    }

    /// Returns when the order was accepted.
    pub fn placed_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Turns this into a persisted order with the given id, status `pending`.
    pub fn into_order(self, id: OrderId) -> Order {
        Order {
            id,
            owner_id: self.owner_id,
            status: OrderStatus::Pending,
            shipping_address: self.shipping_address,
            items: self.items,
            total: self.total,
            payment_method: self.payment_method,
            created_at: self.created_at,
            reservation_attempts: 0,
        }
    }
}

/// A persisted order.
///
/// Everything except `status` and `reservation_attempts` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub owner_id: OwnerId,
    pub status: OrderStatus,
    pub shipping_address: ShippingAddress,
    pub items: Vec<LineItem>,
    pub total: Money,
    pub payment_method: PaymentMethod,
    pub created_at: DateTime<Utc>,
    /// Number of reservation attempts claimed so far.
    pub reservation_attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validated() -> ValidatedRequest {
        ValidatedRequest {
            owner_id: OwnerId::new("user-1"),
            shipping_address: ShippingAddress::new("1 Main", "Metropolis", "NY", "10001"),
            items: vec![],
            payment_method: PaymentMethod::new("credit_card"),
        }
    }

    #[test]
    fn test_resolve_discards_client_price() {
        let request = LineItemRequest::new("prod-1", "sku-1", 3)
            .with_client_price(Money::from_cents(1), 99);
        let item = LineItem::resolve(request, Money::from_dollars(90), 10);

        assert_eq!(item.unit_price, Money::from_dollars(90));
        assert_eq!(item.sale_percentage, 10);
        assert_eq!(item.line_total(), Money::from_dollars(270));
    }

    #[test]
    fn test_total_is_sum_of_line_totals() {
        let items = vec![
            LineItem::resolve(
                LineItemRequest::new("p1", "s1", 2),
                Money::from_cents(1050),
                0,
            ),
            LineItem::resolve(
                LineItemRequest::new("p2", "s2", 1),
                Money::from_cents(2500),
                0,
            ),
        ];
        let order = NewOrder::new(validated(), items);
        assert_eq!(order.total().cents(), 4600);
        assert_eq!(order.owner_id(), &OwnerId::new("user-1"));
    }

    #[test]
    fn test_into_order_starts_pending() {
        let order = NewOrder::new(validated(), vec![]).into_order(OrderId::new());
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.reservation_attempts, 0);
    }
}
