//! Order intake: validate, price, persist, publish.

use std::collections::HashMap;

use channel::{ReservationChannel, ReservationMessage};
use common::{OrderId, ProductId, Sku};
use domain::{LineItem, NewOrder, OrderRequest, OrderStore};
use inventory::{InventoryError, InventoryStore};

use crate::error::{IntakeError, StoreError};

/// Accepts client orders and hands them to the reservation workers.
///
/// Intake never reserves stock. It only checks that every SKU exists and
/// had enough stock at the time of the check.
pub struct OrderIntake<O, I, C> {
    orders: O,
    inventory: I,
    channel: C,
}

impl<O, I, C> OrderIntake<O, I, C>
where
    O: OrderStore,
    I: InventoryStore,
    C: ReservationChannel,
{
    /// Creates a new order intake.
    pub fn new(orders: O, inventory: I, channel: C) -> Self {
        Self {
            orders,
            inventory,
            channel,
        }
    }

    /// Validates, prices and persists an order, then publishes its
    /// reservation message.
    ///
    /// The order is persisted with status `pending`, a server-assigned id and
    /// prices taken from the inventory; client-supplied ids, statuses and
    /// prices are ignored. A `Publish` error means the order exists but no
    /// worker has been told about it yet.
    #[tracing::instrument(skip(self, request))]
    pub async fn create_order(&self, request: OrderRequest) -> Result<OrderId, IntakeError> {
        match self.accept(request).await {
            Ok(order_id) => {
                metrics::counter!("orders_created_total").increment(1);
                tracing::info!(%order_id, "order accepted");
                Ok(order_id)
            }
            Err(e) => {
                metrics::counter!("orders_rejected_total", "reason" => e.reason()).increment(1);
                tracing::warn!(error = %e, reason = e.reason(), "order not accepted");
                Err(e)
            }
        }
    }

    async fn accept(&self, request: OrderRequest) -> Result<OrderId, IntakeError> {
        let request = request.validate()?;

        let mut items = Vec::with_capacity(request.items.len());
        let mut requested: HashMap<(ProductId, Sku), u32> = HashMap::new();

        for (index, item) in request.items.iter().enumerate() {
            let variant = match self.inventory.get_variant(&item.product_id, &item.sku).await {
                Ok(variant) => variant,
                Err(InventoryError::VariantNotFound { product_id, sku }) => {
                    return Err(IntakeError::ItemNotFound {
                        index,
                        product_id,
                        sku,
                    });
                }
                Err(e) => return Err(StoreError::from(e).into()),
            };

            // Repeated lines of the same SKU are checked against their sum.
            let total = requested
                .entry((item.product_id.clone(), item.sku.clone()))
                .or_default();
            *total = total.saturating_add(item.quantity);
            if *total > variant.stock {
                return Err(IntakeError::InsufficientStock {
                    index,
                    product_id: item.product_id.clone(),
                    sku: item.sku.clone(),
                    requested: *total,
                    available: variant.stock,
                });
            }

            items.push(LineItem::resolve(
                item.clone(),
                variant.effective_price(),
                variant.sale_percentage,
            ));
        }

        let order = NewOrder::new(request, items);
        let placed_at = order.placed_at();
        let items = order.items().to_vec();
        let total = order.total();

        let order_id = self
            .orders
            .create_order(order)
            .await
            .map_err(StoreError::from)?;
        tracing::debug!(%order_id, %total, "order persisted");

        let message = ReservationMessage::new(order_id, items, placed_at);
        self.channel
            .publish(&message)
            .await
            .map_err(|source| IntakeError::Publish { order_id, source })?;

        Ok(order_id)
    }
}
