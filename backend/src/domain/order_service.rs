//! Order aggregate: product orders, service bookings and event
//! registrations share one shape and one state machine.
//!
//! `payment_status` doubles as the mutual-exclusion gate. Every move into
//! `processing` (settling) or `refunding` (reversing) is a conditional
//! update on the stored order; whoever loses that race gets
//! `ConcurrentSettlementConflict` and no money moves on their behalf.
//! The order's id is the causation id of its settlement.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::PageConfig;
use crate::domain::commands::orders::{
    BookServiceCommand, CheckoutCommand, OrderListQuery, OrderListResult, OrderPlacementResult,
    PlaceOrderCommand, RecoveryReport, RegisterForEventCommand, UpdateFulfillmentCommand,
};
use crate::domain::commands::PaginationInfo;
use crate::domain::errors::{OrderError, ReversalError, SettlementError};
use crate::domain::models::order::{
    Order, OrderChange, OrderGuard, OrderKind, OrderLine, OrderStatus, PaymentStatus,
};
use crate::domain::models::settlement::SettlementStatus;
use crate::domain::payment_validation::validate_payment_method;
use crate::domain::reversal_service::ReversalService;
use crate::domain::settlement_service::SettlementService;
use crate::storage::{Connection, OrderStorage};

const MAX_DESCRIPTION_CHARS: usize = 256;

#[derive(Clone)]
pub struct OrderService<C: Connection> {
    order_repository: C::OrderRepository,
    settlement_service: SettlementService<C>,
    reversal_service: ReversalService<C>,
    paging: PageConfig,
}

impl<C: Connection> OrderService<C> {
    pub fn new(
        connection: Arc<C>,
        settlement_service: SettlementService<C>,
        reversal_service: ReversalService<C>,
        paging: PageConfig,
    ) -> Self {
        Self {
            order_repository: connection.create_order_repository(),
            settlement_service,
            reversal_service,
            paging,
        }
    }

    /// Check out a cart of products from one or more sellers
    pub async fn checkout(&self, command: CheckoutCommand) -> Result<OrderPlacementResult, OrderError> {
        let shipping_address = command
            .shipping_address
            .map(|address| address.trim().to_string())
            .filter(|address| !address.is_empty())
            .ok_or_else(|| OrderError::Validation("Shipping address is required".to_string()))?;

        self.place_order(PlaceOrderCommand {
            kind: OrderKind::Product,
            buyer_id: command.buyer_id,
            lines: command.items,
            reference: None,
            shipping_address: Some(shipping_address),
            payment_method: command.payment_method,
        })
        .await
    }

    /// Book one slot of a provider's service
    pub async fn book_service(&self, command: BookServiceCommand) -> Result<OrderPlacementResult, OrderError> {
        if command.slot.trim().is_empty() {
            return Err(OrderError::Validation("A booking slot is required".to_string()));
        }

        self.place_order(PlaceOrderCommand {
            kind: OrderKind::ServiceBooking,
            buyer_id: command.buyer_id,
            lines: vec![OrderLine {
                payee_id: command.provider_id,
                description: command.service_name,
                unit_price: command.price,
                quantity: 1,
            }],
            reference: Some(command.slot),
            shipping_address: None,
            payment_method: command.payment_method,
        })
        .await
    }

    /// Buy `attendees` tickets for an event
    pub async fn register_for_event(
        &self,
        command: RegisterForEventCommand,
    ) -> Result<OrderPlacementResult, OrderError> {
        if command.event_id.trim().is_empty() {
            return Err(OrderError::Validation("An event id is required".to_string()));
        }

        self.place_order(PlaceOrderCommand {
            kind: OrderKind::EventRegistration,
            buyer_id: command.buyer_id,
            lines: vec![OrderLine {
                payee_id: command.organizer_id,
                description: command.title,
                unit_price: command.ticket_price,
                quantity: command.attendees,
            }],
            reference: Some(command.event_id),
            shipping_address: None,
            payment_method: command.payment_method,
        })
        .await
    }

    /// Create a pending order and try to settle it straight away
    pub async fn place_order(&self, command: PlaceOrderCommand) -> Result<OrderPlacementResult, OrderError> {
        validate_payment_method(&command.payment_method)?;
        let total_amount = validate_lines(&command.buyer_id, &command.lines)?;

        let now = chrono::Utc::now();
        let order = Order {
            id: Order::generate_id(command.kind),
            kind: command.kind,
            buyer_id: command.buyer_id,
            lines: command.lines,
            total_amount,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            settlement_ref: None,
            reference: command.reference,
            shipping_address: command.shipping_address,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.order_repository.insert_order(&order).await?;
        info!(
            "Created {} order {} for {} ({} lines, total {})",
            order.kind.as_str(),
            order.id,
            order.buyer_id,
            order.lines.len(),
            order.total_amount
        );

        self.settle_order(&order).await
    }

    /// Retry payment for an order whose earlier attempt failed
    pub async fn pay_order(&self, order_id: &str, actor_id: &str) -> Result<OrderPlacementResult, OrderError> {
        let order = self.load(order_id).await?;
        if order.buyer_id != actor_id {
            return Err(OrderError::Forbidden(format!(
                "only the buyer can pay for order {}",
                order_id
            )));
        }
        if order.status != OrderStatus::Pending {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: order.kind.paid_status(),
            });
        }
        if !matches!(order.payment_status, PaymentStatus::Pending | PaymentStatus::Failed) {
            return Err(OrderError::ConcurrentSettlementConflict {
                order_id: order.id,
                payment_status: order.payment_status,
            });
        }

        self.settle_order(&order).await
    }

    /// Cancel an order, refunding it in full first if it was paid
    pub async fn cancel_order(&self, order_id: &str, actor_id: &str) -> Result<Order, OrderError> {
        let order = self.load(order_id).await?;
        if !order.involves(actor_id) {
            return Err(OrderError::Forbidden(format!(
                "{} is not a party to order {}",
                actor_id, order_id
            )));
        }
        if order.status == OrderStatus::Cancelled {
            debug!("Order {} already cancelled", order_id);
            return Ok(order);
        }
        if !order.status.is_cancellable() {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Cancelled,
            });
        }

        match order.payment_status {
            PaymentStatus::Pending | PaymentStatus::Failed => {
                // Nothing was charged, nothing to refund
                let cancelled = self
                    .order_repository
                    .transition_order(
                        order_id,
                        &OrderGuard::payment(&[PaymentStatus::Pending, PaymentStatus::Failed])
                            .with_statuses(&OrderStatus::CANCELLABLE),
                        &OrderChange::default().status(OrderStatus::Cancelled),
                    )
                    .await?;
                match cancelled {
                    Some(order) => {
                        info!("Order {} cancelled by {} before payment", order_id, actor_id);
                        Ok(order)
                    }
                    None => Err(self.conflict(order_id).await),
                }
            }
            PaymentStatus::Paid => self.refund_and_cancel(order, actor_id).await,
            PaymentStatus::Processing | PaymentStatus::Refunding => {
                Err(OrderError::ConcurrentSettlementConflict {
                    order_id: order.id,
                    payment_status: order.payment_status,
                })
            }
            PaymentStatus::Refunded => Err(OrderError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Cancelled,
            }),
        }
    }

    /// Move a paid order forward on behalf of one of its payees
    pub async fn update_fulfillment_status(&self, command: UpdateFulfillmentCommand) -> Result<Order, OrderError> {
        if command.status == OrderStatus::Cancelled {
            return self.cancel_order(&command.order_id, &command.actor_id).await;
        }

        let order = self.load(&command.order_id).await?;
        if !order.is_payee(&command.actor_id) {
            return Err(OrderError::Forbidden(format!(
                "only a seller or provider on order {} can update it",
                command.order_id
            )));
        }
        if order.payment_status != PaymentStatus::Paid || !order.status.can_advance_to(command.status, order.kind) {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: command.status,
            });
        }

        let updated = self
            .order_repository
            .transition_order(
                &command.order_id,
                &OrderGuard::payment(&[PaymentStatus::Paid]).with_statuses(&[order.status]),
                &OrderChange::default().status(command.status),
            )
            .await?;
        match updated {
            Some(order) => {
                info!(
                    "Order {} moved to {} by {}",
                    order.id, order.status, command.actor_id
                );
                Ok(order)
            }
            None => Err(self.conflict(&command.order_id).await),
        }
    }

    /// Fetch an order the actor is a party to
    pub async fn get_order(&self, order_id: &str, actor_id: &str) -> Result<Order, OrderError> {
        let order = self.load(order_id).await?;
        if !order.involves(actor_id) {
            return Err(OrderError::Forbidden(format!(
                "{} is not a party to order {}",
                actor_id, order_id
            )));
        }
        Ok(order)
    }

    /// Orders the user bought or sold, newest first
    pub async fn list_orders(&self, user_id: &str, query: OrderListQuery) -> Result<OrderListResult, OrderError> {
        let limit = self.paging.clamp(query.limit);
        let mut orders = self
            .order_repository
            .list_orders_for_user(user_id, limit + 1, query.after.as_deref())
            .await?;

        let has_more = orders.len() > limit as usize;
        if has_more {
            orders.truncate(limit as usize);
        }
        let next_cursor = if has_more {
            orders.last().map(|order| order.id.clone())
        } else {
            None
        };

        Ok(OrderListResult {
            orders,
            pagination: PaginationInfo {
                has_more,
                next_cursor,
            },
        })
    }

    /// Resolve orders left mid-payment or mid-refund by a crash
    pub async fn recover_in_flight(&self) -> Result<RecoveryReport, OrderError> {
        let mut report = RecoveryReport::default();

        for order in self
            .order_repository
            .list_orders_by_payment_status(PaymentStatus::Processing)
            .await?
        {
            self.recover_payment(&order, &mut report).await?;
        }

        // Debited settlements with no order waiting on them still owe their payees
        for record in self.settlement_service.incomplete().await? {
            if report.still_in_flight.contains(&record.causation_id) {
                continue;
            }
            match self.settlement_service.resume(&record.causation_id).await {
                Ok(_) => report.settlements_completed += 1,
                Err(err) => {
                    warn!("Settlement {} still incomplete: {}", record.causation_id, err);
                    report.still_in_flight.push(record.causation_id);
                }
            }
        }

        for order in self
            .order_repository
            .list_orders_by_payment_status(PaymentStatus::Refunding)
            .await?
        {
            self.recover_refund(&order, &mut report).await?;
        }

        info!(
            "Recovery finished: {} settlements completed, {} paid, {} failed, {} refunds completed, {} refunds rolled back, {} unresolved",
            report.settlements_completed,
            report.orders_marked_paid,
            report.orders_marked_failed,
            report.refunds_completed,
            report.refunds_rolled_back,
            report.still_in_flight.len()
        );
        Ok(report)
    }

    async fn settle_order(&self, order: &Order) -> Result<OrderPlacementResult, OrderError> {
        let gated = self
            .order_repository
            .transition_order(
                &order.id,
                &OrderGuard::payment(&[PaymentStatus::Pending, PaymentStatus::Failed])
                    .with_statuses(&[OrderStatus::Pending]),
                &OrderChange::payment(PaymentStatus::Processing),
            )
            .await?;
        if gated.is_none() {
            return Err(self.conflict(&order.id).await);
        }

        let settled = match self
            .settlement_service
            .plan(&order.buyer_id, order.kind, &order.lines)
        {
            Ok(plan) => self.settlement_service.settle(&order.id, &plan).await,
            Err(err) => Err(err),
        };

        match settled {
            Ok(receipt) => {
                let paid = self
                    .order_repository
                    .transition_order(
                        &order.id,
                        &OrderGuard::payment(&[PaymentStatus::Processing]),
                        &OrderChange::payment(PaymentStatus::Paid)
                            .status(order.kind.paid_status())
                            .settlement_ref(receipt.settlement_ref.clone())
                            .clear_failure(),
                    )
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("Order {} left processing during settlement", order.id))?;
                info!(
                    "Order {} paid: settlement {}, buyer balance {:?}",
                    paid.id, receipt.settlement_ref, receipt.buyer_balance
                );
                Ok(OrderPlacementResult {
                    order: paid,
                    new_balance: receipt.buyer_balance,
                })
            }
            Err(
                err @ (SettlementError::InsufficientFunds { .. }
                | SettlementError::InvalidPlan(_)
                | SettlementError::WalletNotFound(_)),
            ) => {
                // Nothing was debited; the buyer may try again
                warn!("Payment for order {} failed: {}", order.id, err);
                self.order_repository
                    .transition_order(
                        &order.id,
                        &OrderGuard::payment(&[PaymentStatus::Processing]),
                        &OrderChange::payment(PaymentStatus::Failed).failure(err.to_string()),
                    )
                    .await?;
                Err(err.into())
            }
            Err(err) => {
                // Buyer may already be debited; recovery finishes the credits
                warn!(
                    "Order {} left processing for recovery: {}",
                    order.id, err
                );
                Err(err.into())
            }
        }
    }

    async fn refund_and_cancel(&self, order: Order, actor_id: &str) -> Result<Order, OrderError> {
        if order.settlement_ref.is_none() {
            return Err(OrderError::MissingSettlementRef(order.id));
        }

        let gated = self
            .order_repository
            .transition_order(
                &order.id,
                &OrderGuard::payment(&[PaymentStatus::Paid]).with_statuses(&OrderStatus::CANCELLABLE),
                &OrderChange::payment(PaymentStatus::Refunding),
            )
            .await?;
        if gated.is_none() {
            return Err(self.conflict(&order.id).await);
        }
        info!("Refunding order {} at the request of {}", order.id, actor_id);

        match self.reversal_service.reverse(&order.id).await {
            Ok(receipt) => {
                let cancelled = self
                    .order_repository
                    .transition_order(
                        &order.id,
                        &OrderGuard::payment(&[PaymentStatus::Refunding]),
                        &OrderChange::payment(PaymentStatus::Refunded)
                            .status(OrderStatus::Cancelled)
                            .clear_failure(),
                    )
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("Order {} left refunding during reversal", order.id))?;
                info!(
                    "Order {} cancelled and refunded {} to {}",
                    cancelled.id, receipt.refunded_amount, cancelled.buyer_id
                );
                Ok(cancelled)
            }
            Err(err) => {
                self.after_failed_reversal(&order.id, &err).await?;
                Err(err.into())
            }
        }
    }

    /// Put the order back to `paid` if the reversal rolled back cleanly.
    /// If the settlement is still `reversing` some payees may be debited,
    /// so the order stays `refunding` for the recovery sweep and no
    /// fulfillment update can slip in. Returns whether it went back to `paid`.
    async fn after_failed_reversal(&self, order_id: &str, err: &ReversalError) -> Result<bool, OrderError> {
        let settlement_status = match self.settlement_service.get(order_id).await {
            Ok(record) => record.map(|record| record.status),
            Err(lookup) => {
                warn!("Could not read settlement {} after failed refund: {}", order_id, lookup);
                None
            }
        };

        let guard = OrderGuard::payment(&[PaymentStatus::Refunding]);
        if settlement_status == Some(SettlementStatus::Settled) {
            warn!("Refund for order {} failed, order stays paid: {}", order_id, err);
            self.order_repository
                .transition_order(
                    order_id,
                    &guard,
                    &OrderChange::payment(PaymentStatus::Paid).failure(format!("Refund failed: {}", err)),
                )
                .await?;
            Ok(true)
        } else {
            error!(
                "Refund for order {} interrupted with settlement {:?}; left refunding for recovery: {}",
                order_id, settlement_status, err
            );
            self.order_repository
                .transition_order(
                    order_id,
                    &guard,
                    &OrderChange::default().failure(format!("Refund interrupted: {}", err)),
                )
                .await?;
            Ok(false)
        }
    }

    async fn recover_payment(&self, order: &Order, report: &mut RecoveryReport) -> Result<(), OrderError> {
        let Some(record) = self.settlement_service.get(&order.id).await? else {
            let failed = self
                .order_repository
                .transition_order(
                    &order.id,
                    &OrderGuard::payment(&[PaymentStatus::Processing]),
                    &OrderChange::payment(PaymentStatus::Failed)
                        .failure("Payment interrupted before the buyer was charged"),
                )
                .await?;
            if failed.is_some() {
                info!("Order {} had no settlement; marked failed", order.id);
                report.orders_marked_failed += 1;
            }
            return Ok(());
        };

        if record.status == SettlementStatus::Debited {
            match self.settlement_service.resume(&order.id).await {
                Ok(_) => report.settlements_completed += 1,
                Err(err) => {
                    warn!("Order {} still waiting on credits: {}", order.id, err);
                    report.still_in_flight.push(order.id.clone());
                    return Ok(());
                }
            }
        }

        let paid = self
            .order_repository
            .transition_order(
                &order.id,
                &OrderGuard::payment(&[PaymentStatus::Processing]),
                &OrderChange::payment(PaymentStatus::Paid)
                    .status(order.kind.paid_status())
                    .settlement_ref(record.id.clone())
                    .clear_failure(),
            )
            .await?;
        if paid.is_some() {
            info!("Order {} recovered as paid ({})", order.id, record.id);
            report.orders_marked_paid += 1;
        }
        Ok(())
    }

    async fn recover_refund(&self, order: &Order, report: &mut RecoveryReport) -> Result<(), OrderError> {
        let refunded = OrderChange::payment(PaymentStatus::Refunded)
            .status(OrderStatus::Cancelled)
            .clear_failure();
        let guard = OrderGuard::payment(&[PaymentStatus::Refunding]);

        let status = self.settlement_service.get(&order.id).await?.map(|record| record.status);
        match status {
            Some(SettlementStatus::Reversed) => {
                self.order_repository.transition_order(&order.id, &guard, &refunded).await?;
                report.refunds_completed += 1;
            }
            Some(SettlementStatus::Reversing) => match self.reversal_service.reverse(&order.id).await {
                Ok(_) => {
                    self.order_repository.transition_order(&order.id, &guard, &refunded).await?;
                    report.refunds_completed += 1;
                }
                Err(err) => {
                    warn!("Interrupted refund of {} could not finish: {}", order.id, err);
                    if self.after_failed_reversal(&order.id, &err).await? {
                        report.refunds_rolled_back += 1;
                    } else {
                        report.still_in_flight.push(order.id.clone());
                    }
                }
            },
            Some(SettlementStatus::Settled) => {
                self.order_repository
                    .transition_order(
                        &order.id,
                        &guard,
                        &OrderChange::payment(PaymentStatus::Paid).failure("Refund interrupted; please retry"),
                    )
                    .await?;
                report.refunds_rolled_back += 1;
            }
            Some(SettlementStatus::Debited) | None => {
                warn!("Order {} is refunding without a settled payment", order.id);
                report.still_in_flight.push(order.id.clone());
            }
        }
        Ok(())
    }

    async fn load(&self, order_id: &str) -> Result<Order, OrderError> {
        self.order_repository
            .get_order(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))
    }

    /// The error to report when a conditional update lost its race
    async fn conflict(&self, order_id: &str) -> OrderError {
        match self.order_repository.get_order(order_id).await {
            Ok(Some(order)) => OrderError::ConcurrentSettlementConflict {
                order_id: order.id,
                payment_status: order.payment_status,
            },
            Ok(None) => OrderError::NotFound(order_id.to_string()),
            Err(err) => OrderError::Storage(err),
        }
    }
}

/// Check the lines and return the order total
fn validate_lines(buyer_id: &str, lines: &[OrderLine]) -> Result<i64, OrderError> {
    if buyer_id.trim().is_empty() {
        return Err(OrderError::Validation("Buyer is required".to_string()));
    }
    if lines.is_empty() {
        return Err(OrderError::Validation("Order must have at least one line".to_string()));
    }

    let mut total: i64 = 0;
    for line in lines {
        if line.payee_id.trim().is_empty() {
            return Err(OrderError::Validation("Every line needs a payee".to_string()));
        }
        if line.payee_id == buyer_id {
            return Err(OrderError::Validation("You cannot buy from yourself".to_string()));
        }
        let description_chars = line.description.trim().chars().count();
        if description_chars == 0 || description_chars > MAX_DESCRIPTION_CHARS {
            return Err(OrderError::Validation(format!(
                "Description must be between 1 and {} characters",
                MAX_DESCRIPTION_CHARS
            )));
        }
        if line.unit_price <= 0 {
            return Err(OrderError::Validation(format!(
                "Price for {} must be positive",
                line.description
            )));
        }
        if line.quantity == 0 {
            return Err(OrderError::Validation(format!(
                "Quantity for {} must be at least 1",
                line.description
            )));
        }
        let amount = line
            .line_amount()
            .ok_or_else(|| OrderError::Validation("Line amount is too large".to_string()))?;
        total = total
            .checked_add(amount)
            .ok_or_else(|| OrderError::Validation("Order total is too large".to_string()))?;
    }

    if total <= 0 {
        return Err(OrderError::Validation("Order total must be positive".to_string()));
    }
    Ok(total)
}
