use crate::domain::commands::orders::{
    BookServiceCommand, CheckoutCommand, OrderListResult, OrderPlacementResult, PaymentMethod as DomainPaymentMethod,
    RegisterForEventCommand,
};
use crate::domain::models::order::{Order as DomainOrder, OrderLine as DomainOrderLine};
use crate::io::rest::mappers::ledger_mapper::LedgerMapper;
use shared::{
    BookingRequest, CancelOrderResponse, CheckoutRequest, CheckoutResponse, EventRegistrationRequest,
    Order as SharedOrder, OrderLine as SharedOrderLine, OrderListResponse, PaymentMethod as SharedPaymentMethod,
    PricedItem,
};

pub struct OrderMapper;

impl OrderMapper {
    pub fn to_checkout_command(buyer_id: String, request: CheckoutRequest) -> CheckoutCommand {
        CheckoutCommand {
            buyer_id,
            items: request.items.into_iter().map(Self::to_domain_line).collect(),
            shipping_address: request.shipping_address,
            payment_method: Self::to_domain_payment_method(request.payment_method),
        }
    }

    pub fn to_booking_command(buyer_id: String, request: BookingRequest) -> BookServiceCommand {
        BookServiceCommand {
            buyer_id,
            provider_id: request.provider_id,
            service_name: request.service_name,
            price: request.price,
            slot: request.slot,
            payment_method: Self::to_domain_payment_method(request.payment_method),
        }
    }

    pub fn to_registration_command(
        buyer_id: String,
        event_id: String,
        request: EventRegistrationRequest,
    ) -> RegisterForEventCommand {
        RegisterForEventCommand {
            buyer_id,
            event_id,
            organizer_id: request.organizer_id,
            title: request.title,
            ticket_price: request.ticket_price,
            attendees: request.attendees,
            payment_method: Self::to_domain_payment_method(request.payment_method),
        }
    }

    /// `fallback_balance` is used when the settlement was a replay and
    /// reported no fresh buyer balance
    pub fn to_checkout_response(result: OrderPlacementResult, fallback_balance: i64) -> CheckoutResponse {
        CheckoutResponse {
            order_id: result.order.id,
            new_balance: result.new_balance.unwrap_or(fallback_balance),
            total_amount: result.order.total_amount,
            payment_status: result.order.payment_status.as_str().to_string(),
        }
    }

    pub fn to_cancel_response(order: DomainOrder) -> CancelOrderResponse {
        CancelOrderResponse {
            order_id: order.id,
            status: order.status.as_str().to_string(),
            payment_status: order.payment_status.as_str().to_string(),
        }
    }

    pub fn to_list_response(result: OrderListResult) -> OrderListResponse {
        OrderListResponse {
            orders: result.orders.into_iter().map(Self::to_dto).collect(),
            pagination: LedgerMapper::to_pagination_dto(result.pagination),
        }
    }

    pub fn to_dto(domain: DomainOrder) -> SharedOrder {
        SharedOrder {
            id: domain.id,
            kind: domain.kind.as_str().to_string(),
            buyer_id: domain.buyer_id,
            lines: domain.lines.into_iter().map(Self::to_dto_line).collect(),
            total_amount: domain.total_amount,
            status: domain.status.as_str().to_string(),
            payment_status: domain.payment_status.as_str().to_string(),
            settlement_ref: domain.settlement_ref,
            reference: domain.reference,
            shipping_address: domain.shipping_address,
            failure_reason: domain.failure_reason,
            created_at: domain.created_at.to_rfc3339(),
            updated_at: domain.updated_at.to_rfc3339(),
        }
    }

    fn to_domain_line(item: PricedItem) -> DomainOrderLine {
        DomainOrderLine {
            payee_id: item.payee_id,
            description: item.description,
            unit_price: item.unit_price,
            quantity: item.quantity,
        }
    }

    fn to_dto_line(line: DomainOrderLine) -> SharedOrderLine {
        SharedOrderLine {
            // Overflow is rejected when the order is placed
            line_amount: line.line_amount().unwrap_or(i64::MAX),
            payee_id: line.payee_id,
            description: line.description,
            unit_price: line.unit_price,
            quantity: line.quantity,
        }
    }

    fn to_domain_payment_method(method: SharedPaymentMethod) -> DomainPaymentMethod {
        match method {
            SharedPaymentMethod::Wallet => DomainPaymentMethod::Wallet,
            SharedPaymentMethod::Card {
                number,
                expiry,
                cvv,
                holder,
            } => DomainPaymentMethod::Card {
                number,
                expiry,
                cvv,
                holder,
            },
            SharedPaymentMethod::Upi { vpa } => DomainPaymentMethod::Upi { vpa },
        }
    }
}
