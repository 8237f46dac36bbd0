//! Order aggregate root.

use common::{CustomerId, Item, OrderId};
use serde::{Deserialize, Serialize};

use super::{OrderError, OrderStatus};

/// An order placed by a customer.
///
/// Created `pending` once its stock is reserved, then moved forward only
/// through [`Order::transition_to`] and the helpers built on it. The same
/// shape is the JSON payload of `order.created` and `order.paid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_link: Option<String>,
    pub items: Vec<Item>,
}

impl Order {
    /// Creates a pending order with a fresh ID.
    ///
    /// Every item must carry a product id and a price reference.
    pub fn new_pending(customer_id: CustomerId, items: Vec<Item>) -> Result<Self, OrderError> {
        if customer_id.is_empty() {
            return Err(OrderError::CustomerIdRequired);
        }
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        for item in &items {
            item.validate()?;
        }

        Ok(Self {
            id: OrderId::new(),
            customer_id,
            status: OrderStatus::Pending,
            payment_link: None,
            items,
        })
    }

    /// Succeeds only if the order has been paid for and not yet moved on.
    pub fn is_paid(&self) -> Result<(), OrderError> {
        if self.status == OrderStatus::Paid {
            Ok(())
        } else {
            Err(OrderError::NotPaid {
                order_id: self.id,
                status: self.status,
            })
        }
    }

    /// Moves the order to `to`, which must directly follow the current status.
    ///
    /// On error the order is left unchanged.
    pub fn transition_to(&mut self, to: OrderStatus) -> Result<(), OrderError> {
        if !self.status.can_transition_to(to) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn update_payment_link(&mut self, link: impl Into<String>) -> Result<(), OrderError> {
        let link = link.into();
        if link.is_empty() {
            return Err(OrderError::EmptyPaymentLink);
        }
        self.payment_link = Some(link);
        Ok(())
    }

    /// Records the payment link and moves to `waiting_for_payment` together.
    pub fn await_payment(&mut self, link: impl Into<String>) -> Result<(), OrderError> {
        let link = link.into();
        if link.is_empty() {
            return Err(OrderError::EmptyPaymentLink);
        }
        self.transition_to(OrderStatus::WaitingForPayment)?;
        self.payment_link = Some(link);
        Ok(())
    }

    /// Applies a payment confirmation carried by an `order.paid` event.
    ///
    /// The confirmation itself must say `paid`, and any link it carries must
    /// be the one issued for this order; the stored link is never replaced.
    /// Returns `false` without touching the order when it is already paid or
    /// ready, so a redelivered event is a no-op.
    pub fn confirm_payment(&mut self, confirmation: &Order) -> Result<bool, OrderError> {
        if confirmation.id != self.id {
            return Err(OrderError::OrderMismatch {
                expected: self.id,
                got: confirmation.id,
            });
        }
        confirmation.is_paid()?;
        if let (Some(issued), Some(claimed)) = (&self.payment_link, &confirmation.payment_link)
            && issued != claimed
        {
            return Err(OrderError::PaymentLinkMismatch { order_id: self.id });
        }
        if self.status >= OrderStatus::Paid {
            return Ok(false);
        }

        let link = self
            .payment_link
            .clone()
            .or_else(|| confirmation.payment_link.clone())
            .unwrap_or_default();
        if link.is_empty() {
            return Err(OrderError::EmptyPaymentLink);
        }
        self.transition_to(OrderStatus::Paid)?;
        self.payment_link = Some(link);
        Ok(true)
    }

    /// Marks a paid order as prepared.
    pub fn mark_ready(&mut self) -> Result<(), OrderError> {
        self.is_paid()?;
        self.transition_to(OrderStatus::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Code, StatusCode};

    fn items() -> Vec<Item> {
        vec![Item::new("sku-1", "Widget", 2, "price_1")]
    }

    fn pending() -> Order {
        Order::new_pending(CustomerId::new("cust-1"), items()).unwrap()
    }

    fn paid_copy(order: &Order) -> Order {
        let mut copy = order.clone();
        copy.status = OrderStatus::Paid;
        copy.payment_link = Some("https://pay.example/abc".into());
        copy
    }

    #[test]
    fn test_new_order_is_pending() {
        let order = pending();
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.payment_link.is_none());
        assert_eq!(order.items.len(), 1);
    }

    #[test]
    fn test_new_order_validation() {
        assert_eq!(
            Order::new_pending(CustomerId::new(""), items()).unwrap_err(),
            OrderError::CustomerIdRequired
        );
        assert_eq!(
            Order::new_pending(CustomerId::new("c"), vec![]).unwrap_err(),
            OrderError::NoItems
        );
        assert!(matches!(
            Order::new_pending(CustomerId::new("c"), vec![Item::new("sku-1", "W", 1, "")]),
            Err(OrderError::InvalidItem(_))
        ));
    }

    #[test]
    fn test_illegal_transition_leaves_order_unchanged() {
        let mut order = pending();
        let err = order.transition_to(OrderStatus::Paid).unwrap_err();
        assert_eq!(
            err,
            OrderError::InvalidTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Paid
            }
        );
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[test]
    fn test_await_payment_sets_link_and_status() {
        let mut order = pending();
        order.await_payment("https://pay.example/abc").unwrap();
        assert_eq!(order.status, OrderStatus::WaitingForPayment);
        assert_eq!(order.payment_link.as_deref(), Some("https://pay.example/abc"));
    }

    #[test]
    fn test_await_payment_rejects_empty_link() {
        let mut order = pending();
        assert_eq!(order.await_payment("").unwrap_err(), OrderError::EmptyPaymentLink);
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.update_payment_link("").is_err());
    }

    #[test]
    fn test_confirm_payment_requires_paid_payload() {
        let mut order = pending();
        order.await_payment("https://pay.example/abc").unwrap();

        let stale = order.clone();
        assert!(matches!(
            order.confirm_payment(&stale),
            Err(OrderError::NotPaid { .. })
        ));
        assert_eq!(order.status, OrderStatus::WaitingForPayment);
    }

    #[test]
    fn test_confirm_payment_twice_transitions_once() {
        let mut order = pending();
        order.await_payment("https://pay.example/abc").unwrap();
        let confirmation = paid_copy(&order);

        assert!(order.confirm_payment(&confirmation).unwrap());
        assert_eq!(order.status, OrderStatus::Paid);
        assert!(!order.confirm_payment(&confirmation).unwrap());
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.payment_link.as_deref(), Some("https://pay.example/abc"));
    }

    #[test]
    fn test_confirm_payment_keeps_issued_link() {
        let mut order = pending();
        order.await_payment("https://pay.example/abc").unwrap();
        let mut forged = paid_copy(&order);
        forged.payment_link = Some("https://attacker.example/x".into());

        let err = order.confirm_payment(&forged).unwrap_err();
        assert_eq!(err, OrderError::PaymentLinkMismatch { order_id: order.id });
        assert_eq!(err.code(), Code::FailedPrecondition);
        assert_eq!(order.status, OrderStatus::WaitingForPayment);
        assert_eq!(order.payment_link.as_deref(), Some("https://pay.example/abc"));

        // a confirmation without a link falls back to the issued one
        let mut bare = paid_copy(&order);
        bare.payment_link = None;
        assert!(order.confirm_payment(&bare).unwrap());
        assert_eq!(order.payment_link.as_deref(), Some("https://pay.example/abc"));
    }

    #[test]
    fn test_confirm_payment_rejects_other_order() {
        let mut order = pending();
        order.await_payment("https://pay.example/abc").unwrap();
        let other = paid_copy(&pending());
        assert!(matches!(
            order.confirm_payment(&other),
            Err(OrderError::OrderMismatch { .. })
        ));
    }

    #[test]
    fn test_mark_ready_requires_paid() {
        let mut order = pending();
        let err = order.mark_ready().unwrap_err();
        assert!(matches!(err, OrderError::NotPaid { .. }));
        assert!(err.to_string().contains("not paid"));
        assert_eq!(order.status, OrderStatus::Pending);

        order.await_payment("https://pay.example/abc").unwrap();
        order.transition_to(OrderStatus::Paid).unwrap();
        order.mark_ready().unwrap();
        assert_eq!(order.status, OrderStatus::Ready);
    }

    #[test]
    fn test_order_json_shape() {
        let order = pending();
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["customer_id"], "cust-1");
        assert!(json.get("payment_link").is_none());

        let back: Order = serde_json::from_value(json).unwrap();
        assert_eq!(back, order);
    }
}
