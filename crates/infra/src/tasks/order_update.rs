//! Applies a payment provider webhook notification to the order it refers to.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::queue::{MAX_PROGRESS, Task, TaskContext, TaskError, TransactionData};

/// A payment notification as received from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// The shop's order number.
    pub merchant_reference: String,
    /// The provider's payment reference.
    pub psp_reference: String,
    pub event_code: String,
    pub payment_method: Option<String>,
    pub success: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderUpdateOutcome {
    Applied,
    /// The order already reflects this notification.
    AlreadyApplied,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderServiceError {
    #[error("order '{0}' not found")]
    OrderNotFound(String),

    #[error("order service unavailable: {0}")]
    Unavailable(String),
}

/// The shop's order backend.
pub trait OrderService: Send + Sync {
    fn apply_notification(
        &self,
        notification: &Notification,
    ) -> Result<OrderUpdateOutcome, OrderServiceError>;
}

/// Queue task carrying one notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdateTask {
    pub merchant_reference: String,
    pub psp_reference: String,
    pub event_code: String,
    pub payment_method: Option<String>,
    pub success: bool,
    pub reason: Option<String>,
}

impl OrderUpdateTask {
    pub fn notification(&self) -> Notification {
        Notification {
            merchant_reference: self.merchant_reference.clone(),
            psp_reference: self.psp_reference.clone(),
            event_code: self.event_code.clone(),
            payment_method: self.payment_method.clone(),
            success: self.success,
            reason: self.reason.clone(),
        }
    }
}

impl From<Notification> for OrderUpdateTask {
    fn from(n: Notification) -> Self {
        Self {
            merchant_reference: n.merchant_reference,
            psp_reference: n.psp_reference,
            event_code: n.event_code,
            payment_method: n.payment_method,
            success: n.success,
            reason: n.reason,
        }
    }
}

impl Task for OrderUpdateTask {
    const TYPE: &'static str = "order_update";

    fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let orders = ctx
            .service::<Arc<dyn OrderService>>()
            .cloned()
            .ok_or_else(|| TaskError::abort("no order service configured"))?;

        ctx.report_progress(MAX_PROGRESS / 10)?;
        let outcome = orders
            .apply_notification(&self.notification())
            .map_err(|err| match err {
                OrderServiceError::OrderNotFound(_) => TaskError::abort(err.to_string()),
                OrderServiceError::Unavailable(_) => TaskError::execution(err.to_string()),
            })?;
        ctx.report_progress(MAX_PROGRESS)?;

        match outcome {
            OrderUpdateOutcome::Applied => info!(
                merchant_reference = %self.merchant_reference,
                psp_reference = %self.psp_reference,
                event_code = %self.event_code,
                "order updated from notification"
            ),
            OrderUpdateOutcome::AlreadyApplied => debug!(
                merchant_reference = %self.merchant_reference,
                psp_reference = %self.psp_reference,
                "notification already applied"
            ),
        }
        Ok(())
    }

    fn transaction_data(&self) -> Option<TransactionData> {
        Some(TransactionData {
            correlation_key: self.merchant_reference.clone(),
            event_code: self.event_code.clone(),
            payment_method: self.payment_method.clone(),
            is_successful: self.success,
            reason: self.reason.clone(),
        })
    }
}

/// In-memory order backend.
///
/// Knows a fixed set of orders and records which notifications were applied
/// to each. `fail_next` makes the next calls report the backend as
/// unavailable.
#[derive(Debug, Default)]
pub struct InMemoryOrderService {
    state: Mutex<OrderBook>,
}

#[derive(Debug, Default)]
struct OrderBook {
    orders: HashMap<String, Vec<Notification>>,
    seen: HashSet<(String, String)>,
    unavailable: u32,
}

impl InMemoryOrderService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orders<I, S>(orders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let service = Self::new();
        for order in orders {
            service.add_order(order);
        }
        service
    }

    pub fn add_order(&self, merchant_reference: impl Into<String>) {
        self.book()
            .orders
            .entry(merchant_reference.into())
            .or_default();
    }

    /// Report the backend as unavailable for the next `calls` calls.
    pub fn fail_next(&self, calls: u32) {
        self.book().unavailable = calls;
    }

    /// Notifications applied to an order, in application order.
    pub fn applied(&self, merchant_reference: &str) -> Vec<Notification> {
        self.book()
            .orders
            .get(merchant_reference)
            .cloned()
            .unwrap_or_default()
    }

    fn book(&self) -> std::sync::MutexGuard<'_, OrderBook> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl OrderService for InMemoryOrderService {
    fn apply_notification(
        &self,
        notification: &Notification,
    ) -> Result<OrderUpdateOutcome, OrderServiceError> {
        let mut book = self.book();
        if book.unavailable > 0 {
            book.unavailable -= 1;
            return Err(OrderServiceError::Unavailable("order backend timed out".into()));
        }

        let key = (
            notification.psp_reference.clone(),
            notification.event_code.clone(),
        );
        if book.seen.contains(&key) {
            return Ok(OrderUpdateOutcome::AlreadyApplied);
        }
        let Some(history) = book.orders.get_mut(&notification.merchant_reference) else {
            return Err(OrderServiceError::OrderNotFound(
                notification.merchant_reference.clone(),
            ));
        };
        history.push(notification.clone());
        book.seen.insert(key);
        Ok(OrderUpdateOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::queue::{QueueItem, TaskEnvironment, TaskRegistry, lifecycle};

    fn task(order: &str) -> OrderUpdateTask {
        OrderUpdateTask {
            merchant_reference: order.into(),
            psp_reference: "PSP-1".into(),
            event_code: "AUTHORISATION".into(),
            payment_method: Some("mc".into()),
            success: true,
            reason: None,
        }
    }

    fn run(task: &OrderUpdateTask, env: &TaskEnvironment) -> Result<(), TaskError> {
        let at = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        let item = QueueItem::new(OrderUpdateTask::TYPE, serde_json::to_value(task).unwrap(), 0, at);
        let item = lifecycle::start(&item, at).unwrap().item;
        let mut ctx = TaskContext::detached(item, env);
        task.execute(&mut ctx)
    }

    fn env(orders: Arc<InMemoryOrderService>) -> TaskEnvironment {
        let service: Arc<dyn OrderService> = orders;
        TaskEnvironment::new().with(service)
    }

    #[test]
    fn applies_the_notification_once() {
        let orders = Arc::new(InMemoryOrderService::with_orders(["ORD-1"]));
        let env = env(orders.clone());

        run(&task("ORD-1"), &env).unwrap();
        run(&task("ORD-1"), &env).unwrap();

        assert_eq!(orders.applied("ORD-1"), vec![task("ORD-1").notification()]);
    }

    #[test]
    fn unknown_order_aborts() {
        let env = env(Arc::new(InMemoryOrderService::new()));
        let err = run(&task("ORD-404"), &env).unwrap_err();
        assert!(matches!(err, TaskError::Abort(_)));
    }

    #[test]
    fn unavailable_backend_is_retryable() {
        let orders = Arc::new(InMemoryOrderService::with_orders(["ORD-1"]));
        orders.fail_next(1);
        let env = env(orders);

        assert!(matches!(run(&task("ORD-1"), &env), Err(TaskError::Execution(_))));
        assert!(run(&task("ORD-1"), &env).is_ok());
    }

    #[test]
    fn missing_service_aborts() {
        let err = run(&task("ORD-1"), &TaskEnvironment::new()).unwrap_err();
        assert_eq!(err, TaskError::abort("no order service configured"));
    }

    #[test]
    fn transaction_data_is_keyed_by_merchant_reference() {
        let data = task("ORD-7").transaction_data().unwrap();
        assert_eq!(data.correlation_key, "ORD-7");
        assert_eq!(data.event_code, "AUTHORISATION");
        assert_eq!(data.payment_method.as_deref(), Some("mc"));
        assert!(data.is_successful);
    }

    #[test]
    fn survives_a_registry_round_trip() {
        let registry = TaskRegistry::new().with::<OrderUpdateTask>().unwrap();
        let original = task("ORD-1");
        let payload = registry.encode(&original).unwrap();
        let decoded = registry.decode(OrderUpdateTask::TYPE, &payload).unwrap();

        assert_eq!(decoded.task_type(), OrderUpdateTask::TYPE);
        assert_eq!(decoded.transaction(), original.transaction_data());
    }
}
