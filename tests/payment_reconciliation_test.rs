mod common;

use common::TestApp;
use freshcart_api::{
    entities::{
        payment_transaction, Order, OrderStatus, PaymentStatus, PaymentTransaction,
    },
    services::cart::Identity,
    services::checkout::{AddressInput, PlaceOrderInput, ShippingMethod},
    services::notifications::NotificationKind,
    services::payments::WebhookOutcome,
};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

fn checkout_input() -> PlaceOrderInput {
    PlaceOrderInput {
        address: AddressInput {
            label: None,
            line1: "4 Elm Avenue".to_string(),
            line2: None,
            city: "Springfield".to_string(),
            postal_code: "12345".to_string(),
            phone: None,
        },
        shipping_method: ShippingMethod::Express,
        discount_code: None,
        payment_method: "card".to_string(),
    }
}

/// Places an order and returns (order_id, intent_id).
async fn place_order(app: &TestApp) -> (Uuid, String) {
    let store = app.seed_store(dec!(2.00)).await;
    let product_id = app.seed_product(store, dec!(10.00), 20).await;

    let user_id = Uuid::new_v4();
    let identity = Identity::User(user_id);
    app.state
        .services
        .cart
        .add_item(&identity, product_id, 2)
        .await
        .unwrap();

    let order = app
        .state
        .services
        .checkout
        .place_order(user_id, checkout_input())
        .await
        .unwrap();

    let transaction = PaymentTransaction::find()
        .filter(payment_transaction::Column::OrderId.eq(order.id))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();

    (order.id, transaction.intent_id.unwrap())
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn succeeded_webhook_confirms_order_and_notifies() {
    let app = TestApp::new().await;
    let (order_id, intent_id) = place_order(&app).await;

    let outcome = app
        .state
        .services
        .reconciliation
        .process_webhook_event("evt_1", "payment.succeeded", &intent_id, None)
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Processed);

    let order = Order::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert!(!order.payment_failed);

    let transaction = PaymentTransaction::find()
        .filter(payment_transaction::Column::OrderId.eq(order_id))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transaction.status, PaymentStatus::Completed);

    assert_eq!(app.notifications.count_of(NotificationKind::OrderConfirmed), 1);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn replayed_webhook_is_a_no_op_with_one_notification() {
    let app = TestApp::new().await;
    let (order_id, intent_id) = place_order(&app).await;

    let reconciliation = &app.state.services.reconciliation;
    let first = reconciliation
        .process_webhook_event("evt_dup", "payment.succeeded", &intent_id, None)
        .await
        .unwrap();
    let second = reconciliation
        .process_webhook_event("evt_dup", "payment.succeeded", &intent_id, None)
        .await
        .unwrap();

    assert_eq!(first, WebhookOutcome::Processed);
    assert_eq!(second, WebhookOutcome::AlreadyProcessed);

    // Exactly one notification; the transaction stays completed
    assert_eq!(app.notifications.count_of(NotificationKind::OrderConfirmed), 1);
    let transaction = PaymentTransaction::find()
        .filter(payment_transaction::Column::OrderId.eq(order_id))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transaction.status, PaymentStatus::Completed);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn same_outcome_under_a_fresh_event_id_is_still_a_no_op() {
    let app = TestApp::new().await;
    let (_, intent_id) = place_order(&app).await;

    let reconciliation = &app.state.services.reconciliation;
    reconciliation
        .process_webhook_event("evt_a", "payment.succeeded", &intent_id, None)
        .await
        .unwrap();

    // The gateway may emit the same outcome under a new event id; the
    // state machine guard stops a double transition.
    let outcome = reconciliation
        .process_webhook_event("evt_b", "payment.succeeded", &intent_id, None)
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::AlreadyProcessed);
    assert_eq!(app.notifications.count_of(NotificationKind::OrderConfirmed), 1);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn failed_webhook_flags_order_without_failing_it() {
    let app = TestApp::new().await;
    let (order_id, intent_id) = place_order(&app).await;

    app.state
        .services
        .reconciliation
        .process_webhook_event(
            "evt_f",
            "payment.failed",
            &intent_id,
            Some("insufficient funds"),
        )
        .await
        .unwrap();

    let order = Order::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    // The order stays pending for a retry, flagged as payment-failed
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(order.payment_failed);

    let transaction = PaymentTransaction::find()
        .filter(payment_transaction::Column::OrderId.eq(order_id))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transaction.status, PaymentStatus::Failed);
    assert_eq!(
        transaction.failure_reason.as_deref(),
        Some("insufficient funds")
    );

    assert_eq!(app.notifications.count_of(NotificationKind::PaymentFailed), 1);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn refund_webhook_moves_completed_order_to_refunded() {
    let app = TestApp::new().await;
    let (order_id, intent_id) = place_order(&app).await;

    let reconciliation = &app.state.services.reconciliation;
    reconciliation
        .process_webhook_event("evt_ok", "payment.succeeded", &intent_id, None)
        .await
        .unwrap();
    reconciliation
        .process_webhook_event("evt_rf", "payment.refunded", &intent_id, None)
        .await
        .unwrap();

    let order = Order::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Refunded);

    let transaction = PaymentTransaction::find()
        .filter(payment_transaction::Column::OrderId.eq(order_id))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transaction.status, PaymentStatus::Refunded);

    assert_eq!(app.notifications.count_of(NotificationKind::RefundIssued), 1);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn refund_webhook_on_unsettled_payment_is_rejected_by_the_state_machine() {
    let app = TestApp::new().await;
    let (_, intent_id) = place_order(&app).await;

    // Refund before any completion: refunded is only reachable from
    // completed, so this is a no-op.
    let outcome = app
        .state
        .services
        .reconciliation
        .process_webhook_event("evt_early", "payment.refunded", &intent_id, None)
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::AlreadyProcessed);
    assert_eq!(app.notifications.count_of(NotificationKind::RefundIssued), 0);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn unknown_intent_and_unknown_event_types() {
    let app = TestApp::new().await;
    place_order(&app).await;

    let reconciliation = &app.state.services.reconciliation;

    let unknown_intent = reconciliation
        .process_webhook_event("evt_x", "payment.succeeded", "pi_nonexistent", None)
        .await
        .unwrap();
    assert_eq!(unknown_intent, WebhookOutcome::UnknownIntent);

    let ignored = reconciliation
        .process_webhook_event("evt_y", "customer.created", "pi_whatever", None)
        .await
        .unwrap();
    assert_eq!(ignored, WebhookOutcome::Ignored);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn operator_refund_goes_through_gateway_and_transitions_state() {
    let app = TestApp::new().await;
    let (order_id, intent_id) = place_order(&app).await;

    app.state
        .services
        .reconciliation
        .process_webhook_event("evt_pay", "payment.succeeded", &intent_id, None)
        .await
        .unwrap();

    app.state
        .services
        .payments
        .refund_order(order_id, None, &app.state.services.reconciliation)
        .await
        .unwrap();

    assert_eq!(app.gateway.refunds.lock().unwrap().len(), 1);

    let order = Order::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Refunded);
    assert_eq!(app.notifications.count_of(NotificationKind::RefundIssued), 1);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn timeout_sweep_notifies_once_and_keeps_transaction_pending() {
    let app = TestApp::new().await;
    let (order_id, _) = place_order(&app).await;

    // Backdate the pending transaction past the timeout window
    let transaction = PaymentTransaction::find()
        .filter(payment_transaction::Column::OrderId.eq(order_id))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let mut active: payment_transaction::ActiveModel = transaction.into();
    active.created_at = sea_orm::Set(chrono::Utc::now() - chrono::Duration::hours(2));
    use sea_orm::ActiveModelTrait;
    active.update(&*app.state.db).await.unwrap();

    let reconciliation = &app.state.services.reconciliation;
    let first = reconciliation.check_payment_timeouts().await.unwrap();
    assert_eq!(first, 1);

    // The sweep is one-shot per transaction
    let second = reconciliation.check_payment_timeouts().await.unwrap();
    assert_eq!(second, 0);
    assert_eq!(app.notifications.count_of(NotificationKind::PaymentTimeout), 1);

    // Not auto-failed: still pending, a late webhook can settle it
    let transaction = PaymentTransaction::find()
        .filter(payment_transaction::Column::OrderId.eq(order_id))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transaction.status, PaymentStatus::Pending);
}
