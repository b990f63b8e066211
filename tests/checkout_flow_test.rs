mod common;

use assert_matches::assert_matches;
use common::TestApp;
use freshcart_api::{
    entities::{
        discount::DiscountKind, order_item, payment_transaction, OrderItem, OrderStatus,
        PaymentStatus, PaymentTransaction, Product,
    },
    errors::ServiceError,
    services::cart::Identity,
    services::checkout::{AddressInput, PlaceOrderInput, ShippingMethod},
};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

fn checkout_input() -> PlaceOrderInput {
    PlaceOrderInput {
        address: AddressInput {
            label: Some("Home".to_string()),
            line1: "12 Market Street".to_string(),
            line2: None,
            city: "Springfield".to_string(),
            postal_code: "12345".to_string(),
            phone: None,
        },
        shipping_method: ShippingMethod::Standard,
        discount_code: None,
        payment_method: "card".to_string(),
    }
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn multi_store_order_totals_and_split() {
    let app = TestApp::new().await;
    let store_a = app.seed_store(dec!(3.50)).await;
    let store_b = app.seed_store(dec!(2.00)).await;
    let product_a = app.seed_product(store_a, dec!(10.00), 10).await;
    let product_b = app.seed_product(store_b, dec!(5.00), 10).await;

    let user_id = Uuid::new_v4();
    let identity = Identity::User(user_id);
    let cart = &app.state.services.cart;
    cart.add_item(&identity, product_a, 2).await.unwrap();
    cart.add_item(&identity, product_b, 1).await.unwrap();

    let order = app
        .state
        .services
        .checkout
        .place_order(user_id, checkout_input())
        .await
        .unwrap();

    // $10 x2 + $5 x1 across two stores, flat $4.99 fee, 8% tax
    assert_eq!(order.subtotal, dec!(25.00));
    assert_eq!(order.discount_total, dec!(0));
    assert_eq!(order.delivery_fee, dec!(4.99));
    assert_eq!(order.tax_total, dec!(2.00));
    assert_eq!(order.total_amount, dec!(31.99));
    assert_eq!(order.status, OrderStatus::Pending);

    // Two items carrying their own (distinct) store references
    let items = OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order.id))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(items.len(), 2);
    let stores: std::collections::HashSet<Uuid> = items.iter().map(|i| i.store_id).collect();
    assert_eq!(stores.len(), 2);

    // Exactly one pending payment transaction for the full total
    let transactions = PaymentTransaction::find()
        .filter(payment_transaction::Column::OrderId.eq(order.id))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].amount, dec!(31.99));
    assert_eq!(transactions[0].status, PaymentStatus::Pending);
    // Intent creation ran post-commit through the gateway stub
    assert!(transactions[0].intent_id.is_some());
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn cart_is_empty_after_placing_an_order() {
    let app = TestApp::new().await;
    let store = app.seed_store(dec!(2.99)).await;
    let product_id = app.seed_product(store, dec!(7.00), 10).await;

    let user_id = Uuid::new_v4();
    let identity = Identity::User(user_id);
    app.state
        .services
        .cart
        .add_item(&identity, product_id, 2)
        .await
        .unwrap();

    app.state
        .services
        .checkout
        .place_order(user_id, checkout_input())
        .await
        .unwrap();

    let lines = app
        .state
        .services
        .cart
        .get_line_items(&identity)
        .await
        .unwrap();
    assert!(lines.is_empty());
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn stock_is_decremented_at_placement() {
    let app = TestApp::new().await;
    let store = app.seed_store(dec!(2.99)).await;
    let product_id = app.seed_product(store, dec!(7.00), 10).await;

    let user_id = Uuid::new_v4();
    let identity = Identity::User(user_id);
    app.state
        .services
        .cart
        .add_item(&identity, product_id, 4)
        .await
        .unwrap();

    app.state
        .services
        .checkout
        .place_order(user_id, checkout_input())
        .await
        .unwrap();

    let product = Product::find_by_id(product_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product.stock_quantity, 6);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn failed_stock_validation_rolls_back_everything() {
    let app = TestApp::new().await;
    let store = app.seed_store(dec!(2.99)).await;
    let plentiful = app.seed_product(store, dec!(3.00), 50).await;
    let scarce = app.seed_product(store, dec!(9.00), 5).await;

    let user_id = Uuid::new_v4();
    let identity = Identity::User(user_id);
    let cart = &app.state.services.cart;
    cart.add_item(&identity, plentiful, 2).await.unwrap();
    cart.add_item(&identity, scarce, 5).await.unwrap();

    // Another shopper takes the scarce stock between add and checkout
    let rival = Uuid::new_v4();
    let rival_identity = Identity::User(rival);
    cart.add_item(&rival_identity, scarce, 4).await.unwrap();
    app.state
        .services
        .checkout
        .place_order(rival, checkout_input())
        .await
        .unwrap();

    let err = app
        .state
        .services
        .checkout
        .place_order(user_id, checkout_input())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock { available: 1, .. });

    // No order, no items, no transaction for the losing user...
    let orders = freshcart_api::entities::Order::find()
        .filter(freshcart_api::entities::order::Column::UserId.eq(user_id))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(orders, 0);

    // ...the cart is untouched...
    let lines = cart.get_line_items(&identity).await.unwrap();
    assert_eq!(lines.len(), 2);

    // ...and the plentiful product's stock was not partially deducted
    // (50 minus the rival's zero on this product).
    let product = Product::find_by_id(plentiful)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product.stock_quantity, 50);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn empty_cart_cannot_check_out() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let err = app
        .state
        .services
        .checkout
        .place_order(user_id, checkout_input())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn single_store_cart_uses_store_delivery_fee() {
    let app = TestApp::new().await;
    let store = app.seed_store(dec!(3.50)).await;
    let product_id = app.seed_product(store, dec!(10.00), 10).await;

    let user_id = Uuid::new_v4();
    let identity = Identity::User(user_id);
    app.state
        .services
        .cart
        .add_item(&identity, product_id, 1)
        .await
        .unwrap();

    let order = app
        .state
        .services
        .checkout
        .place_order(user_id, checkout_input())
        .await
        .unwrap();

    assert_eq!(order.delivery_fee, dec!(3.50));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn discount_code_reduces_total_and_is_redeemed() {
    let app = TestApp::new().await;
    let store = app.seed_store(dec!(2.00)).await;
    let product_id = app.seed_product(store, dec!(50.00), 10).await;
    let discount_id = app
        .seed_discount("SAVE10", DiscountKind::Percentage, dec!(10))
        .await;

    let user_id = Uuid::new_v4();
    let identity = Identity::User(user_id);
    app.state
        .services
        .cart
        .add_item(&identity, product_id, 1)
        .await
        .unwrap();

    let mut input = checkout_input();
    input.discount_code = Some("SAVE10".to_string());
    let order = app
        .state
        .services
        .checkout
        .place_order(user_id, input)
        .await
        .unwrap();

    // 50 - 5 discount, fee 2.00, tax 8% of 45 = 3.60
    assert_eq!(order.discount_total, dec!(5.00));
    assert_eq!(order.tax_total, dec!(3.60));
    assert_eq!(order.total_amount, dec!(50.60));

    let promo = freshcart_api::entities::Discount::find_by_id(discount_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promo.usage_count, 1);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn checkout_reuses_matching_saved_address() {
    let app = TestApp::new().await;
    let store = app.seed_store(dec!(2.00)).await;
    let product_id = app.seed_product(store, dec!(5.00), 20).await;

    let user_id = Uuid::new_v4();
    let identity = Identity::User(user_id);
    let cart = &app.state.services.cart;

    cart.add_item(&identity, product_id, 1).await.unwrap();
    let first = app
        .state
        .services
        .checkout
        .place_order(user_id, checkout_input())
        .await
        .unwrap();

    cart.add_item(&identity, product_id, 1).await.unwrap();
    let second = app
        .state
        .services
        .checkout
        .place_order(user_id, checkout_input())
        .await
        .unwrap();

    assert_eq!(first.user_address_id, second.user_address_id);

    let addresses = freshcart_api::entities::UserAddress::find()
        .filter(freshcart_api::entities::user_address::Column::UserId.eq(user_id))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(addresses.len(), 1);
    assert!(addresses[0].is_default);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn declined_card_leaves_order_pending_and_flagged() {
    let app = TestApp::new().await;
    let store = app.seed_store(dec!(2.00)).await;
    let product_id = app.seed_product(store, dec!(5.00), 20).await;

    app.gateway
        .decline
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let user_id = Uuid::new_v4();
    let identity = Identity::User(user_id);
    app.state
        .services
        .cart
        .add_item(&identity, product_id, 1)
        .await
        .unwrap();

    // The order itself is placed; the decline shows up on the payment side
    let order = app
        .state
        .services
        .checkout
        .place_order(user_id, checkout_input())
        .await
        .unwrap();

    let refreshed = freshcart_api::entities::Order::find_by_id(order.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.status, OrderStatus::Pending);
    assert!(refreshed.payment_failed);

    let transactions = PaymentTransaction::find()
        .filter(payment_transaction::Column::OrderId.eq(order.id))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(transactions[0].status, PaymentStatus::Failed);

    use freshcart_api::services::notifications::NotificationKind;
    assert_eq!(app.notifications.count_of(NotificationKind::PaymentFailed), 1);
}
