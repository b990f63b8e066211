pub mod anonymous_cart;
pub mod cart_item;
pub mod discount;
pub mod discount_redemption;
pub mod order;
pub mod order_item;
pub mod payment_transaction;
pub mod product;
pub mod store;
pub mod user_address;
pub mod webhook_event;

// Re-export entities
pub use anonymous_cart::{Entity as AnonymousCart, Model as AnonymousCartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use discount::{Entity as Discount, DiscountKind, DiscountStatus, Model as DiscountModel};
pub use discount_redemption::{Entity as DiscountRedemption, Model as DiscountRedemptionModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus};
pub use order_item::{Entity as OrderItem, ItemStatus, Model as OrderItemModel};
pub use payment_transaction::{
    Entity as PaymentTransaction, Model as PaymentTransactionModel, PaymentStatus,
};
pub use product::{Entity as Product, Model as ProductModel};
pub use store::{Entity as Store, Model as StoreModel};
pub use user_address::{Entity as UserAddress, Model as UserAddressModel};
pub use webhook_event::{Entity as WebhookEvent, Model as WebhookEventModel};
