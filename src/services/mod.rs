pub mod cart;
pub mod checkout;
pub mod discounts;
pub mod geocoding;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod pricing;

pub use cart::{CartLine, CartService, Identity};
pub use checkout::{CheckoutService, PlaceOrderInput, ShippingMethod};
pub use discounts::{DiscountResolution, DiscountService};
pub use geocoding::GeocodingService;
pub use notifications::{NotificationKind, NotificationService};
pub use orders::OrderService;
pub use payments::{PaymentGateway, PaymentService, ReconciliationService};
pub use pricing::{PricingResult, PricingService};
