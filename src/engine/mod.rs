//! The fulfillment engine: pure quoting and pricing, variant resolution,
//! checkout orchestration, the status state machine, payment and
//! notification adapters.

pub mod checkout;
pub mod notifications;
pub mod payment;
pub mod pricing;
pub mod shipping;
pub mod status;
pub mod variants;

pub use checkout::CheckoutService;
pub use notifications::{NotificationDispatcher, NotificationEvent};
pub use payment::{HttpPaymentGateway, PaymentGateway, PaymentGatewayError};
pub use shipping::ShippingEngine;
pub use status::StatusController;
