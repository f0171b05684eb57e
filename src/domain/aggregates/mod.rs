//! Aggregates module
pub mod product;
pub mod stock;
pub mod cart;
pub mod checkout;
pub mod order;
pub mod payment;

pub use product::Product;
pub use stock::{StockEntry, StockError};
pub use cart::{Cart, CartError, CartLine};
pub use checkout::{CheckoutError, CheckoutSession, CheckoutState, DeliveryMethod, DeliverySelection, PaymentMethod};
pub use order::{Order, OrderError, OrderStatus, PlacedCart};
pub use payment::{PaymentError, PaymentIntent, PaymentStatus, ProviderCharge, StatusChange};
