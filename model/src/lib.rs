//! Domain types for the order-fulfillment service.

pub mod number_f64;
pub mod number_string;
pub mod order;
pub mod payment;
pub mod product;

pub use order::{Order, OrderCreated, OrderCustomer, OrderItem, OrderPayment, OrderStatus};
pub use payment::{PaymentRecord, PaymentStatus};
pub use product::Product;
