//! Push delivery for task notifications.
//!
//! - [`gateway`]: the push gateway seam and its error/response types
//! - [`fcm`]: FCM HTTP v1 implementation of the gateway
//! - [`dispatcher`]: whole-call retry with exponential backoff and
//!   invalid-token reporting

pub mod dispatcher;
pub mod fcm;
pub mod gateway;

pub use dispatcher::{DeliveryResult, DispatchError, Dispatcher, RetryPolicy, TokenOutcome};
pub use gateway::{BatchResponse, GatewayError, PushGateway, SendResponse};
