//! HTTP surface over the admission services.

pub mod error;
pub mod extract;
pub mod handlers;
pub mod health;
pub mod routes;
pub mod state;

pub use error::AppError;
pub use extract::{Caller, USER_ID_HEADER};
pub use routes::build_router;
pub use state::{AppState, CheckoutConfig};
