//! Canonical message envelope, identity capture/restore, and the ambient
//! stack (errors, logging) shared by every bus crate.

pub mod error;
pub mod headers;
pub mod identity;
pub mod logging;
pub mod message;

pub use error::BusCommonError;
pub use headers::{HeaderName, Headers, Importance};
pub use identity::{IdentitySerializer, JwtIdentitySerializer, Principal};
pub use message::{Message, MessageId};
