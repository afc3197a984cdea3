//! Service module - handler wrappers, service descriptors and dispatch.
//!
//! Provides:
//! - [`MethodHandler`] - uniform `bytes -> future<bytes>` handler
//! - [`ServiceDescriptor`] - a named service and its methods
//! - [`DispatchTable`] - immutable (service, method) lookup used by the provider
//!
//! # Example
//!
//! ```
//! use beacon_rpc::service::{MethodError, ServiceDescriptor};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Deserialize)]
//! struct LoginRequest { name: String, pwd: String }
//!
//! #[derive(Serialize)]
//! struct LoginResponse { success: bool }
//!
//! let service = ServiceDescriptor::new("UserService")
//!     .method("Login", |req: LoginRequest| async move {
//!         if req.name.is_empty() {
//!             return Err(MethodError::new(10, "empty user name"));
//!         }
//!         Ok(LoginResponse { success: req.pwd == "123456" })
//!     });
//!
//! assert!(service.handler("Login").is_some());
//! ```

mod descriptor;
mod dispatch;
mod handler;

pub use descriptor::ServiceDescriptor;
pub use dispatch::{DispatchOutcome, DispatchTable};
pub use handler::{BoxFuture, MethodError, MethodHandler, RawHandler, TypedHandler};
