//! Application module
//!
//! Wires the remote adapters, the domain services and the trigger runtime
//! together for one CLI invocation.

pub mod core;
pub mod dispatcher;
pub mod services;

pub use self::core::Application;
pub use dispatcher::ResumeDispatcher;
pub use dispatcher::TaskCompletion;
pub use services::ApplicationServices;
