pub mod authority;
pub mod convert;
pub mod error;
pub mod identity;
pub mod invites;
pub mod registry;
pub mod service;
pub mod session;
pub mod store;

pub use error::ChatError;
