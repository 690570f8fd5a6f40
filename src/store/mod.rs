//! External data boundaries

pub mod accounts;

pub use accounts::{AccountStore, UserProfile};
