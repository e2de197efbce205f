//! External systems the engine depends on, behind narrow traits

pub mod transaction;
pub mod user;

pub use transaction::{StoreWalletService, TransactionService};
pub use user::{StoreUserService, UserService};
