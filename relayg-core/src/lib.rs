pub mod error;
pub mod models;
pub mod store;

pub use error::*;
pub use models::*;
pub use store::*;
