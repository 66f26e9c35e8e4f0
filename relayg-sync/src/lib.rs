pub mod differ;
pub mod error;
pub mod executor;
pub mod transfer;

pub use differ::*;
pub use error::*;
pub use executor::*;
pub use transfer::*;
