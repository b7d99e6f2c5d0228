//! Reading store: schema, models and queries

pub mod init;
pub mod models;
pub mod readings;

pub use init::*;
pub use models::*;
pub use readings::*;
