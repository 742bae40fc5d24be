pub mod alert;
pub mod canonical;
pub mod chain;
pub mod config;
pub mod error;
pub mod logstore;
pub mod merkle;
pub mod model;
pub mod reconcile;
pub mod replica;
pub mod run;
pub mod tsa;

pub use error::{TraceabilityError, VerificationError};
