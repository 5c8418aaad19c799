pub mod standalone;

mod delegation;

pub use delegation::{DelegationOutcome, LightweightClient};
