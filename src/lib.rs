pub mod api;
pub mod audit;
pub mod clock;
pub mod config;
pub mod deduction;
pub mod error;
pub mod ledger;
mod locks;
pub mod payroll;
pub mod rounding;
pub mod service;
pub mod store;
pub mod timesheet;
pub mod types;
pub mod utils;
pub mod worker;

pub use error::{ErrorKind, PayrollError};
pub use service::PayrollService;
