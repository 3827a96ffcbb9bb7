//! Parameter and column values exchanged with the driver.

mod temporal;
mod value;

pub use temporal::has_time_component;
pub use value::Value;
