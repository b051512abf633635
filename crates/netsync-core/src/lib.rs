//! NetSync Core Library
//!
//! State shared by the relay server and the client session: variable tables
//! with their limits, string value conversions, and transform interpolation.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod interpolation;
pub mod values;
pub mod variables;

pub use interpolation::{SendThrottle, TransformBuffer};
pub use netsync_proto::{ClientNo, Transform};
pub use values::{Rgba, format_float, parse_flag, parse_value};
pub use variables::{VariableChange, VariableError, VariableLimits, VariableStore, VariableTable};
