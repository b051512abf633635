//! Sample behaviours built on the session facade.
//!
//! Each one is a plain struct that renders state as values or text; hosts
//! subscribe them (usually wrapped in `Arc<Mutex<_>>`) and read them back.

mod color_cube;
mod debug_overlay;
mod rpc_receiver;
mod scale_sync;
mod variable_inspector;
mod xr_mode;

pub use color_cube::ColorCube;
pub use debug_overlay::DebugOverlay;
pub use rpc_receiver::RpcReceiver;
pub use scale_sync::ScaleSync;
pub use variable_inspector::VariableInspector;
pub use xr_mode::{ParseXrModeError, XrMode, XrModeSwitch};
