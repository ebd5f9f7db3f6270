pub mod app;
pub mod context;
pub mod controller;
pub mod dot;
pub mod error;
pub mod filter;
pub mod job;
pub mod parameter;
pub mod plugin;
pub mod ports;
pub mod ready;
pub mod registry;
pub mod ring;
pub mod scheduler;
pub mod stream;

pub use app::{App, ConstructContext, ControllerConstructContext, ForEachItem, HookContext,
    MAX_NAME_SUFFIX};
pub use context::{InputContext, StartContext};
pub use controller::{ControllerId, ControllerModule, FilterHookInfo, PostInputFn,
    PostInputReport};
pub use dot::{app_dot, DotDetail};
pub use error::{clear_error, last_error, Error, Result};
pub use filter::{FilterId, FilterModule};
pub use parameter::{push, GetFlags, GetFn, OwnerKind, ParamType, SetFn, Value};
pub use plugin::{PluginDeclaration, QUICKSTREAM_ABI_VERSION};
pub use ports::{DEFAULT_MAX_WRITE, DEFAULT_READ_PROMISE, DEFAULT_THRESHOLD};
pub use registry::{list_controllers, list_filters, register_controller, register_filter};
pub use scheduler::SourceStopper;
pub use stream::{StreamId, NEXT_PORT};
