//! Built-in controllers

use std::sync::Arc;

use crate::core::registry::ControllerFactory;

pub mod bytes_rate;
pub mod log;

pub use bytes_rate::{BytesRateController, RateClock};
pub use log::LogController;

pub(crate) fn register_builtins(add: &mut dyn FnMut(&str, ControllerFactory)) {
    add("log", Arc::new(|| Arc::new(LogController)));
    add(
        "bytes_rate",
        Arc::new(|| Arc::new(BytesRateController::default())),
    );
}
