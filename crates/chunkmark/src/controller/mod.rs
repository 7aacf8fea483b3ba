//! Sliding-window controller.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`state`] | [`Window`], [`IterationState`] and the pure transition function |
//! | [`config`] | [`ControllerConfig`] |
//! | [`events`] | [`ControllerEvent`] and handlers |
//! | [`runner`] | [`WindowController`], the async loop around the oracle |

pub mod config;
pub mod events;
pub mod runner;
pub mod state;

pub use config::ControllerConfig;
pub use events::{ControllerEvent, EventHandler, FnEventHandler, LoggingHandler, NoopHandler};
pub use runner::{ConversionResult, WindowController};
pub use state::{ControllerState, IterationState, MAX_SCHEMA_RETRIES, ReplyOutcome, Window};
