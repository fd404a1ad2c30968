//! EdgeLink core model
//!
//! The reactive channel/process-image model every protocol bridge builds
//! on, plus the shared fallback primitives: identifier-scoped timers, the
//! exceptional-state watchdog and the command envelope used by
//! message-bus bridges.
//!
//! A [`Channel`] holds the last committed `value` and a staged
//! `next_value`; the staged value becomes visible only when the global
//! [`ComponentRegistry::process_image`] pass runs at the cycle boundary.
//! Consumers request writes through `set_next_write_value`, which the
//! owning bridge consumes exactly once per cycle.

pub mod channel;
pub mod command;
pub mod component;
pub mod exceptional;
pub mod timer;
pub mod value;

pub use channel::{AccessMode, Channel, ChannelAddress, Doc};
pub use command::{CommandExpiration, CommandWrapper, INFINITE_EXPIRATION};
pub use component::{
    exceptional_state_decls, ChannelDecl, Component, ComponentRegistry,
    EXCEPTIONAL_STATE_ENABLE_SIGNAL, EXCEPTIONAL_STATE_VALUE,
};
pub use exceptional::ExceptionalStateHandler;
pub use timer::{TimerKind, TimerService};
pub use value::{ChannelType, ChannelValue, Unit};
