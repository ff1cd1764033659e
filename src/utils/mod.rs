//! Supporting utilities

pub mod autoconnect;
pub mod logging;
