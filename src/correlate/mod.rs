//! Request/response and background-task correlation.

pub mod background;
pub mod control;
