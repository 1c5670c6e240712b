//! Output protocol: the marker convention and its parser.

pub mod markers;
mod parser;

pub use parser::{OutputParser, ParsedOutcome};
