//! Static validation of untrusted scripts.
//!
//! Scripts are tokenized and parsed into a reduced syntax tree, then walked
//! against a data-driven [`Policy`]. Nothing is ever executed here.

pub mod lexer;
pub mod policy;
pub mod syntax;
mod validator;

pub use lexer::SyntaxError;
pub use policy::{Decision, Policy, PolicyMode, default_reduced_trust_allow};
pub use validator::Validator;
