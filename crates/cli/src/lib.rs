//! Weft CLI library: the reader, evaluator and configuration behind the
//! `weft` binary, exposed so embedders and tests can drive scripts directly.

pub mod config;
pub mod eval;
pub mod reader;

pub use config::WeftConfig;
pub use eval::{Env, EvalError};
pub use reader::{Form, ReadError, read_all, read_one};
