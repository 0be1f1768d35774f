//! Expressions: tokenizing, operator ordering and the operator table.
//!
//! Compiled expressions are flat token lists in reverse Polish order (see
//! [`crate::ast::ExprToken`]). Evaluation lives with the render state.

mod compiler;
pub(crate) mod lexer;
pub mod operator;

pub use compiler::compile;
