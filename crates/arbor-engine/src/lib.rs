#![forbid(unsafe_code)]
#![deny(unreachable_patterns)]

//! Formula subsystem for Arbor templates.
//!
//! Formulas are authored as text on calculation definitions and reference
//! relatives in the template tree by name: `.base_cost` (a field on the
//! calculation's own node), `..policy_factor` (a field on the parent node),
//! `.building.replacement_cost` (a field on a child entity, fanned out
//! across live child instances at evaluation time).
//!
//! The pipeline is:
//!
//! 1. [`parse`] — tokenize and fold formula text into a raw expression tree.
//! 2. [`compile_template`] — resolve every calculation's relative names into
//!    tagged absolute ids, validate that no reference escapes its scope, and
//!    reject dependency cycles across the whole template. Compilation is
//!    atomic: any failure returns the error and leaves the input untouched.
//! 3. [`Evaluator`] — execute a compiled tree against one live entity,
//!    fetching stored values from the entity and its parent, fanning out
//!    across children, and recursing into referenced calculations through a
//!    read-only [`InstanceStore`].
//!
//! Evaluation is a pure function of the template, the instance snapshot, and
//! store reads; independent evaluations may run concurrently.

mod compile;
mod error;
mod eval;
mod functions;
mod graph;
mod parser;
mod resolve;
mod value;

pub use compile::compile_template;
pub use error::{CompileError, EvalError, EvalErrorKind, ParseError, Span};
pub use eval::{Evaluator, InstanceStore, MemoryStore, MAX_RECURSION_DEPTH};
pub use graph::CyclePath;
pub use parser::parse;
pub use value::Value;
