use arbor_model::{AttributeDefId, CalculationDefId, DataType, EntityId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::CyclePath;

/// Byte range in the original formula text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Malformed formula text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (at {}..{})",
            self.message, self.span.start, self.span.end
        )
    }
}

impl std::error::Error for ParseError {}

impl ParseError {
    #[must_use]
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// Errors raised while compiling a template's calculations.
///
/// Scope and acyclicity are whole-template properties, so any variant aborts
/// the entire commit; the caller keeps its prior template state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("calculation {calculation}: {source}")]
    Parse {
        calculation: CalculationDefId,
        source: ParseError,
    },
    #[error("calculation {calculation}: `{name}` is not in scope")]
    Scope {
        calculation: CalculationDefId,
        name: String,
    },
    #[error("calculation {calculation}: unknown function `{name}`")]
    UnsupportedFunction {
        calculation: CalculationDefId,
        name: String,
    },
    #[error("{0}")]
    CircularReference(CyclePath),
    #[error("only draft templates can be compiled")]
    NotDraft,
}

/// A failed evaluation, carrying the offending calculation and the reason.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("calculation {calculation}: {kind}")]
pub struct EvalError {
    pub calculation: CalculationDefId,
    pub kind: EvalErrorKind,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalErrorKind {
    #[error("attribute {0} has no value on the entity or its parent")]
    MissingAttribute(AttributeDefId),
    #[error("entity {0} is not in the store")]
    MissingEntity(EntityId),
    #[error("calculation {0} does not exist in the template")]
    MissingCalculation(CalculationDefId),
    #[error("calculation has no compiled formula")]
    NotCompiled,
    #[error("cannot interpret `{value}` as a {wanted}")]
    Coercion {
        value: String,
        wanted: &'static str,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("{func} expects {expected} arguments, got {got}")]
    ArgumentCount {
        func: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[error("{func} requires at least one value")]
    EmptyArguments { func: &'static str },
    #[error("a list may not appear directly inside another list")]
    NestedList,
    #[error("unresolved name `{0}` reached evaluation")]
    UnresolvedName(String),
    #[error("LOOKUP {0}")]
    LookupReference(String),
    #[error("lookup over {0} attributes is not supported")]
    UnsupportedLookupSource(DataType),
    #[error("evaluation exceeded the recursion depth limit of {0}")]
    RecursionDepth(usize),
    #[error("evaluation revisited calculation {calculation} on entity {entity}")]
    RecursionCycle {
        entity: EntityId,
        calculation: CalculationDefId,
    },
}
