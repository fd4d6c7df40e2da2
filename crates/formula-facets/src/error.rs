use crate::value::Value;

pub type FacetResult<T> = Result<T, FacetError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FacetError {
    #[error("invalid column: {0}")]
    InvalidColumn(String),

    #[error("invalid aggregate: {0}")]
    InvalidAggregate(String),

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("{kind} '{name}' read before it was calculated in this pass")]
    ForwardReference { kind: &'static str, name: String },

    #[error("{kind} '{name}' is already defined")]
    DuplicateRegistration { kind: &'static str, name: String },

    #[error("self referencing {0}")]
    SelfReference(&'static str),

    #[error("circular dependency detected: {from} -> {to}")]
    CircularDependency { from: String, to: String },

    #[error("non-contiguous population: {0}")]
    NonContiguousPopulation(String),

    #[error("unknown population: {0}")]
    UnknownPopulation(String),

    #[error("cannot write {0}: it is read only")]
    ReadOnlyViolation(String),

    #[error("multiple tables match tags: {0}")]
    MultipleMatch(String),

    #[error("unsupported function shape: {0}")]
    UnsupportedFunctionShape(String),

    #[error("row shape mismatch: expected {expected} values, got {actual}")]
    ArrayShape { expected: usize, actual: usize },

    #[error("unknown id: {0}")]
    UnknownId(String),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("invalid row position {position} (table has {len} rows)")]
    InvalidRow { position: usize, len: usize },

    #[error("{name} is not a number: {value}")]
    NotANumber { name: String, value: Value },

    #[error("re-entrant calculation on {0}")]
    Reentrant(String),

    #[error("table {0} has been detached")]
    DetachedTable(String),
}
