//! Emitter error types.

/// Errors raised during instruction emission.
///
/// None of these are retried: an unembeddable literal aborts the compilation
/// unit, and the remaining variants are contract violations by the front end.
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    /// A literal value has no construction sequence and no readable form
    #[error("Can't embed object of type {type_name} in bytecode")]
    UnembeddableLiteral {
        /// Runtime type name of the offending value
        type_name: String,
    },

    /// An AST node carries an operation or attribute combination with no
    /// emission rule — a front-end defect, not a user error
    #[error("Unsupported AST node: {tag}")]
    UnsupportedNode {
        /// Operation tag or a short description of the bad combination
        tag: String,
    },

    /// A declared parameter list exceeds the method-descriptor limit
    #[error("Method takes {count} parameters, exceeding the limit of {max}")]
    InvalidArgumentCount {
        /// Declared parameter count
        count: usize,
        /// Hard descriptor limit
        max: usize,
    },

    /// `recur` emitted with no enclosing loop target in the frame
    #[error("Cannot recur from here: no enclosing loop target")]
    NoLoopTarget,
}

/// Result alias used throughout the emitter.
pub type EmitResult<T> = Result<T, EmitError>;
