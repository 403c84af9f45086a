use thiserror::Error;

/// Errors surfaced by forest operations.
///
/// Every variant corresponds to a programmer error; the warm-up period and
/// empty trees produce quiet zero-valued results instead of errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForestError {
    /// A construction-time parameter violated its documented range.
    #[error("invalid configuration: {msg}")]
    InvalidConfiguration { msg: &'static str },

    /// A runtime argument violated its documented range or shape.
    #[error("invalid input: {msg}")]
    InvalidInput { msg: &'static str },

    /// An operation was invoked outside its required protocol state.
    #[error("precondition violated: {msg}")]
    PreconditionViolation { msg: &'static str },

    /// The point store arena is at capacity with no releasable slot.
    #[error("capacity exhausted: {msg}")]
    CapacityExhausted { msg: &'static str },
}

pub type Result<T> = core::result::Result<T, ForestError>;

/// Guard clause for runtime arguments.
pub(crate) fn check_argument(test: bool, msg: &'static str) -> Result<()> {
    if test {
        Ok(())
    } else {
        Err(ForestError::InvalidInput { msg })
    }
}

/// Guard clause for builder parameters.
pub(crate) fn check_config(test: bool, msg: &'static str) -> Result<()> {
    if test {
        Ok(())
    } else {
        Err(ForestError::InvalidConfiguration { msg })
    }
}

/// Guard clause for internal protocol state.
pub(crate) fn check_state(test: bool, msg: &'static str) -> Result<()> {
    if test {
        Ok(())
    } else {
        Err(ForestError::PreconditionViolation { msg })
    }
}
