use crate::error::LifecycleError;
use crate::types::Lifecycle;

/// Validates a lifecycle transition.
///
/// Every lifecycle change in the commit engine goes through this check; an
/// illegal transition surfaces as [`OperationError::Lifecycle`](crate::OperationError::Lifecycle).
pub fn validate_transition(from: Lifecycle, to: Lifecycle) -> Result<(), LifecycleError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(LifecycleError { from, to })
    }
}

/// `Ok` and `Errored` re-enter `Pending` only through an in-place update.
/// `Pending -> Errored` covers descendants whose parent failed to re-produce.
pub fn allowed_transitions(from: Lifecycle) -> Vec<Lifecycle> {
    match from {
        Lifecycle::Pending => vec![Lifecycle::Applying, Lifecycle::Errored],
        Lifecycle::Applying => vec![Lifecycle::Ok, Lifecycle::Errored],
        Lifecycle::Ok | Lifecycle::Errored => vec![Lifecycle::Pending],
    }
}

fn allowed(from: Lifecycle, to: Lifecycle) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_path() {
        assert!(validate_transition(Lifecycle::Pending, Lifecycle::Applying).is_ok());
        assert!(validate_transition(Lifecycle::Applying, Lifecycle::Ok).is_ok());
        assert!(validate_transition(Lifecycle::Applying, Lifecycle::Errored).is_ok());
    }

    #[test]
    fn no_shortcut_to_ok() {
        let err = validate_transition(Lifecycle::Pending, Lifecycle::Ok).unwrap_err();
        assert_eq!(err.from, Lifecycle::Pending);
        assert_eq!(err.to, Lifecycle::Ok);
    }

    #[test]
    fn errored_is_terminal_until_replaced() {
        assert_eq!(allowed_transitions(Lifecycle::Errored), vec![Lifecycle::Pending]);
        assert!(validate_transition(Lifecycle::Errored, Lifecycle::Ok).is_err());
    }
}
