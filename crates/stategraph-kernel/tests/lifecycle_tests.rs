use proptest::prelude::*;
use stategraph_kernel::state_machine::{allowed_transitions, validate_transition};
use stategraph_kernel::Lifecycle;

#[test]
fn test_pending_transitions() {
    assert!(validate_transition(Lifecycle::Pending, Lifecycle::Applying).is_ok());
    assert!(validate_transition(Lifecycle::Pending, Lifecycle::Errored).is_ok());

    // Production has to run before a node is ready
    assert!(validate_transition(Lifecycle::Pending, Lifecycle::Ok).is_err());
}

#[test]
fn test_settled_nodes_only_reenter_pending() {
    for settled in [Lifecycle::Ok, Lifecycle::Errored] {
        assert_eq!(allowed_transitions(settled), vec![Lifecycle::Pending]);
        assert!(validate_transition(settled, Lifecycle::Applying).is_err());
    }
}

fn lifecycle() -> impl Strategy<Value = Lifecycle> {
    prop_oneof![
        Just(Lifecycle::Pending),
        Just(Lifecycle::Applying),
        Just(Lifecycle::Ok),
        Just(Lifecycle::Errored),
    ]
}

proptest! {
    #[test]
    fn prop_validation_matches_allowed_set(from in lifecycle(), to in lifecycle()) {
        let res = validate_transition(from, to);
        let allowed = allowed_transitions(from);

        prop_assert_eq!(res.is_ok(), allowed.contains(&to));
    }

    #[test]
    fn prop_no_self_transitions(state in lifecycle()) {
        prop_assert!(validate_transition(state, state).is_err());
    }
}
