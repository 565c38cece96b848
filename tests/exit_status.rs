use proptest::prelude::*;

use runmon_harness::normalize_exit_code;

proptest! {
    #[test]
    fn non_negative_codes_pass_through(raw in 0i32..=255, sig in proptest::option::of(1i32..64)) {
        prop_assert_eq!(normalize_exit_code(raw, sig), raw);
    }

    #[test]
    fn termination_by_the_expected_signal_is_success(sig in 1i32..64) {
        prop_assert_eq!(normalize_exit_code(-sig, Some(sig)), 0);
    }

    #[test]
    fn any_other_signal_stays_negative(sig in 1i32..64, other in 1i32..64) {
        prop_assume!(sig != other);
        prop_assert_eq!(normalize_exit_code(-other, Some(sig)), -other);
    }

    #[test]
    fn without_expected_signal_nothing_changes(raw in any::<i32>()) {
        prop_assert_eq!(normalize_exit_code(raw, None), raw);
    }
}
