//! Resilience score properties

use ira_chaos::resilience_score;
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_score_stays_in_unit_interval(a in 0usize..50, u in 0usize..50, e in 0usize..50) {
        let score = resilience_score(a, u, e);
        prop_assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn prop_more_trouble_never_raises_the_score(a in 0usize..10, u in 0usize..10, e in 0usize..10) {
        let base = resilience_score(a, u, e);
        prop_assert!(resilience_score(a + 1, u, e) <= base);
        prop_assert!(resilience_score(a, u + 1, e) <= base);
        prop_assert!(resilience_score(a, u, e + 1) <= base);
    }
}

#[test]
fn quiet_system_scores_one() {
    assert!((resilience_score(0, 0, 0) - 1.0).abs() < f64::EPSILON);
}
