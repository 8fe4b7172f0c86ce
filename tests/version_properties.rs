//! Property tests for version comparison semantics

use std::cmp::Ordering;
use exthost::plugin::VersionChecker;
use proptest::prelude::*;

fn version(segments: &[u64]) -> String {
    segments
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

proptest! {
    #[test]
    fn comparison_is_antisymmetric(a in prop::collection::vec(0u64..1000, 1..5),
                                   b in prop::collection::vec(0u64..1000, 1..5)) {
        let left = VersionChecker::compare_versions(&version(&a), &version(&b));
        let right = VersionChecker::compare_versions(&version(&b), &version(&a));
        prop_assert_eq!(left, right.reverse());
    }

    #[test]
    fn every_version_equals_itself(segments in prop::collection::vec(0u64..1000, 1..5)) {
        let v = version(&segments);
        prop_assert_eq!(VersionChecker::compare_versions(&v, &v), Ordering::Equal);
    }

    #[test]
    fn trailing_zero_segments_do_not_matter(segments in prop::collection::vec(0u64..1000, 1..4)) {
        let short = version(&segments);
        let mut padded = segments.clone();
        padded.push(0);
        prop_assert_eq!(
            VersionChecker::compare_versions(&short, &version(&padded)),
            Ordering::Equal
        );
    }

    #[test]
    fn update_available_iff_strictly_newer(a in prop::collection::vec(0u64..1000, 1..4),
                                           b in prop::collection::vec(0u64..1000, 1..4)) {
        let current = version(&a);
        let candidate = version(&b);
        let expected =
            VersionChecker::compare_versions(&candidate, &current) == Ordering::Greater;
        prop_assert_eq!(
            VersionChecker::is_update_available(Some(&current), &candidate),
            expected
        );
    }

    #[test]
    fn version_inside_inclusive_bounds_is_compatible(
        low in prop::collection::vec(0u64..500, 1..4),
        high in prop::collection::vec(500u64..1000, 1..4),
        actual in prop::collection::vec(0u64..1000, 1..4),
    ) {
        let min = version(&low);
        let max = version(&high);
        let v = version(&actual);

        let above_min =
            VersionChecker::compare_versions(&v, &min) != Ordering::Less;
        let below_max =
            VersionChecker::compare_versions(&v, &max) != Ordering::Greater;

        prop_assert_eq!(
            VersionChecker::is_version_compatible(&v, Some(&min), Some(&max)),
            above_min && below_max
        );
    }

    #[test]
    fn unconstrained_dependency_accepts_anything(
        actual in prop::collection::vec(0u64..1000, 1..4),
    ) {
        prop_assert!(VersionChecker::is_version_compatible(&version(&actual), None, None));
    }
}

#[test]
fn unparsable_versions_are_permissively_compatible() {
    assert!(VersionChecker::is_version_compatible(
        "1.0.0-beta",
        Some("1.0.0"),
        Some("2.0.0")
    ));
    assert!(VersionChecker::is_version_compatible("garbage", None, Some("1.0.0")));
}
