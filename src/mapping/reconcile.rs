use crate::models::{merge_mappings, DataItemMapping};

use super::expansion::ComboCandidate;

/// Pair each destination candidate with a source candidate
///
/// An option-combo id match wins; otherwise the first source candidate with
/// the same non-empty display name. Unmatched destination candidates emit
/// nothing. The result is de-duplicated.
pub fn reconcile(destination: &[ComboCandidate], source: &[ComboCandidate]) -> Vec<DataItemMapping> {
    let matched = destination.iter().filter_map(|dest| {
        source
            .iter()
            .find(|src| src.combo == dest.combo)
            .or_else(|| {
                source
                    .iter()
                    .find(|src| !dest.name.is_empty() && src.name == dest.name)
            })
            .map(|src| DataItemMapping::new(dest.qualified_id(), src.qualified_id()))
    });
    merge_mappings(Vec::new(), matched)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(element: &str, combo: &str, name: &str) -> ComboCandidate {
        ComboCandidate::new(element, combo, name)
    }

    #[test]
    fn test_id_match_wins_then_name_fallback() {
        let destination = vec![candidate("d", "a", "X"), candidate("d", "b", "Y")];
        let source = vec![candidate("s", "a", "Z"), candidate("s", "c", "Y")];

        let mappings = reconcile(&destination, &source);
        assert_eq!(
            mappings,
            vec![
                DataItemMapping::new("d.a", "s.a"),
                DataItemMapping::new("d.b", "s.c"),
            ]
        );
    }

    #[test]
    fn test_unmatched_candidates_are_dropped() {
        let destination = vec![candidate("d", "q", "Nobody")];
        let source = vec![candidate("s", "a", "Z")];
        assert!(reconcile(&destination, &source).is_empty());
    }

    #[test]
    fn test_first_name_match_wins() {
        let destination = vec![candidate("d", "x", "Both")];
        let source = vec![candidate("s", "first", "Both"), candidate("s", "second", "Both")];
        assert_eq!(
            reconcile(&destination, &source),
            vec![DataItemMapping::new("d.x", "s.first")]
        );
    }

    #[test]
    fn test_empty_names_never_match() {
        let destination = vec![candidate("d", "x", "")];
        let source = vec![candidate("s", "y", "")];
        assert!(reconcile(&destination, &source).is_empty());
    }
}
