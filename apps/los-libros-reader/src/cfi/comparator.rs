//! CFI Comparison and Ordering
//!
//! Implements comparison logic for CFIs so page lists and location indexes
//! can be kept sorted and binary searched.

use std::cmp::Ordering;

use super::parser::parse;
use super::types::*;

/// Compare two decoded CFIs in reading order
pub fn compare(a: &EpubCfi, b: &EpubCfi) -> Ordering {
    a.spine_pos
        .cmp(&b.spine_pos)
        .then_with(|| compare_steps(&a.steps, &b.steps))
        .then_with(|| match (a.character_offset, b.character_offset) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        })
}

/// Compare two sequences of CFI steps
fn compare_steps(a: &[CfiStep], b: &[CfiStep]) -> Ordering {
    for (step_a, step_b) in a.iter().zip(b.iter()) {
        // Encoded values keep a text step between its element siblings
        let cmp = step_a.encoded().cmp(&step_b.encoded());
        if cmp != Ordering::Equal {
            return cmp;
        }
    }

    // If all compared steps are equal, longer path is "greater"
    a.len().cmp(&b.len())
}

/// Determine if CFI `a` comes before CFI `b` in reading order
pub fn is_before(a: &EpubCfi, b: &EpubCfi) -> bool {
    compare(a, b) == Ordering::Less
}

/// Determine if CFI `a` comes after CFI `b` in reading order
pub fn is_after(a: &EpubCfi, b: &EpubCfi) -> bool {
    compare(a, b) == Ordering::Greater
}

/// Check if a CFI falls within a range
pub fn is_in_range(cfi: &EpubCfi, start: &EpubCfi, end: &EpubCfi) -> bool {
    compare(cfi, start) != Ordering::Less && compare(cfi, end) != Ordering::Greater
}

/// Compare two CFI strings, returning their ordering
/// Returns None if either CFI is invalid
pub fn compare_cfi_strings(a: &str, b: &str) -> Option<Ordering> {
    let cfi_a = parse(a);
    let cfi_b = parse(b);
    if !cfi_a.is_valid() || !cfi_b.is_valid() {
        return None;
    }
    Some(compare(&cfi_a, &cfi_b))
}

/// Position at which `item` would be inserted into a sorted CFI list
pub fn location_of(item: &str, sorted: &[String]) -> usize {
    let target = parse(item);
    sorted.partition_point(|existing| compare(&parse(existing), &target) == Ordering::Less)
}

/// Index of `item` in a sorted CFI list, if an equal CFI is present
pub fn index_of_sorted(item: &str, sorted: &[String]) -> Option<usize> {
    let target = parse(item);
    sorted
        .binary_search_by(|existing| compare(&parse(existing), &target))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cfi_ordering_same_chapter() {
        let a = parse("epubcfi(/6/4!/4/2/1:10)");
        let b = parse("epubcfi(/6/4!/4/2/1:20)");

        assert!(is_before(&a, &b));
        assert!(is_after(&b, &a));
    }

    #[test]
    fn test_cfi_ordering_different_chapters() {
        let a = parse("epubcfi(/6/4!/4/10/1:99)");
        let b = parse("epubcfi(/6/6!/4/2)");

        assert_eq!(compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_text_step_between_elements() {
        let element = parse("epubcfi(/6/4!/4/2)");
        let text = parse("epubcfi(/6/4!/4/3:0)");
        let next = parse("epubcfi(/6/4!/4/4)");

        assert!(is_before(&element, &text));
        assert!(is_before(&text, &next));
    }

    #[test]
    fn test_cfi_ordering_nested_depth() {
        let a = parse("epubcfi(/6/4!/4/2)");
        let b = parse("epubcfi(/6/4!/4/2/1)");

        // Deeper path comes after shallower path
        assert_eq!(compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_missing_offset_sorts_first() {
        let a = parse("epubcfi(/6/4!/4/2/1)");
        let b = parse("epubcfi(/6/4!/4/2/1:0)");
        assert!(is_before(&a, &b));
    }

    #[test]
    fn test_cfi_in_range() {
        let start = parse("epubcfi(/6/4!/4/2/1:0)");
        let end = parse("epubcfi(/6/4!/4/2/1:100)");
        let middle = parse("epubcfi(/6/4!/4/2/1:50)");
        let outside = parse("epubcfi(/6/4!/4/2/1:150)");

        assert!(is_in_range(&middle, &start, &end));
        assert!(is_in_range(&start, &start, &end));
        assert!(!is_in_range(&outside, &start, &end));
    }

    #[test]
    fn test_compare_cfi_strings() {
        assert_eq!(
            compare_cfi_strings("epubcfi(/6/4!/4/2/1:10)", "epubcfi(/6/4!/4/2/1:20)"),
            Some(Ordering::Less)
        );
        assert_eq!(
            compare_cfi_strings("epubcfi(/6/4[a]!/4/2/1:10)", "epubcfi(/6/4!/4/2/1:10)"),
            Some(Ordering::Equal)
        );
        assert_eq!(compare_cfi_strings("invalid", "epubcfi(/6/4!/4/2)"), None);
    }

    #[test]
    fn test_location_of() {
        let sorted: Vec<String> = [
            "epubcfi(/6/2!/4/2/1:0)",
            "epubcfi(/6/2!/4/2/1:150)",
            "epubcfi(/6/4!/4/2/1:0)",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        assert_eq!(location_of("epubcfi(/6/2!/4/2/1:0)", &sorted), 0);
        assert_eq!(location_of("epubcfi(/6/2!/4/2/1:10)", &sorted), 1);
        assert_eq!(location_of("epubcfi(/6/8!/4)", &sorted), 3);
        assert_eq!(location_of("epubcfi(/6/2!/4)", &[]), 0);

        assert_eq!(index_of_sorted("epubcfi(/6/2!/4/2/1:150)", &sorted), Some(1));
        assert_eq!(index_of_sorted("epubcfi(/6/2!/4/2/1:151)", &sorted), None);
    }

    #[test]
    fn test_sort_cfis() {
        let mut cfis = vec![
            parse("epubcfi(/6/8!/4/2/1:50)"),
            parse("epubcfi(/6/4!/4/2/1:10)"),
            parse("epubcfi(/6/6!/4/2/1:30)"),
            parse("epubcfi(/6/4!/4/2/1:5)"),
        ];

        cfis.sort_by(compare);

        assert_eq!(cfis[0].to_string(), "epubcfi(/6/4!/4/2/1:5)");
        assert_eq!(cfis[1].to_string(), "epubcfi(/6/4!/4/2/1:10)");
        assert_eq!(cfis[2].to_string(), "epubcfi(/6/6!/4/2/1:30)");
        assert_eq!(cfis[3].to_string(), "epubcfi(/6/8!/4/2/1:50)");
    }
}
