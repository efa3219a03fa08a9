use crate::models::classify_types::ClassificationRecord;
use std::sync::Arc;

/// Records with at least one label containing `query`, ignoring case, in
/// insertion order. An empty query returns the whole history; any other
/// query, whitespace included, is matched as-is.
pub fn filter_history(
    history: &[Arc<ClassificationRecord>],
    query: &str,
) -> Vec<Arc<ClassificationRecord>> {
    if query.is_empty() {
        return history.to_vec();
    }

    let needle = query.to_lowercase();
    history
        .iter()
        .filter(|record| record.matches(&needle))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::classify_types::Prediction;

    fn record(name: &str, labels: &[&str]) -> Arc<ClassificationRecord> {
        let predictions = labels
            .iter()
            .enumerate()
            .map(|(i, l)| Prediction::new(*l, 0.9 - i as f32 * 0.1))
            .collect();
        Arc::new(ClassificationRecord::new(predictions, name.to_string()))
    }

    #[test]
    fn empty_query_is_identity() {
        let history = vec![record("Image 1", &["tabby cat"]), record("Image 2", &["golden retriever"])];
        let filtered = filter_history(&history, "");
        assert_eq!(filtered.len(), 2);
        assert!(Arc::ptr_eq(&filtered[0], &history[0]));
        assert!(Arc::ptr_eq(&filtered[1], &history[1]));
    }

    #[test]
    fn whitespace_is_part_of_the_query() {
        let history = vec![record("Image 1", &["tabby cat"]), record("Image 2", &["goldfish"])];

        let spaced = filter_history(&history, " ");
        assert_eq!(spaced.len(), 1);
        assert_eq!(spaced[0].image_name, "Image 1");

        let history = vec![record("Image 1", &["cat"]), record("Image 2", &["tabby cat"])];
        assert!(filter_history(&history, "cat ").is_empty());
        assert_eq!(filter_history(&history, " cat").len(), 1);
    }

    #[test]
    fn matches_substring_of_any_label() {
        let history = vec![record("Image 1", &["tabby cat"]), record("Image 2", &["golden retriever"])];
        let filtered = filter_history(&history, "cat");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].image_name, "Image 1");
    }

    #[test]
    fn matching_ignores_case_and_checks_lower_ranked_labels() {
        let history = vec![
            record("Image 1", &["tabby cat", "Egyptian cat"]),
            record("Image 2", &["golden retriever", "Labrador retriever"]),
            record("Image 3", &["tiger", "EGYPTIAN CAT"]),
        ];
        let filtered = filter_history(&history, "egyptian");
        let names: Vec<_> = filtered.iter().map(|r| r.image_name.as_str()).collect();
        assert_eq!(names, vec!["Image 1", "Image 3"]);
    }

    #[test]
    fn no_match_is_empty() {
        let history = vec![record("Image 1", &["tabby cat"])];
        assert!(filter_history(&history, "submarine").is_empty());
        assert!(filter_history(&[], "cat").is_empty());
    }
}
