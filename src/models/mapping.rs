use serde::{Deserialize, Serialize};

/// Correspondence between a destination data item and its source counterpart
///
/// Either side may be a bare element id or a compound
/// `elementId.categoryOptionComboId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataItemMapping {
    pub id: String,
    pub source_id: String,
}

impl DataItemMapping {
    pub fn new(id: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
        }
    }

    /// Both sides already name a category option combination
    pub fn is_fully_qualified(&self) -> bool {
        is_qualified(&self.id) && is_qualified(&self.source_id)
    }
}

/// Whether an identifier carries a `.categoryOptionCombo` suffix
pub fn is_qualified(id: &str) -> bool {
    id.contains('.')
}

/// Append `incoming` to `existing`, keeping first occurrences and order
pub fn merge_mappings(
    existing: Vec<DataItemMapping>,
    incoming: impl IntoIterator<Item = DataItemMapping>,
) -> Vec<DataItemMapping> {
    let mut merged = existing;
    for mapping in incoming {
        if !merged.contains(&mapping) {
            merged.push(mapping);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualification() {
        assert!(DataItemMapping::new("a.b", "c.d").is_fully_qualified());
        assert!(!DataItemMapping::new("a.b", "c").is_fully_qualified());
        assert!(!is_qualified("abc"));
    }

    #[test]
    fn test_merge_appends_without_duplicates() {
        let merged = merge_mappings(
            vec![DataItemMapping::new("x", "x")],
            vec![DataItemMapping::new("y", "y"), DataItemMapping::new("x", "x")],
        );
        assert_eq!(
            merged,
            vec![DataItemMapping::new("x", "x"), DataItemMapping::new("y", "y")]
        );
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(DataItemMapping::new("a", "b")).unwrap();
        assert_eq!(json, serde_json::json!({"id": "a", "sourceId": "b"}));
    }
}
