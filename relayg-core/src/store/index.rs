use std::collections::HashMap;

use super::KindLabelSelector;
use crate::models::{LABEL_KIND, LABEL_NAME, LABEL_NAMESPACE};

/// Label keys feeding the composite index, in key order.
pub(crate) const LABEL_KEYS: [&str; 3] = [LABEL_KIND, LABEL_NAMESPACE, LABEL_NAME];

/// Index key for a stored entity: the values of whichever indexed labels are
/// present, in key order. An entity carrying none of them is not indexed.
pub(crate) fn entity_key(labels: &HashMap<String, String>) -> Option<Vec<u8>> {
    let values: Vec<&str> = LABEL_KEYS
        .iter()
        .filter_map(|key| labels.get(*key).map(String::as_str))
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(join_key(&values))
    }
}

/// Index key for a lookup. All three components are joined, so a selector
/// only matches entities labelled with all three keys.
pub(crate) fn selector_key(selector: &KindLabelSelector) -> Vec<u8> {
    join_key(&[&selector.kind, &selector.namespace, &selector.name])
}

// The terminal NUL keeps "a/b" from colliding with the prefix of "a/bc".
fn join_key(values: &[&str]) -> Vec<u8> {
    let mut key = values.join("/").into_bytes();
    key.push(0);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn entity_key_uses_present_labels_in_key_order() {
        let full = labels(&[
            (LABEL_KIND, "Ingress"),
            (LABEL_NAMESPACE, "default"),
            (LABEL_NAME, "ing-1"),
        ]);
        assert_eq!(entity_key(&full).unwrap(), b"Ingress/default/ing-1\0");

        let partial = labels(&[(LABEL_KIND, "Ingress"), (LABEL_NAME, "ing-1")]);
        assert_eq!(entity_key(&partial).unwrap(), b"Ingress/ing-1\0");
    }

    #[test]
    fn entity_key_absent_without_indexed_labels() {
        assert!(entity_key(&labels(&[])).is_none());
        assert!(entity_key(&labels(&[("team", "edge")])).is_none());
    }

    #[test]
    fn selector_key_matches_fully_labelled_entity() {
        let selector = KindLabelSelector {
            kind: "Ingress".into(),
            namespace: "default".into(),
            name: "ing-1".into(),
        };
        let full = labels(&[
            (LABEL_KIND, "Ingress"),
            (LABEL_NAMESPACE, "default"),
            (LABEL_NAME, "ing-1"),
        ]);
        assert_eq!(selector_key(&selector), entity_key(&full).unwrap());
    }

    #[test]
    fn terminal_byte_blocks_prefix_collision() {
        let short = labels(&[(LABEL_KIND, "Ingress"), (LABEL_NAMESPACE, "def")]);
        let long = labels(&[(LABEL_KIND, "Ingress"), (LABEL_NAMESPACE, "default")]);
        let short_key = entity_key(&short).unwrap();
        let long_key = entity_key(&long).unwrap();
        assert!(!long_key.starts_with(&short_key));
    }
}
