use std::collections::BTreeMap;

use serde_json::Value;

/// Count records per distinct value of `field`, most frequent first.
///
/// Records without the field are counted under `None`. Non-string values are
/// keyed by their JSON text, so `2024` and `"2024"` stay distinct.
pub(crate) fn group_counts(records: &[Value], field: &str) -> Vec<(Option<String>, u64)> {
    let mut counts: BTreeMap<Option<String>, u64> = BTreeMap::new();
    for record in records {
        let key = match record.get(field) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };
        *counts.entry(key).or_default() += 1;
    }

    let mut groups: Vec<_> = counts.into_iter().collect();
    groups.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    groups
}
