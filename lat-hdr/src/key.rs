use std::collections::BTreeMap;

use crate::record::Row;

/// Ordered `(tag, value)` pairs identifying a series or a query group.
///
/// Order is significant: grouping by `["a", "b"]` and by `["b", "a"]` gives keys that
/// never compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GroupKey(Vec<(String, String)>);

impl GroupKey {
    /// Build a key from exactly `tags`, in that order. Missing tags map to `""`.
    pub fn from_row<S: AsRef<str>>(row: &Row, tags: &[S]) -> Self {
        GroupKey(
            tags.iter()
                .map(|t| (t.as_ref().to_string(), row.tag(t.as_ref())))
                .collect(),
        )
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn to_tag_map(&self) -> BTreeMap<String, String> {
        self.0.iter().cloned().collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for GroupKey {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        GroupKey(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
