use std::collections::BTreeMap;

use serde::Serialize;

/// Category name to working-store table handle.
///
/// Values are immutable; each stage returns a new set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultSet(BTreeMap<String, String>);

impl ResultSet {
    pub fn new() -> Self { Self::default() }

    /// A copy with `category` bound to `table`.
    #[must_use]
    pub fn with(&self, category: &str, table: &str) -> Self {
        let mut map = self.0.clone();
        map.insert(category.to_string(), table.to_string());
        Self(map)
    }

    /// A copy without `category`.
    #[must_use]
    pub fn without(&self, category: &str) -> Self {
        let mut map = self.0.clone();
        map.remove(category);
        Self(map)
    }

    pub fn get(&self, category: &str) -> Option<&str> {
        self.0.get(category).map(String::as_str)
    }

    pub fn contains(&self, category: &str) -> bool { self.0.contains_key(category) }

    #[inline] pub fn len(&self) -> usize { self.0.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Table handles, one per category.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.0.values().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(c, t)| (c.as_str(), t.as_str()))
    }
}

impl<C: Into<String>, T: Into<String>> FromIterator<(C, T)> for ResultSet {
    fn from_iter<I: IntoIterator<Item = (C, T)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(c, t)| (c.into(), t.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_returns_a_new_set() {
        let a = ResultSet::new().with("building", "t1");
        let b = a.with("road", "t2");
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 2);
        assert_eq!(b.get("road"), Some("t2"));
        assert!(!b.without("road").contains("road"));
    }

    #[test]
    fn collects_from_pairs() {
        let rs: ResultSet = [("zone", "z"), ("building", "b")].into_iter().collect();
        assert_eq!(rs.categories().collect::<Vec<_>>(), vec!["building", "zone"]);
    }
}
