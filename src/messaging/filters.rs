/// Composable library filters
///
/// A `FilterSet` is a conjunction of `Filter`s carried inside requests. The hub
/// never looks inside; it only needs equal sets to serialize identically, so
/// the set is kept sorted and free of duplicates.
use serde::{Deserialize, Serialize};

/// A single predicate narrowing a library query
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Filter {
    /// Songs by this artist (or album artist)
    Artist(String),
    /// Songs on this album
    Album(String),
    /// Only compilations (true) or only regular albums (false)
    Compilation(bool),
    /// Case-insensitive substring match on title, album or artist
    Search(String),
    /// Songs carrying (or, if inverted, not carrying) a tag
    Tag { name: String, inverted: bool },
    /// Songs with exactly this rating; `None` matches unrated songs
    Rating(Option<u8>),
    /// Songs released in the decade starting at this year
    Decade(u16),
}

impl Filter {
    /// Label shown in list headers, `None` for filters the UI keeps hidden
    pub fn name(&self) -> Option<String> {
        match self {
            Filter::Artist(_) | Filter::Album(_) | Filter::Compilation(_) => None,
            Filter::Search(text) => Some(format!("Search: {}", text)),
            Filter::Tag { name, inverted } => {
                Some(format!("Tag{}={}", if *inverted { "!" } else { "" }, name))
            }
            Filter::Rating(Some(rating)) => Some(format!("Rating={}", "*".repeat(*rating as usize))),
            Filter::Rating(None) => Some("Rating=Not rated".to_string()),
            Filter::Decade(decade) => Some(format!("Decade={}s", decade)),
        }
    }
}

/// Canonical conjunction of filters
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Filter>")]
pub struct FilterSet(Vec<Filter>);

impl FilterSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Return a new set with `filter` added
    pub fn with(&self, filter: Filter) -> Self {
        let mut filters = self.0.clone();
        filters.push(filter);
        filters.into_iter().collect()
    }

    /// Return a new set without filters matching `predicate`
    pub fn without(&self, predicate: impl Fn(&Filter) -> bool) -> Self {
        Self(self.0.iter().filter(|f| !predicate(f)).cloned().collect())
    }

    pub fn contains(&self, predicate: impl Fn(&Filter) -> bool) -> bool {
        self.0.iter().any(predicate)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Header suffix like `" <Tag=Rock, Search: live>"`, empty when nothing is visible
    pub fn display_name(&self) -> String {
        let names: Vec<String> = self.0.iter().filter_map(Filter::name).collect();
        if names.is_empty() {
            String::new()
        } else {
            format!(" <{}>", names.join(", "))
        }
    }
}

impl FromIterator<Filter> for FilterSet {
    fn from_iter<I: IntoIterator<Item = Filter>>(iter: I) -> Self {
        let mut filters: Vec<Filter> = iter.into_iter().collect();
        filters.sort();
        filters.dedup();
        Self(filters)
    }
}

impl From<Vec<Filter>> for FilterSet {
    fn from(filters: Vec<Filter>) -> Self {
        filters.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_order_is_canonical() {
        let a = FilterSet::new()
            .with(Filter::Tag { name: "Rock".into(), inverted: false })
            .with(Filter::Search("live".into()));
        let b = FilterSet::new()
            .with(Filter::Search("live".into()))
            .with(Filter::Tag { name: "Rock".into(), inverted: false });
        assert_eq!(a, b);
    }

    #[test]
    fn test_duplicates_collapse() {
        let set: FilterSet = vec![Filter::Decade(1990), Filter::Decade(1990)].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_display_name_skips_hidden_filters() {
        let set = FilterSet::new()
            .with(Filter::Artist("Queen".into()))
            .with(Filter::Tag { name: "Podcast".into(), inverted: true });
        assert_eq!(set.display_name(), " <Tag!=Podcast>");
        assert_eq!(FilterSet::new().display_name(), "");
    }

    #[test]
    fn test_without() {
        let set = FilterSet::new()
            .with(Filter::Artist("Queen".into()))
            .with(Filter::Rating(Some(3)));
        let stripped = set.without(|f| matches!(f, Filter::Artist(_)));
        assert!(!stripped.contains(|f| matches!(f, Filter::Artist(_))));
        assert_eq!(stripped.len(), 1);
    }

    #[test]
    fn test_deserialized_set_is_canonical() {
        let json = r#"[{"Search":"live"},{"Decade":1990},{"Search":"live"}]"#;
        let parsed: FilterSet = serde_json::from_str(json).unwrap();
        let built = FilterSet::new()
            .with(Filter::Decade(1990))
            .with(Filter::Search("live".into()));
        assert_eq!(parsed, built);
        assert_eq!(
            serde_json::to_string(&parsed).unwrap(),
            serde_json::to_string(&built).unwrap()
        );
    }
}
