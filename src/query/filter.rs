/// A single tag/label predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Eq(String, String),
    Ne(String, String),
    /// Matches when the tag equals any of the values.
    AnyOf(String, Vec<String>),
    /// Regular expression match, pattern passed through unescaped.
    Matches(String, String),
    /// Disjunction of conjunctions, one group per candidate identity.
    AnyGroup(Vec<Vec<(String, String)>>),
}

/// Conjunction of predicates, shared by every query dialect.
///
/// Predicates with empty values are dropped when added, so kind-specific code
/// can pass optional identity fields straight through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: &str, value: &str) -> Self {
        if !value.is_empty() {
            self.predicates.push(Predicate::Eq(key.to_string(), value.to_string()));
        }
        self
    }

    pub fn ne(mut self, key: &str, value: &str) -> Self {
        self.predicates.push(Predicate::Ne(key.to_string(), value.to_string()));
        self
    }

    pub fn any_of<I, S>(mut self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values: Vec<String> = values
            .into_iter()
            .map(|v| v.as_ref().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        if !values.is_empty() {
            self.predicates.push(Predicate::AnyOf(key.to_string(), values));
        }
        self
    }

    pub fn matches(mut self, key: &str, pattern: &str) -> Self {
        if !pattern.is_empty() {
            self.predicates.push(Predicate::Matches(key.to_string(), pattern.to_string()));
        }
        self
    }

    pub fn any_group(mut self, groups: Vec<Vec<(&str, &str)>>) -> Self {
        let groups: Vec<Vec<(String, String)>> = groups
            .into_iter()
            .map(|group| {
                group
                    .into_iter()
                    .filter(|(_, v)| !v.is_empty())
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<Vec<_>>()
            })
            .filter(|group| !group.is_empty())
            .collect();
        if !groups.is_empty() {
            self.predicates.push(Predicate::AnyGroup(groups));
        }
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}
