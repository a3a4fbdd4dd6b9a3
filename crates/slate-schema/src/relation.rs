use serde::{Deserialize, Serialize};
use std::fmt;

/// How multiple match pairs combine in the generated WHERE clause.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    And,
    Or,
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

/// One match pair: a column of the declaring table against a column of
/// the target table. The target side must carry a foreign key and both
/// sides must share a scalar type (checked at materialization).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationPair {
    pub local: String,
    pub target: String,
}

/// A virtual, non-stored column describing rows of another table that
/// reference this one. Resolved lazily at entity access time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,
    pub target_table: String,
    pub pairs: Vec<RelationPair>,
    pub combine: Combinator,
}

impl Relation {
    pub fn new(
        name: impl Into<String>,
        target_table: impl Into<String>,
        combine: Combinator,
    ) -> Self {
        Self {
            name: name.into(),
            target_table: target_table.into().to_lowercase(),
            pairs: Vec::new(),
            combine,
        }
    }

    /// Add a `local column = target column` match pair.
    pub fn matching(mut self, local: impl Into<String>, target: impl Into<String>) -> Self {
        self.pairs.push(RelationPair {
            local: local.into().to_lowercase(),
            target: target.into().to_lowercase(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combinator_renders_sql_keyword() {
        assert_eq!(Combinator::And.to_string(), "AND");
        assert_eq!(Combinator::Or.to_string(), "OR");
    }

    #[test]
    fn builder_lowercases_names() {
        let rel = Relation::new("posts", "Posts", Combinator::Or).matching("Id", "Author_Id");
        assert_eq!(rel.target_table, "posts");
        assert_eq!(rel.pairs[0].local, "id");
        assert_eq!(rel.pairs[0].target, "author_id");
    }
}
