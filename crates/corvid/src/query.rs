use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{comparison::compare_optional, CorvidError, Document, FieldPath, Result, Value};

/// Sort order for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Ascending order
    Ascending,
    /// Descending order
    Descending,
}

impl SortOrder {
    fn parse(field: &str, direction: &Value) -> Result<Self> {
        match direction.as_i64() {
            Some(1) => Ok(Self::Ascending),
            Some(-1) => Ok(Self::Descending),
            _ => {
                Err(CorvidError::invalid(
                    "sort",
                    format!("direction for '{}' must be 1 or -1, found {}", field, direction),
                ))
            },
        }
    }
}

/// An ordered list of sort keys. Earlier keys take precedence; ties keep their input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortSpec {
    keys: Vec<(FieldPath, SortOrder)>,
}

impl SortSpec {
    /// Creates an empty sort spec that keeps natural order.
    pub const fn new() -> Self {
        Self {
            keys: Vec::new(),
        }
    }

    /// Compiles a sort document such as `{"gpa": -1, "name": 1}`.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::InvalidArgument` for directions other than `1` and `-1`, and
    /// `CorvidError::InvalidPath` for malformed paths.
    pub fn parse(spec: &Document) -> Result<Self> {
        let keys = spec
            .iter()
            .map(|(field, direction)| Ok((FieldPath::parse(field)?, SortOrder::parse(field, direction)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            keys,
        })
    }

    /// Appends a sort key.
    ///
    /// # Example
    ///
    /// ```rust
    /// use corvid_db::{FieldPath, SortOrder, SortSpec};
    ///
    /// let sort = SortSpec::new()
    ///     .then(FieldPath::parse("major").unwrap(), SortOrder::Ascending)
    ///     .then(FieldPath::parse("gpa").unwrap(), SortOrder::Descending);
    /// assert_eq!(sort.keys().len(), 2);
    /// ```
    pub fn then(mut self, path: FieldPath, order: SortOrder) -> Self {
        self.keys.push((path, order));
        self
    }

    pub fn keys(&self) -> &[(FieldPath, SortOrder)] { &self.keys }

    pub fn is_empty(&self) -> bool { self.keys.is_empty() }

    /// Compares two documents by the sort keys. Absent fields sort lowest.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for &(ref path, order) in &self.keys {
            let ordering = compare_optional(a.resolve(path).value(), b.resolve(path).value());
            let ordering = match order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Stable-sorts anything that borrows as a document.
    pub fn sort<D: AsRef<Document>>(&self, documents: &mut [D]) {
        if self.keys.is_empty() {
            return;
        }
        documents.sort_by(|a, b| self.compare(a.as_ref(), b.as_ref()));
    }
}

/// Options for `find`: projection, sort, skip and limit.
///
/// Sort is applied before skip and limit; projection is applied lazily as the cursor is
/// consumed. A limit of zero means no limit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindOptions {
    /// Projection document (`{"name": 1, "_id": 0}`)
    pub projection: Option<Document>,
    /// Sort document (`{"gpa": -1}`)
    pub sort:       Option<Document>,
    /// Number of results to skip
    pub skip:       usize,
    /// Maximum number of results
    pub limit:      Option<usize>,
}

impl FindOptions {
    /// Creates options that return every match in natural order.
    pub const fn new() -> Self {
        Self {
            projection: None,
            sort:       None,
            skip:       0,
            limit:      None,
        }
    }

    /// Sets the projection document.
    ///
    /// # Arguments
    ///
    /// * `projection` - Inclusion or exclusion document
    ///
    /// # Returns
    ///
    /// Returns the options for chaining.
    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Sets the sort document.
    ///
    /// # Example
    ///
    /// ```rust
    /// use corvid_db::{Document, FindOptions};
    /// use serde_json::json;
    ///
    /// let options = FindOptions::new()
    ///     .sort(Document::from_json(json!({"gpa": -1})).unwrap())
    ///     .limit(3);
    /// assert_eq!(options.limit, Some(3));
    /// ```
    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Sets the number of results to skip.
    pub const fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Sets the maximum number of results to return.
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns the effective limit, treating zero as unlimited.
    pub(crate) fn effective_limit(&self) -> Option<usize> { self.limit.filter(|&n| n > 0) }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(json: serde_json::Value) -> Document { Document::from_json(json).unwrap() }

    #[test]
    fn test_parse_sort_spec() {
        let sort = SortSpec::parse(&doc(json!({"gpa": -1, "name": 1}))).unwrap();
        assert_eq!(sort.keys()[0].1, SortOrder::Descending);
        assert_eq!(sort.keys()[1].0.as_str(), "name");

        assert!(matches!(
            SortSpec::parse(&doc(json!({"gpa": 2}))),
            Err(CorvidError::InvalidArgument { .. })
        ));
        assert!(SortSpec::parse(&doc(json!({"gpa": "desc"}))).is_err());
    }

    #[test]
    fn test_sort_is_stable_and_absent_lowest() {
        let sort = SortSpec::parse(&doc(json!({"gpa": -1}))).unwrap();
        let mut docs = vec![
            doc(json!({"n": 1, "gpa": 3.5})),
            doc(json!({"n": 2})),
            doc(json!({"n": 3, "gpa": 3.9})),
            doc(json!({"n": 4, "gpa": 3.5})),
            doc(json!({"n": 5, "gpa": null})),
        ];
        sort.sort(&mut docs);
        let order: Vec<_> = docs.iter().map(|d| d.to_json()["n"].clone()).collect();
        assert_eq!(order, [json!(3), json!(1), json!(4), json!(5), json!(2)]);

        let ascending = SortSpec::parse(&doc(json!({"gpa": 1}))).unwrap();
        ascending.sort(&mut docs);
        assert_eq!(docs[0].to_json()["n"], json!(2));
    }

    #[test]
    fn test_find_options_builder() {
        let options = FindOptions::new()
            .projection(doc(json!({"name": 1})))
            .skip(2)
            .limit(0);
        assert_eq!(options.skip, 2);
        assert_eq!(options.effective_limit(), None);
        assert_eq!(FindOptions::new().limit(5).effective_limit(), Some(5));

        let parsed: FindOptions = serde_json::from_value(json!({"sort": {"gpa": -1}, "limit": 3})).unwrap();
        assert_eq!(parsed.limit, Some(3));
        assert_eq!(parsed.skip, 0);
    }
}
