//! Secondary indexes: single-field, compound and text lookup structures that narrow
//! collection scans.
//!
//! Indexes only ever produce candidate supersets. The collection re-evaluates the full filter
//! on every candidate, so an index can change how fast a query runs but never what it returns.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    comparison::{compare_same_kind, compare_values},
    constants::ID_INDEX_NAME,
    document::Resolved,
    filter::{Condition, Filter},
    CorvidError,
    Document,
    FieldPath,
    Result,
    Value,
};

/// Identifier of a stored document version slot. Assigned in insertion order.
pub type RecordId = u64;

/// Upper bound on the number of equality combinations a compound lookup expands to.
const MAX_POINT_COMBINATIONS: usize = 256;

/// Splits text into lowercase alphanumeric tokens.
///
/// # Example
///
/// ```rust
/// use corvid_db::index::tokenize;
///
/// assert_eq!(tokenize("Computer Science, 2nd-year"), ["computer", "science", "2nd", "year"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Direction of one index key component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexDirection {
    Ascending,
    Descending,
    Text,
}

impl IndexDirection {
    fn parse(field: &str, value: &Value) -> Result<Self> {
        match *value {
            Value::String(ref s) if s == "text" => Ok(Self::Text),
            _ => {
                match value.as_i64() {
                    Some(1) => Ok(Self::Ascending),
                    Some(-1) => Ok(Self::Descending),
                    _ => {
                        Err(CorvidError::invalid(
                            "createIndex",
                            format!("key '{}' must be 1, -1 or \"text\", found {}", field, value),
                        ))
                    },
                }
            },
        }
    }

    fn to_value(self) -> Value {
        match self {
            Self::Ascending => Value::Int(1),
            Self::Descending => Value::Int(-1),
            Self::Text => Value::from("text"),
        }
    }

    fn name_suffix(self) -> &'static str {
        match self {
            Self::Ascending => "1",
            Self::Descending => "-1",
            Self::Text => "text",
        }
    }
}

/// Options accepted by `create_index`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexOptions {
    /// Explicit index name; defaults to the key fields and directions joined with `_`
    pub name:   Option<String>,
    /// Reject documents that would duplicate a key
    pub unique: bool,
}

/// The declaration of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name:   String,
    pub keys:   Vec<(FieldPath, IndexDirection)>,
    pub unique: bool,
}

impl IndexSpec {
    /// Builds a spec from a key document (`{"major": 1, "gpa": -1}` or `{"bio": "text"}`).
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::InvalidArgument` for an empty key document, an invalid direction,
    /// mixing text and ordered keys, a unique text index, or the reserved `_id_` name.
    pub fn parse(keys: &Document, options: IndexOptions) -> Result<Self> {
        if keys.is_empty() {
            return Err(CorvidError::invalid("createIndex", "index keys cannot be empty"));
        }
        let keys = keys
            .iter()
            .map(|(field, value)| Ok((FieldPath::parse(field)?, IndexDirection::parse(field, value)?)))
            .collect::<Result<Vec<_>>>()?;

        let text_keys = keys
            .iter()
            .filter(|&&(_, direction)| direction == IndexDirection::Text)
            .count();
        if text_keys > 0 && text_keys != keys.len() {
            return Err(CorvidError::invalid(
                "createIndex",
                "text keys cannot be combined with ordered keys",
            ));
        }
        if text_keys > 0 && options.unique {
            return Err(CorvidError::invalid("createIndex", "text indexes cannot be unique"));
        }

        let name = options.name.unwrap_or_else(|| {
            keys.iter()
                .map(|&(ref path, direction)| format!("{}_{}", path, direction.name_suffix()))
                .collect::<Vec<_>>()
                .join("_")
        });
        if name == ID_INDEX_NAME {
            return Err(CorvidError::invalid(
                "createIndex",
                format!("index name '{}' is reserved", ID_INDEX_NAME),
            ));
        }

        Ok(Self {
            name,
            keys,
            unique: options.unique,
        })
    }

    fn id_index() -> Self {
        Self {
            name:   ID_INDEX_NAME.to_owned(),
            keys:   vec![(FieldPath::id(), IndexDirection::Ascending)],
            unique: true,
        }
    }

    pub fn is_text(&self) -> bool {
        self.keys
            .iter()
            .any(|&(_, direction)| direction == IndexDirection::Text)
    }

    /// Describes the index the way `get_indexes` reports it: `{key, name, unique}`.
    pub fn to_document(&self) -> Document {
        let key: Document = self
            .keys
            .iter()
            .map(|&(ref path, direction)| (path.to_string(), direction.to_value()))
            .collect();
        let mut description = Document::new();
        description.insert("key", key);
        description.insert("name", self.name.as_str());
        description.insert("unique", self.unique);
        description
    }
}

/// Candidate records for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidates {
    /// A finite superset of the matching records
    Exact(BTreeSet<RecordId>),
    /// No index applies; every record must be scanned
    Unknown,
}

/// An external index store that can answer queries with sets of `_id`s.
///
/// Consulted before the in-memory indexes. Returning `None` defers to them.
pub trait QueryDelegate: Send + Sync + fmt::Debug {
    /// Returns a superset of the `_id`s of documents in `collection` matching `filter`.
    fn candidates(&self, collection: &str, filter: &Filter) -> Option<BTreeSet<Value>>;
}

/// One component of an ordered index key. `None` is the "missing field" key.
type KeyPart = Option<Value>;

#[derive(Debug, Clone)]
enum IndexData {
    Ordered(BTreeMap<Vec<KeyPart>, BTreeSet<RecordId>>),
    /// One token map per indexed field, in key order
    Text(Vec<BTreeMap<String, BTreeSet<RecordId>>>),
}

#[derive(Debug, Clone)]
struct Index {
    spec:     IndexSpec,
    data:     IndexData,
    /// Set once any indexed document holds an array under a key field
    multikey: bool,
}

impl Index {
    fn new(spec: IndexSpec) -> Self {
        let data = if spec.is_text() {
            IndexData::Text(vec![BTreeMap::new(); spec.keys.len()])
        }
        else {
            IndexData::Ordered(BTreeMap::new())
        };
        Self {
            spec,
            data,
            multikey: false,
        }
    }

    fn insert(&mut self, record: RecordId, document: &Document) {
        match self.data {
            IndexData::Ordered(ref mut map) => {
                if !self.multikey &&
                    self.spec
                        .keys
                        .iter()
                        .any(|&(ref path, _)| matches!(document.resolve(path), Resolved::Present(&Value::Array(_))))
                {
                    trace!("Index '{}' is now multikey", self.spec.name);
                    self.multikey = true;
                }
                for key in ordered_keys(&self.spec, document) {
                    map.entry(key).or_default().insert(record);
                }
            },
            IndexData::Text(ref mut fields) => {
                for (map, &(ref path, _)) in fields.iter_mut().zip(&self.spec.keys) {
                    for token in text_tokens(document, path) {
                        map.entry(token).or_default().insert(record);
                    }
                }
            },
        }
    }

    fn remove(&mut self, record: RecordId, document: &Document) {
        match self.data {
            IndexData::Ordered(ref mut map) => {
                for key in ordered_keys(&self.spec, document) {
                    remove_entry(map, &key, record);
                }
            },
            IndexData::Text(ref mut fields) => {
                for (map, &(ref path, _)) in fields.iter_mut().zip(&self.spec.keys) {
                    for token in text_tokens(document, path) {
                        remove_entry(map, &token, record);
                    }
                }
            },
        }
    }

    /// Returns the first key of `document` already held by a record other than `record`.
    fn conflicting_key(&self, record: RecordId, document: &Document) -> Option<Vec<KeyPart>> {
        let IndexData::Ordered(ref map) = self.data
        else {
            return None;
        };
        if !self.spec.unique {
            return None;
        }
        ordered_keys(&self.spec, document).into_iter().find(|key| {
            map.get(key)
                .is_some_and(|records| records.iter().any(|&other| other != record))
        })
    }

    fn describe_key(&self, key: &[KeyPart]) -> String {
        let described: Document = self
            .spec
            .keys
            .iter()
            .zip(key)
            .map(|(&(ref path, _), part)| (path.to_string(), part.clone().unwrap_or_default()))
            .collect();
        described.to_json().to_string()
    }

    /// Answers the conjunction from this ordered index, if its leading fields are constrained.
    fn lookup(&self, conjuncts: &[&Filter]) -> Option<BTreeSet<RecordId>> {
        let IndexData::Ordered(ref map) = self.data
        else {
            return None;
        };

        let mut points: Vec<Vec<Value>> = Vec::new();
        let mut range = None;
        for &(ref path, _) in &self.spec.keys {
            if let Some(values) = equality_points(conjuncts, path) {
                points.push(values);
                continue;
            }
            range = range_bounds(conjuncts, path);
            break;
        }
        // Array elements may satisfy each bound separately.
        if self.multikey {
            range = range.map(RangeBounds::one_sided);
        }
        if points.is_empty() && range.is_none() {
            return None;
        }

        let combinations = points
            .iter()
            .try_fold(1_usize, |acc, values| acc.checked_mul(values.len()))
            .filter(|&n| n <= MAX_POINT_COMBINATIONS)?;
        let mut prefixes: Vec<Vec<KeyPart>> = vec![Vec::new()];
        for values in &points {
            prefixes = prefixes
                .into_iter()
                .flat_map(|prefix| {
                    values.iter().map(move |value| {
                        let mut extended = prefix.clone();
                        extended.push(Some(value.clone()));
                        extended
                    })
                })
                .collect();
        }
        trace!(
            "Index '{}' expands to {} lookup prefixes ({} combinations)",
            self.spec.name,
            prefixes.len(),
            combinations
        );

        let mut found = BTreeSet::new();
        for prefix in prefixes {
            let mut start = prefix.clone();
            if let Some(lower) = range.as_ref().and_then(|r: &RangeBounds| r.lower.as_ref()) {
                start.push(Some(lower.clone()));
            }
            for (key, records) in map.range(start ..) {
                if !key.starts_with(&prefix) {
                    break;
                }
                if let Some(ref bounds) = range {
                    match key.get(prefix.len()) {
                        Some(&Some(ref component)) => {
                            if bounds.beyond_upper(component) {
                                break;
                            }
                            if !bounds.contains(component) {
                                continue;
                            }
                        },
                        _ => continue,
                    }
                }
                found.extend(records.iter().copied());
            }
        }
        Some(found)
    }

    fn text_lookup(&self, terms: &[String]) -> Option<BTreeSet<RecordId>> {
        let IndexData::Text(ref fields) = self.data
        else {
            return None;
        };
        let mut found = BTreeSet::new();
        for map in fields {
            for term in terms {
                if let Some(records) = map.get(term) {
                    found.extend(records.iter().copied());
                }
            }
        }
        Some(found)
    }

    fn prefix_lookup(&self, path: &FieldPath, prefix: &str) -> Option<BTreeSet<RecordId>> {
        let IndexData::Text(ref fields) = self.data
        else {
            return None;
        };
        let position = self.spec.keys.iter().position(|&(ref p, _)| p == path)?;
        let map = fields.get(position)?;
        let found = map
            .range(prefix.to_owned() ..)
            .take_while(|&(token, _)| token.starts_with(prefix))
            .flat_map(|(_, records)| records.iter().copied())
            .collect();
        Some(found)
    }
}

fn remove_entry<K: Ord>(map: &mut BTreeMap<K, BTreeSet<RecordId>>, key: &K, record: RecordId) {
    if let Some(records) = map.get_mut(key) {
        records.remove(&record);
        if records.is_empty() {
            map.remove(key);
        }
    }
}

/// Computes every key a document contributes to an ordered index.
///
/// Arrays contribute one key per element plus the whole array; compound keys take the
/// cartesian product across fields.
fn ordered_keys(spec: &IndexSpec, document: &Document) -> BTreeSet<Vec<KeyPart>> {
    let mut keys: Vec<Vec<KeyPart>> = vec![Vec::new()];
    for &(ref path, _) in &spec.keys {
        let parts: Vec<KeyPart> = match document.resolve(path) {
            Resolved::Absent => vec![None],
            Resolved::Present(&Value::Array(ref items)) => {
                items
                    .iter()
                    .cloned()
                    .map(Some)
                    .chain(std::iter::once(Some(Value::Array(items.clone()))))
                    .collect()
            },
            Resolved::Present(value) => vec![Some(value.clone())],
        };
        keys = keys
            .into_iter()
            .flat_map(|key| {
                parts.iter().map(move |part| {
                    let mut extended = key.clone();
                    extended.push(part.clone());
                    extended
                })
            })
            .collect();
    }
    keys.into_iter().collect()
}

fn text_tokens(document: &Document, path: &FieldPath) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    match document.resolve(path).value() {
        Some(&Value::String(ref s)) => tokens.extend(tokenize(s)),
        Some(&Value::Array(ref items)) => {
            for item in items {
                if let Some(s) = item.as_str() {
                    tokens.extend(tokenize(s));
                }
            }
        },
        _ => {},
    }
    tokens
}

/// Collects the equality points (`$eq`, bare values, `$in`) constraining `path`.
fn equality_points(conjuncts: &[&Filter], path: &FieldPath) -> Option<Vec<Value>> {
    conjuncts.iter().find_map(|clause| {
        let Filter::Field {
            path: ref clause_path,
            ref conditions,
        } = **clause
        else {
            return None;
        };
        if clause_path != path {
            return None;
        }
        conditions.iter().find_map(|condition| {
            match *condition {
                Condition::Eq(ref value) => Some(vec![value.clone()]),
                Condition::In(ref values) => Some(values.clone()),
                _ => None,
            }
        })
    })
}

#[derive(Debug, Clone)]
struct RangeBounds {
    lower:           Option<Value>,
    lower_inclusive: bool,
    upper:           Option<Value>,
    upper_inclusive: bool,
}

impl RangeBounds {
    /// Keeps the lower bound, or the upper one when there is no lower bound.
    fn one_sided(self) -> Self {
        if self.lower.is_some() {
            Self {
                upper:           None,
                upper_inclusive: false,
                ..self
            }
        }
        else {
            self
        }
    }

    fn contains(&self, component: &Value) -> bool {
        let lower_ok = self.lower.as_ref().is_none_or(|lower| {
            compare_same_kind(component, lower).is_some_and(|o| o.is_gt() || (self.lower_inclusive && o.is_eq()))
        });
        let upper_ok = self.upper.as_ref().is_none_or(|upper| {
            compare_same_kind(component, upper).is_some_and(|o| o.is_lt() || (self.upper_inclusive && o.is_eq()))
        });
        lower_ok && upper_ok
    }

    /// True once `component` sorts after every value the upper bound admits.
    fn beyond_upper(&self, component: &Value) -> bool {
        self.upper
            .as_ref()
            .is_some_and(|upper| compare_values(component, upper).is_gt())
    }
}

fn range_bounds(conjuncts: &[&Filter], path: &FieldPath) -> Option<RangeBounds> {
    let mut bounds = RangeBounds {
        lower:           None,
        lower_inclusive: false,
        upper:           None,
        upper_inclusive: false,
    };
    for clause in conjuncts {
        let Filter::Field {
            path: ref clause_path,
            ref conditions,
        } = **clause
        else {
            continue;
        };
        if clause_path != path {
            continue;
        }
        for condition in conditions {
            match *condition {
                Condition::Gt(ref v) if bounds.lower.is_none() => {
                    bounds.lower = Some(v.clone());
                    bounds.lower_inclusive = false;
                },
                Condition::Gte(ref v) if bounds.lower.is_none() => {
                    bounds.lower = Some(v.clone());
                    bounds.lower_inclusive = true;
                },
                Condition::Lt(ref v) if bounds.upper.is_none() => {
                    bounds.upper = Some(v.clone());
                    bounds.upper_inclusive = false;
                },
                Condition::Lte(ref v) if bounds.upper.is_none() => {
                    bounds.upper = Some(v.clone());
                    bounds.upper_inclusive = true;
                },
                _ => {},
            }
        }
    }
    (bounds.lower.is_some() || bounds.upper.is_some()).then_some(bounds)
}

/// Maintains a collection's secondary indexes and plans candidate lookups.
#[derive(Debug, Clone)]
pub struct IndexManager {
    collection: String,
    indexes:    Vec<Index>,
    delegate:   Option<Arc<dyn QueryDelegate>>,
}

impl IndexManager {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            indexes:    Vec::new(),
            delegate:   None,
        }
    }

    /// Installs an external candidate supplier.
    pub fn set_delegate(&mut self, delegate: Option<Arc<dyn QueryDelegate>>) { self.delegate = delegate; }

    /// Builds a new index over `documents`.
    ///
    /// Returns `false` when an identical index already exists.
    ///
    /// # Errors
    ///
    /// - `CorvidError::InvalidArgument` if the name is taken by a different index, the same keys
    ///   are already indexed under another name, or a second text index is requested
    /// - `CorvidError::DuplicateKey` if a unique index cannot be built over existing documents
    pub fn create<'a, I>(&mut self, spec: IndexSpec, documents: I) -> Result<bool>
    where
        I: IntoIterator<Item = (RecordId, &'a Document)>,
    {
        if let Some(existing) = self.indexes.iter().find(|index| index.spec.name == spec.name) {
            if existing.spec == spec {
                return Ok(false);
            }
            return Err(CorvidError::invalid(
                "createIndex",
                format!("an index named '{}' already exists with different keys", spec.name),
            ));
        }
        if let Some(existing) = self.indexes.iter().find(|index| index.spec.keys == spec.keys) {
            return Err(CorvidError::invalid(
                "createIndex",
                format!("the same keys are already indexed as '{}'", existing.spec.name),
            ));
        }
        if spec.is_text() && self.indexes.iter().any(|index| index.spec.is_text()) {
            return Err(CorvidError::invalid(
                "createIndex",
                "a collection may have only one text index",
            ));
        }

        let mut index = Index::new(spec);
        for (record, document) in documents {
            if let Some(key) = index.conflicting_key(record, document) {
                return Err(CorvidError::DuplicateKey {
                    collection: self.collection.clone(),
                    index:      index.spec.name.clone(),
                    key:        index.describe_key(&key),
                });
            }
            index.insert(record, document);
        }
        debug!(
            "Built index '{}' on collection '{}'",
            index.spec.name, self.collection
        );
        self.indexes.push(index);
        Ok(true)
    }

    /// Removes an index by name, returning its spec.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::InvalidArgument` for `_id_` or an unknown name.
    pub fn drop_index(&mut self, name: &str) -> Result<IndexSpec> {
        if name == ID_INDEX_NAME {
            return Err(CorvidError::invalid("dropIndex", "the _id_ index cannot be dropped"));
        }
        let position = self
            .indexes
            .iter()
            .position(|index| index.spec.name == name)
            .ok_or_else(|| CorvidError::invalid("dropIndex", format!("index '{}' not found", name)))?;
        Ok(self.indexes.remove(position).spec)
    }

    /// Lists index specs, the implicit `_id_` index first.
    pub fn specs(&self) -> Vec<IndexSpec> {
        std::iter::once(IndexSpec::id_index())
            .chain(self.indexes.iter().map(|index| index.spec.clone()))
            .collect()
    }

    /// Returns the fields of the text index, if there is one.
    pub fn text_fields(&self) -> Option<Vec<FieldPath>> {
        self.indexes
            .iter()
            .find(|index| index.spec.is_text())
            .map(|index| {
                index
                    .spec
                    .keys
                    .iter()
                    .map(|&(ref path, _)| path.clone())
                    .collect()
            })
    }

    /// Verifies that writing `document` as `record` keeps every unique index unique.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::DuplicateKey` naming the first violated index.
    pub fn check_unique(&self, record: RecordId, document: &Document) -> Result<()> {
        for index in &self.indexes {
            if let Some(key) = index.conflicting_key(record, document) {
                return Err(CorvidError::DuplicateKey {
                    collection: self.collection.clone(),
                    index:      index.spec.name.clone(),
                    key:        index.describe_key(&key),
                });
            }
        }
        Ok(())
    }

    /// Verifies a batch of new documents against unique indexes and against each other.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::DuplicateKey` naming the first violated index.
    pub fn check_unique_batch(&self, documents: &[(RecordId, &Document)]) -> Result<()> {
        for index in self.indexes.iter().filter(|index| index.spec.unique) {
            let mut seen: BTreeSet<Vec<KeyPart>> = BTreeSet::new();
            for &(record, document) in documents {
                if let Some(key) = index.conflicting_key(record, document) {
                    return Err(CorvidError::DuplicateKey {
                        collection: self.collection.clone(),
                        index:      index.spec.name.clone(),
                        key:        index.describe_key(&key),
                    });
                }
                for key in ordered_keys(&index.spec, document) {
                    if seen.contains(&key) {
                        return Err(CorvidError::DuplicateKey {
                            collection: self.collection.clone(),
                            index:      index.spec.name.clone(),
                            key:        index.describe_key(&key),
                        });
                    }
                    seen.insert(key);
                }
            }
        }
        Ok(())
    }

    /// Adds a document to every index.
    pub fn insert(&mut self, record: RecordId, document: &Document) {
        for index in &mut self.indexes {
            index.insert(record, document);
        }
    }

    /// Removes a document from every index.
    pub fn remove(&mut self, record: RecordId, document: &Document) {
        for index in &mut self.indexes {
            index.remove(record, document);
        }
    }

    /// Computes candidate records for `filter`.
    ///
    /// `ids` maps `_id` values to records and answers `_id` equality directly.
    pub fn candidates(&self, filter: &Filter, ids: &BTreeMap<Value, RecordId>) -> Candidates {
        if let Some(ref delegate) = self.delegate &&
            let Some(id_values) = delegate.candidates(&self.collection, filter)
        {
            trace!(
                "Query delegate supplied {} candidate ids for '{}'",
                id_values.len(),
                self.collection
            );
            return Candidates::Exact(
                id_values
                    .iter()
                    .filter_map(|id| ids.get(id).copied())
                    .collect(),
            );
        }

        let conjuncts = filter.conjuncts();
        let mut sets: Vec<(String, BTreeSet<RecordId>)> = Vec::new();

        if let Some(points) = equality_points(&conjuncts, &FieldPath::id()) {
            let records = points
                .iter()
                .filter_map(|id| ids.get(id).copied())
                .collect();
            sets.push((ID_INDEX_NAME.to_owned(), records));
        }

        for index in &self.indexes {
            if index.spec.is_text() {
                for clause in &conjuncts {
                    let found = match **clause {
                        Filter::Text(ref search) => index.text_lookup(search.terms()),
                        Filter::Field {
                            ref path,
                            ref conditions,
                        } => {
                            conditions.iter().find_map(|condition| {
                                match *condition {
                                    Condition::Regex(ref matcher) => {
                                        matcher
                                            .literal_prefix()
                                            .and_then(|prefix| index.prefix_lookup(path, &prefix))
                                    },
                                    _ => None,
                                }
                            })
                        },
                        _ => None,
                    };
                    if let Some(found) = found {
                        sets.push((index.spec.name.clone(), found));
                    }
                }
            }
            else if let Some(found) = index.lookup(&conjuncts) {
                sets.push((index.spec.name.clone(), found));
            }
        }

        let mut sets = sets.into_iter();
        let Some((first_name, first)) = sets.next()
        else {
            return Candidates::Unknown;
        };
        let mut used = vec![first_name];
        let mut candidates = first;
        for (name, set) in sets {
            candidates.retain(|record| set.contains(record));
            used.push(name);
        }
        debug!(
            "Planned query on '{}' using indexes {:?}: {} candidates",
            self.collection,
            used,
            candidates.len()
        );
        Candidates::Exact(candidates)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(json: serde_json::Value) -> Document { Document::from_json(json).unwrap() }

    fn spec(keys: serde_json::Value, unique: bool) -> IndexSpec {
        IndexSpec::parse(
            &doc(keys),
            IndexOptions {
                name: None,
                unique,
            },
        )
        .unwrap()
    }

    fn students() -> Vec<(RecordId, Document)> {
        vec![
            (1, doc(json!({"_id": 1, "student_id": 1001, "name": "Alice Johnson", "major": "Computer Science", "gpa": 3.8, "courses": ["CS101", "MATH201"]}))),
            (2, doc(json!({"_id": 2, "student_id": 1002, "name": "Bob Smith", "major": "Mathematics", "gpa": 3.5, "courses": ["MATH201"]}))),
            (3, doc(json!({"_id": 3, "student_id": 1003, "name": "Carol Davis", "major": "Computer Science", "gpa": 3.9}))),
            (4, doc(json!({"_id": 4, "student_id": 1004, "name": "alan turing", "major": "Physics", "gpa": 3.2}))),
        ]
    }

    fn manager_with(specs: Vec<IndexSpec>) -> (IndexManager, BTreeMap<Value, RecordId>) {
        let data = students();
        let mut manager = IndexManager::new("students");
        for s in specs {
            manager
                .create(s, data.iter().map(|(r, d)| (*r, d)))
                .unwrap();
        }
        let ids = data
            .iter()
            .map(|(r, d)| (d.id().cloned().unwrap(), *r))
            .collect();
        (manager, ids)
    }

    fn exact(candidates: Candidates) -> Vec<RecordId> {
        match candidates {
            Candidates::Exact(set) => set.into_iter().collect(),
            Candidates::Unknown => panic!("expected exact candidates"),
        }
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Alice Johnson"), ["alice", "johnson"]);
        assert!(tokenize("  ,, ").is_empty());
    }

    #[test]
    fn test_spec_names_and_validation() {
        assert_eq!(spec(json!({"student_id": 1}), true).name, "student_id_1");
        assert_eq!(spec(json!({"major": 1, "gpa": -1}), false).name, "major_1_gpa_-1");
        assert_eq!(spec(json!({"name": "text"}), false).name, "name_text");

        for bad in [json!({}), json!({"gpa": 2}), json!({"name": "text", "gpa": 1})] {
            assert!(IndexSpec::parse(&doc(bad), IndexOptions::default()).is_err());
        }
        let named_id = IndexOptions {
            name:   Some("_id_".to_owned()),
            unique: false,
        };
        assert!(IndexSpec::parse(&doc(json!({"a": 1})), named_id).is_err());
    }

    #[test]
    fn test_specs_list_id_first() {
        let (manager, _) = manager_with(vec![spec(json!({"student_id": 1}), true)]);
        let names: Vec<_> = manager.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["_id_", "student_id_1"]);
        assert_eq!(
            manager.specs()[0].to_document().to_json(),
            json!({"key": {"_id": 1}, "name": "_id_", "unique": true})
        );
    }

    #[test]
    fn test_equality_and_in_lookup() {
        let (manager, ids) = manager_with(vec![spec(json!({"major": 1}), false)]);
        let f = Filter::from_json(json!({"major": "Computer Science"})).unwrap();
        assert_eq!(exact(manager.candidates(&f, &ids)), [1, 3]);
        let f = Filter::from_json(json!({"major": {"$in": ["Physics", "Mathematics"]}})).unwrap();
        assert_eq!(exact(manager.candidates(&f, &ids)), [2, 4]);
        let f = Filter::from_json(json!({"gpa": {"$gt": 3}})).unwrap();
        assert_eq!(manager.candidates(&f, &ids), Candidates::Unknown);
    }

    #[test]
    fn test_compound_prefix_and_range() {
        let (manager, ids) = manager_with(vec![spec(json!({"major": 1, "gpa": -1}), false)]);
        let f = Filter::from_json(json!({"major": "Computer Science", "gpa": {"$gte": 3.85}})).unwrap();
        assert_eq!(exact(manager.candidates(&f, &ids)), [3]);
        let f = Filter::from_json(json!({"major": "Computer Science"})).unwrap();
        assert_eq!(exact(manager.candidates(&f, &ids)), [1, 3]);
        // Range on a non-leading field alone cannot use the index
        let f = Filter::from_json(json!({"gpa": {"$gte": 3.85}})).unwrap();
        assert_eq!(manager.candidates(&f, &ids), Candidates::Unknown);
    }

    #[test]
    fn test_single_field_range() {
        let (manager, ids) = manager_with(vec![spec(json!({"gpa": 1}), false)]);
        let f = Filter::from_json(json!({"gpa": {"$gt": 3.4, "$lte": 3.8}})).unwrap();
        assert_eq!(exact(manager.candidates(&f, &ids)), [1, 2]);
        let f = Filter::from_json(json!({"gpa": {"$lt": 3.5}})).unwrap();
        assert_eq!(exact(manager.candidates(&f, &ids)), [4]);
    }

    #[test]
    fn test_multikey_lookup() {
        let (manager, ids) = manager_with(vec![spec(json!({"courses": 1}), false)]);
        let f = Filter::from_json(json!({"courses": "MATH201"})).unwrap();
        assert_eq!(exact(manager.candidates(&f, &ids)), [1, 2]);
        let f = Filter::from_json(json!({"courses": ["MATH201"]})).unwrap();
        assert_eq!(exact(manager.candidates(&f, &ids)), [2]);
    }

    #[test]
    fn test_multikey_range_uses_one_bound() {
        let (manager, ids) = manager_with(vec![spec(json!({"courses": 1}), false)]);
        // Alice's courses satisfy each bound with a different element
        let f = Filter::from_json(json!({"courses": {"$gt": "CS200", "$lt": "CS102"}})).unwrap();
        assert_eq!(exact(manager.candidates(&f, &ids)), [1, 2]);
        let f = Filter::from_json(json!({"courses": {"$lt": "CS102"}})).unwrap();
        assert_eq!(exact(manager.candidates(&f, &ids)), [1]);

        // Scalar-only indexes keep both bounds
        let (manager, ids) = manager_with(vec![spec(json!({"gpa": 1}), false)]);
        let f = Filter::from_json(json!({"gpa": {"$gt": 3.4, "$lt": 3.6}})).unwrap();
        assert_eq!(exact(manager.candidates(&f, &ids)), [2]);
    }

    #[test]
    fn test_text_and_regex_prefix_lookup() {
        let (manager, ids) = manager_with(vec![spec(json!({"name": "text"}), false)]);
        let f = Filter::from_json(json!({"$text": {"$search": "smith davis"}})).unwrap();
        assert_eq!(exact(manager.candidates(&f, &ids)), [2, 3]);
        let f = Filter::from_json(json!({"name": {"$regex": "^A", "$options": "i"}})).unwrap();
        assert_eq!(exact(manager.candidates(&f, &ids)), [1, 4]);
        assert_eq!(
            manager.text_fields().unwrap()[0].as_str(),
            "name"
        );
    }

    #[test]
    fn test_id_lookup_and_intersection() {
        let (manager, ids) = manager_with(vec![spec(json!({"major": 1}), false)]);
        let f = Filter::from_json(json!({"_id": {"$in": [1, 2, 99]}, "major": "Mathematics"})).unwrap();
        assert_eq!(exact(manager.candidates(&f, &ids)), [2]);
    }

    #[test]
    fn test_unique_enforcement() {
        let (mut manager, _) = manager_with(vec![spec(json!({"student_id": 1}), true)]);
        let duplicate = doc(json!({"_id": 9, "student_id": 1002}));
        let err = manager.check_unique(9, &duplicate).unwrap_err();
        assert!(matches!(err, CorvidError::DuplicateKey { ref index, .. } if index == "student_id_1"));
        // A document may keep its own key
        assert!(manager.check_unique(2, &duplicate).is_ok());

        let a = doc(json!({"_id": 10}));
        let b = doc(json!({"_id": 11}));
        assert!(manager.check_unique_batch(&[(10, &a)]).is_ok());
        assert!(manager.check_unique_batch(&[(10, &a), (11, &b)]).is_err());

        manager.insert(10, &a);
        assert!(manager.check_unique(11, &b).is_err());
        manager.remove(10, &a);
        assert!(manager.check_unique(11, &b).is_ok());
    }

    #[test]
    fn test_unique_build_fails_on_existing_duplicates() {
        let data = students();
        let mut manager = IndexManager::new("students");
        let err = manager
            .create(spec(json!({"major": 1}), true), data.iter().map(|(r, d)| (*r, d)))
            .unwrap_err();
        assert!(matches!(err, CorvidError::DuplicateKey { .. }));
        assert_eq!(manager.specs().len(), 1);
    }

    #[test]
    fn test_create_is_idempotent_and_drop() {
        let (mut manager, _) = manager_with(vec![spec(json!({"gpa": 1}), false)]);
        assert!(!manager.create(spec(json!({"gpa": 1}), false), std::iter::empty()).unwrap());
        assert!(manager.create(spec(json!({"gpa": 1}), true), std::iter::empty()).is_err());
        assert!(manager.drop_index("_id_").is_err());
        assert!(manager.drop_index("missing").is_err());
        assert_eq!(manager.drop_index("gpa_1").unwrap().name, "gpa_1");
        assert_eq!(manager.specs().len(), 1);
    }

    #[derive(Debug)]
    struct FixedDelegate;

    impl QueryDelegate for FixedDelegate {
        fn candidates(&self, _collection: &str, _filter: &Filter) -> Option<BTreeSet<Value>> {
            Some([Value::Int(3)].into_iter().collect())
        }
    }

    #[test]
    fn test_delegate_is_consulted_first() {
        let (mut manager, ids) = manager_with(vec![]);
        manager.set_delegate(Some(Arc::new(FixedDelegate)));
        let f = Filter::from_json(json!({"major": "Physics"})).unwrap();
        assert_eq!(exact(manager.candidates(&f, &ids)), [3]);
    }
}
