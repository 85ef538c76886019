//! Predicate evaluation: compiles filter documents into matchers over one document.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use tracing::trace;

use crate::{
    comparison::compare_same_kind,
    document::Resolved,
    index::tokenize,
    CorvidError,
    Document,
    FieldPath,
    Result,
    Value,
    ValueKind,
};

/// A compiled filter.
///
/// Filters are parsed once from a filter document and then evaluated against any number of
/// documents. Evaluation is pure: the same filter and document always give the same answer.
///
/// A filter document conjoins its top-level pairs; `{}` (an empty conjunction) matches every
/// document, `{"$or": []}` matches none and `{"$nor": []}` matches every document.
///
/// # Example
///
/// ```rust
/// use corvid_db::{Document, Filter};
/// use serde_json::json;
///
/// let filter = Filter::from_json(json!({"gpa": {"$gt": 3.5}, "major": "Computer Science"})).unwrap();
/// let alice = Document::from_json(json!({"name": "Alice", "gpa": 3.8, "major": "Computer Science"})).unwrap();
/// assert!(filter.matches(&alice));
/// ```
#[derive(Debug, Clone)]
pub enum Filter {
    /// Every child must match
    And(Vec<Self>),
    /// At least one child must match
    Or(Vec<Self>),
    /// No child may match
    Nor(Vec<Self>),
    /// All conditions hold for the value at `path`
    Field {
        path:       FieldPath,
        conditions: Vec<Condition>,
    },
    /// Full-text token search over the collection's text-indexed fields
    Text(TextSearch),
}

/// A single operator applied to the value resolved at a field path.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Deep equality; arrays also match when any element is equal
    Eq(Value),
    /// Negated equality; true when the field is absent
    Ne(Value),
    /// Same-kind greater than
    Gt(Value),
    /// Same-kind greater than or equal
    Gte(Value),
    /// Same-kind less than
    Lt(Value),
    /// Same-kind less than or equal
    Lte(Value),
    /// Equality with any operand
    In(Vec<Value>),
    /// Negated `In`; true when the field is absent
    Nin(Vec<Value>),
    /// Array contains every operand
    All(Vec<Value>),
    /// Field presence (null counts as present)
    Exists(bool),
    /// Runtime kind is one of the listed kinds
    Type(Vec<TypeToken>),
    /// String value (or any string element) matches the pattern
    Regex(RegexMatcher),
    /// Array length equals the operand
    Size(usize),
    /// None of the inner conditions all hold
    Not(Vec<Self>),
}

/// A `$type` operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeToken {
    Null,
    Bool,
    Number,
    Int,
    Double,
    String,
    Date,
    Array,
    Object,
}

impl TypeToken {
    fn parse(operand: &Value) -> Result<Self> {
        let token = match *operand {
            Value::String(ref name) => {
                match name.as_str() {
                    "null" => Self::Null,
                    "bool" | "boolean" => Self::Bool,
                    "number" => Self::Number,
                    "int" | "long" => Self::Int,
                    "double" => Self::Double,
                    "string" => Self::String,
                    "date" | "timestamp" => Self::Date,
                    "array" => Self::Array,
                    "object" => Self::Object,
                    _ => return Err(CorvidError::invalid("$type", format!("unknown type name '{}'", name))),
                }
            },
            Value::Int(_) | Value::Float(_) => {
                match operand.as_i64() {
                    Some(1) => Self::Double,
                    Some(2) => Self::String,
                    Some(3) => Self::Object,
                    Some(4) => Self::Array,
                    Some(8) => Self::Bool,
                    Some(9) => Self::Date,
                    Some(10) => Self::Null,
                    Some(16 | 18) => Self::Int,
                    _ => return Err(CorvidError::invalid("$type", format!("unknown type code {}", operand))),
                }
            },
            ref other => {
                return Err(CorvidError::invalid(
                    "$type",
                    format!("expected a type name or code, found {}", other.kind()),
                ))
            },
        };
        Ok(token)
    }

    /// Returns true if `value` has this kind.
    pub const fn matches(self, value: &Value) -> bool {
        matches!(
            (self, value.kind()),
            (Self::Null, ValueKind::Null) |
                (Self::Bool, ValueKind::Bool) |
                (Self::Number, ValueKind::Int | ValueKind::Float) |
                (Self::Int, ValueKind::Int) |
                (Self::Double, ValueKind::Float) |
                (Self::String, ValueKind::String) |
                (Self::Date, ValueKind::Timestamp) |
                (Self::Array, ValueKind::Array) |
                (Self::Object, ValueKind::Document)
        )
    }
}

/// A compiled `$regex` with its `$options`.
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    pattern: String,
    options: String,
    regex:   Regex,
}

impl RegexMatcher {
    /// Compiles a pattern with option letters `i`, `m`, `s` and `x`.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::InvalidArgument` for an unsupported option letter or a pattern
    /// that does not compile.
    pub fn new(pattern: &str, options: &str) -> Result<Self> {
        let mut builder = RegexBuilder::new(pattern);
        for flag in options.chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                other => return Err(CorvidError::invalid("$regex", format!("unsupported option '{}'", other))),
            };
        }
        let regex = builder
            .build()
            .map_err(|e| CorvidError::invalid("$regex", e.to_string()))?;
        Ok(Self {
            pattern: pattern.to_owned(),
            options: options.to_owned(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str { &self.pattern }

    pub fn options(&self) -> &str { &self.options }

    pub fn is_match(&self, text: &str) -> bool { self.regex.is_match(text) }

    fn matches_value(&self, value: &Value) -> bool {
        match *value {
            Value::String(ref s) => self.is_match(s),
            Value::Array(ref items) => {
                items
                    .iter()
                    .any(|item| item.as_str().is_some_and(|s| self.is_match(s)))
            },
            _ => false,
        }
    }

    /// Returns the lowercase literal prefix every match must start with, when the pattern is
    /// anchored with `^` and followed by plain ASCII letters or digits.
    ///
    /// Used by text indexes to narrow candidates for patterns like `^Ali`.
    pub fn literal_prefix(&self) -> Option<String> {
        if self.pattern.contains('|') {
            return None;
        }
        let rest = self.pattern.strip_prefix('^')?;
        let mut prefix: String = rest
            .chars()
            .take_while(char::is_ascii_alphanumeric)
            .collect();
        // A quantifier makes the last literal character optional
        if matches!(rest.chars().nth(prefix.len()), Some('?' | '*' | '{')) {
            prefix.pop();
        }
        if prefix.is_empty() {
            None
        }
        else {
            Some(prefix.to_ascii_lowercase())
        }
    }
}

/// A `$text` search: the query tokens plus the fields bound from the collection's text index.
#[derive(Debug, Clone)]
pub struct TextSearch {
    search: String,
    terms:  Vec<String>,
    fields: Vec<FieldPath>,
}

impl TextSearch {
    fn parse(operand: &Value) -> Result<Self> {
        let Some(spec) = operand.as_document()
        else {
            return Err(CorvidError::invalid("$text", "expected a document with $search"));
        };
        let mut search = None;
        for (key, value) in spec.iter() {
            match key {
                "$search" => {
                    search = Some(
                        value
                            .as_str()
                            .ok_or_else(|| CorvidError::invalid("$text", "$search must be a string"))?
                            .to_owned(),
                    );
                },
                other => return Err(CorvidError::unknown_operator("$text", other)),
            }
        }
        let search = search.ok_or_else(|| CorvidError::invalid("$text", "missing $search"))?;
        let mut terms = tokenize(&search);
        terms.sort_unstable();
        terms.dedup();
        Ok(Self {
            search,
            terms,
            fields: Vec::new(),
        })
    }

    /// The raw search string.
    pub fn search(&self) -> &str { &self.search }

    /// The distinct lowercase search tokens.
    pub fn terms(&self) -> &[String] { &self.terms }

    /// The fields searched; empty until bound to a text index.
    pub fn fields(&self) -> &[FieldPath] { &self.fields }

    fn matches(&self, document: &Document) -> bool {
        if self.terms.is_empty() {
            return false;
        }
        let mut strings = Vec::new();
        if self.fields.is_empty() {
            for (_, value) in document.iter() {
                collect_strings(value, true, &mut strings);
            }
        }
        else {
            for field in &self.fields {
                if let Some(value) = document.resolve(field).value() {
                    collect_strings(value, false, &mut strings);
                }
            }
        }
        strings.iter().any(|text| {
            tokenize(text)
                .iter()
                .any(|token| self.terms.binary_search(token).is_ok())
        })
    }
}

/// Collects a string value and the strings inside an array (or, when `deep`, nested documents).
fn collect_strings<'a>(value: &'a Value, deep: bool, out: &mut Vec<&'a str>) {
    match *value {
        Value::String(ref s) => out.push(s),
        Value::Array(ref items) => {
            for item in items {
                collect_strings(item, deep, out);
            }
        },
        Value::Document(ref doc) if deep => {
            for (_, nested) in doc.iter() {
                collect_strings(nested, deep, out);
            }
        },
        _ => {},
    }
}

impl Filter {
    /// Compiles a filter document.
    ///
    /// # Errors
    ///
    /// - `CorvidError::UnknownOperator` for an unsupported `$`-operator
    /// - `CorvidError::InvalidArgument` for malformed operands (`$in` without an array, a bad
    ///   regex, `$options` without `$regex`, ...)
    /// - `CorvidError::InvalidPath` for malformed field paths
    pub fn parse(spec: &Document) -> Result<Self> {
        trace!("Compiling filter with {} top-level clauses", spec.len());
        let mut clauses = Vec::with_capacity(spec.len());
        for (key, operand) in spec.iter() {
            let clause = match key {
                "$and" => Self::And(parse_clause_list(key, operand)?),
                "$or" => Self::Or(parse_clause_list(key, operand)?),
                "$nor" => Self::Nor(parse_clause_list(key, operand)?),
                "$text" => Self::Text(TextSearch::parse(operand)?),
                other if other.starts_with('$') => return Err(CorvidError::unknown_operator("filter", other)),
                field => parse_field(FieldPath::parse(field)?, operand)?,
            };
            clauses.push(clause);
        }
        Ok(Self::And(clauses))
    }

    /// Compiles a filter from a JSON object.
    ///
    /// # Errors
    ///
    /// As [`Filter::parse`], plus `CorvidError::InvalidArgument` if `json` is not an object.
    pub fn from_json(json: serde_json::Value) -> Result<Self> { Self::parse(&Document::from_json(json)?) }

    /// A filter that matches every document.
    pub const fn all() -> Self { Self::And(Vec::new()) }

    /// Evaluates the filter against one document.
    pub fn matches(&self, document: &Document) -> bool {
        match *self {
            Self::And(ref children) => children.iter().all(|child| child.matches(document)),
            Self::Or(ref children) => children.iter().any(|child| child.matches(document)),
            Self::Nor(ref children) => !children.iter().any(|child| child.matches(document)),
            Self::Field {
                ref path,
                ref conditions,
            } => {
                let resolved = document.resolve(path);
                conditions
                    .iter()
                    .all(|condition| condition.matches(resolved))
            },
            Self::Text(ref search) => search.matches(document),
        }
    }

    /// Returns the top-level conjuncts, flattening nested `$and`s.
    pub fn conjuncts(&self) -> Vec<&Self> {
        match *self {
            Self::And(ref children) => children.iter().flat_map(Self::conjuncts).collect(),
            _ => vec![self],
        }
    }

    /// Returns true if the filter contains a `$text` clause anywhere.
    pub fn has_text(&self) -> bool {
        match *self {
            Self::And(ref children) | Self::Or(ref children) | Self::Nor(ref children) => {
                children.iter().any(Self::has_text)
            },
            Self::Field {
                ..
            } => false,
            Self::Text(_) => true,
        }
    }

    /// Returns the first `$text` clause among the top-level conjuncts.
    pub fn text_search(&self) -> Option<&TextSearch> {
        self.conjuncts().into_iter().find_map(|clause| {
            match *clause {
                Self::Text(ref search) => Some(search),
                _ => None,
            }
        })
    }

    /// Binds every `$text` clause to the given text-indexed fields.
    pub fn bind_text_fields(&mut self, fields: &[FieldPath]) {
        match *self {
            Self::And(ref mut children) | Self::Or(ref mut children) | Self::Nor(ref mut children) => {
                for child in children {
                    child.bind_text_fields(fields);
                }
            },
            Self::Field {
                ..
            } => {},
            Self::Text(ref mut search) => search.fields = fields.to_vec(),
        }
    }

    /// Builds the seed document for an upsert from the top-level equality constraints.
    ///
    /// Equalities nested in a top-level `$and` are included; dotted paths become nested
    /// fields.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::TypeMismatch` when two equalities conflict structurally
    /// (`{"a": 1, "a.b": 2}`).
    pub fn equality_seed(&self) -> Result<Document> {
        let mut seed = Document::new();
        for clause in self.conjuncts() {
            if let Self::Field {
                ref path,
                ref conditions,
            } = *clause
            {
                for condition in conditions {
                    if let Condition::Eq(ref value) = *condition {
                        seed.set_path(path, value.clone(), "upsert")?;
                    }
                }
            }
        }
        Ok(seed)
    }
}

/// Compiles `spec` and evaluates it against `document` in one call.
///
/// # Errors
///
/// Returns any error [`Filter::parse`] returns.
pub fn matches(document: &Document, spec: &Document) -> Result<bool> { Ok(Filter::parse(spec)?.matches(document)) }

fn parse_clause_list(operator: &str, operand: &Value) -> Result<Vec<Filter>> {
    let Some(items) = operand.as_array()
    else {
        return Err(CorvidError::invalid(operator, "expected an array of filter documents"));
    };
    items
        .iter()
        .map(|item| {
            item.as_document()
                .ok_or_else(|| CorvidError::invalid(operator, "expected an array of filter documents"))
                .and_then(Filter::parse)
        })
        .collect()
}

/// Returns true if a nested document is an operator document (`{"$gt": 1}`) rather than a
/// literal document to compare against.
fn is_operator_document(path: &FieldPath, doc: &Document) -> Result<bool> {
    let operators = doc.keys().filter(|k| k.starts_with('$')).count();
    if operators == 0 {
        return Ok(false);
    }
    if operators != doc.len() {
        return Err(CorvidError::invalid(
            "filter",
            format!("field '{}' mixes operators and plain fields", path),
        ));
    }
    Ok(true)
}

fn parse_field(path: FieldPath, operand: &Value) -> Result<Filter> {
    let conditions = match *operand {
        Value::Document(ref doc) if is_operator_document(&path, doc)? => parse_conditions(doc)?,
        _ => vec![Condition::Eq(operand.clone())],
    };
    Ok(Filter::Field {
        path,
        conditions,
    })
}

fn array_operand(operator: &str, operand: &Value) -> Result<Vec<Value>> {
    operand
        .as_array()
        .cloned()
        .ok_or_else(|| CorvidError::invalid(operator, format!("expected an array, found {}", operand.kind())))
}

pub(crate) fn parse_conditions(ops: &Document) -> Result<Vec<Condition>> {
    let options = match ops.get("$options") {
        Some(value) => {
            Some(
                value
                    .as_str()
                    .ok_or_else(|| CorvidError::invalid("$options", "expected a string"))?,
            )
        },
        None => None,
    };
    if options.is_some() && !ops.contains_key("$regex") {
        return Err(CorvidError::invalid("$options", "$options requires $regex"));
    }

    let mut conditions = Vec::with_capacity(ops.len());
    for (operator, operand) in ops.iter() {
        let condition = match operator {
            "$eq" => Condition::Eq(operand.clone()),
            "$ne" => Condition::Ne(operand.clone()),
            "$gt" => Condition::Gt(operand.clone()),
            "$gte" => Condition::Gte(operand.clone()),
            "$lt" => Condition::Lt(operand.clone()),
            "$lte" => Condition::Lte(operand.clone()),
            "$in" => Condition::In(array_operand(operator, operand)?),
            "$nin" => Condition::Nin(array_operand(operator, operand)?),
            "$all" => Condition::All(array_operand(operator, operand)?),
            "$exists" => {
                Condition::Exists(
                    operand
                        .as_flag()
                        .ok_or_else(|| CorvidError::invalid(operator, "expected a boolean or number"))?,
                )
            },
            "$type" => {
                let tokens = match *operand {
                    Value::Array(ref items) if items.is_empty() => {
                        return Err(CorvidError::invalid(operator, "expected at least one type"));
                    },
                    Value::Array(ref items) => items.iter().map(TypeToken::parse).collect::<Result<_>>()?,
                    _ => vec![TypeToken::parse(operand)?],
                };
                Condition::Type(tokens)
            },
            "$regex" => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| CorvidError::invalid(operator, "expected a string pattern"))?;
                Condition::Regex(RegexMatcher::new(pattern, options.unwrap_or_default())?)
            },
            "$options" => continue,
            "$size" => {
                let size = operand
                    .as_i64()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| CorvidError::invalid(operator, "expected a non-negative integer"))?;
                Condition::Size(size)
            },
            "$not" => {
                match *operand {
                    Value::Document(ref inner) if !inner.is_empty() && inner.keys().all(|k| k.starts_with('$')) => {
                        Condition::Not(parse_conditions(inner)?)
                    },
                    _ => return Err(CorvidError::invalid(operator, "expected an operator document")),
                }
            },
            other => return Err(CorvidError::unknown_operator("filter", other)),
        };
        conditions.push(condition);
    }
    Ok(conditions)
}

impl Condition {
    /// Evaluates the condition against a resolved field.
    pub fn matches(&self, resolved: Resolved<'_>) -> bool {
        match *self {
            Self::Eq(ref operand) => equals(resolved, operand),
            Self::Ne(ref operand) => !equals(resolved, operand),
            Self::Gt(ref operand) => compares(resolved, operand, Ordering::is_gt),
            Self::Gte(ref operand) => compares(resolved, operand, Ordering::is_ge),
            Self::Lt(ref operand) => compares(resolved, operand, Ordering::is_lt),
            Self::Lte(ref operand) => compares(resolved, operand, Ordering::is_le),
            Self::In(ref operands) => operands.iter().any(|operand| equals(resolved, operand)),
            Self::Nin(ref operands) => !operands.iter().any(|operand| equals(resolved, operand)),
            Self::All(ref operands) => !operands.is_empty() && operands.iter().all(|operand| equals(resolved, operand)),
            Self::Exists(expected) => resolved.is_present() == expected,
            Self::Type(ref tokens) => {
                resolved
                    .value()
                    .is_some_and(|value| tokens.iter().any(|token| token.matches(value)))
            },
            Self::Regex(ref matcher) => resolved.value().is_some_and(|value| matcher.matches_value(value)),
            Self::Size(size) => {
                resolved
                    .value()
                    .and_then(Value::as_array)
                    .is_some_and(|items| items.len() == size)
            },
            Self::Not(ref conditions) => !conditions.iter().all(|condition| condition.matches(resolved)),
        }
    }
}

fn equals(resolved: Resolved<'_>, operand: &Value) -> bool {
    let Some(value) = resolved.value()
    else {
        return false;
    };
    value == operand ||
        value
            .as_array()
            .is_some_and(|items| items.iter().any(|item| item == operand))
}

fn compares(resolved: Resolved<'_>, operand: &Value, accept: fn(Ordering) -> bool) -> bool {
    let Some(value) = resolved.value()
    else {
        return false;
    };
    let test = |candidate: &Value| compare_same_kind(candidate, operand).is_some_and(accept);
    test(value) ||
        value
            .as_array()
            .is_some_and(|items| items.iter().any(test))
}
