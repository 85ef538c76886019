//! Update application: compiles update documents and applies them to produce new document
//! versions.

use tracing::trace;

use crate::{
    constants::ID_FIELD,
    document::Resolved,
    filter::{parse_conditions, Condition},
    CorvidError,
    Document,
    FieldPath,
    Result,
    Value,
};

/// A compiled update: either a list of field operators or a full replacement body.
#[derive(Debug, Clone)]
pub enum UpdateSpec {
    /// `{"$set": {...}, "$inc": {...}, ...}`
    Operators(Vec<UpdateOp>),
    /// A plain document replacing everything except `_id`
    Replacement(Document),
}

/// A single field-level update operator.
#[derive(Debug, Clone)]
pub enum UpdateOp {
    /// Overwrite the field, creating intermediate documents
    Set {
        path:  FieldPath,
        value: Value,
    },
    /// Remove the field
    Unset {
        path: FieldPath,
    },
    /// Add a numeric delta
    Inc {
        path:  FieldPath,
        delta: Value,
    },
    /// Append one or more values to an array
    Push {
        path:   FieldPath,
        values: Vec<Value>,
    },
    /// Remove matching elements from an array
    Pull {
        path:      FieldPath,
        criterion: PullCriterion,
    },
}

impl UpdateOp {
    /// The path the operator writes to.
    pub const fn path(&self) -> &FieldPath {
        match *self {
            Self::Set {
                ref path, ..
            } |
            Self::Unset {
                ref path,
            } |
            Self::Inc {
                ref path, ..
            } |
            Self::Push {
                ref path, ..
            } |
            Self::Pull {
                ref path, ..
            } => path,
        }
    }
}

/// What `$pull` removes: elements deep-equal to a value, or elements satisfying operator
/// conditions (`{"$lt": 50}`).
#[derive(Debug, Clone)]
pub enum PullCriterion {
    Equal(Value),
    Conditions(Vec<Condition>),
}

impl PullCriterion {
    fn removes(&self, element: &Value) -> bool {
        match *self {
            Self::Equal(ref value) => element == value,
            Self::Conditions(ref conditions) => {
                conditions
                    .iter()
                    .all(|condition| condition.matches(Resolved::Present(element)))
            },
        }
    }
}

fn operand_document<'a>(operator: &str, operand: &'a Value) -> Result<&'a Document> {
    operand.as_document().ok_or_else(|| {
        CorvidError::invalid(
            operator,
            format!("expected a document of fields, found {}", operand.kind()),
        )
    })
}

fn parse_push_values(operand: &Value) -> Result<Vec<Value>> {
    let Some(modifiers) = operand.as_document()
    else {
        return Ok(vec![operand.clone()]);
    };
    if !modifiers.keys().any(|k| k.starts_with('$')) {
        return Ok(vec![operand.clone()]);
    }
    let mut values = None;
    for (key, value) in modifiers.iter() {
        match key {
            "$each" => {
                values = Some(
                    value
                        .as_array()
                        .cloned()
                        .ok_or_else(|| CorvidError::invalid("$push", "$each expects an array"))?,
                );
            },
            other => return Err(CorvidError::unknown_operator("$push", other)),
        }
    }
    values.ok_or_else(|| CorvidError::invalid("$push", "missing $each"))
}

fn parse_pull_criterion(operand: &Value) -> Result<PullCriterion> {
    match *operand {
        Value::Document(ref doc) if !doc.is_empty() && doc.keys().all(|k| k.starts_with('$')) => {
            Ok(PullCriterion::Conditions(parse_conditions(doc)?))
        },
        _ => Ok(PullCriterion::Equal(operand.clone())),
    }
}

impl UpdateSpec {
    /// Compiles an update document.
    ///
    /// A document whose keys all start with `$` is an operator update; a document with no
    /// `$` keys is a replacement.
    ///
    /// # Errors
    ///
    /// - `CorvidError::UnknownOperator` for operators other than `$set`, `$unset`, `$inc`,
    ///   `$push` and `$pull`
    /// - `CorvidError::InvalidArgument` for an empty update, for mixing operators with plain
    ///   fields, or for two operators writing overlapping paths
    /// - `CorvidError::TypeMismatch` for a non-numeric `$inc` delta
    /// - `CorvidError::InvalidPath` for malformed paths
    ///
    /// # Example
    ///
    /// ```rust
    /// use corvid_db::{Document, UpdateSpec};
    /// use serde_json::json;
    ///
    /// let update = UpdateSpec::from_json(json!({"$set": {"gpa": 3.9}, "$push": {"courses": "CS401"}})).unwrap();
    /// let alice = Document::from_json(json!({"_id": 1, "gpa": 3.8, "courses": ["CS101"]})).unwrap();
    /// let updated = update.apply(&alice).unwrap();
    /// assert_eq!(updated.to_json(), json!({"_id": 1, "gpa": 3.9, "courses": ["CS101", "CS401"]}));
    /// ```
    pub fn parse(spec: &Document) -> Result<Self> {
        if spec.is_empty() {
            return Err(CorvidError::invalid("update", "update document is empty"));
        }
        let operators = spec.keys().filter(|k| k.starts_with('$')).count();
        if operators == 0 {
            return Ok(Self::Replacement(spec.clone()));
        }
        if operators != spec.len() {
            return Err(CorvidError::invalid(
                "update",
                "update document mixes operators and plain fields",
            ));
        }

        let mut ops: Vec<UpdateOp> = Vec::new();
        for (operator, operand) in spec.iter() {
            let fields = match operator {
                "$set" | "$unset" | "$inc" | "$push" | "$pull" => operand_document(operator, operand)?,
                other => return Err(CorvidError::unknown_operator("update", other)),
            };
            for (field, value) in fields.iter() {
                let path = FieldPath::parse(field)?;
                if let Some(existing) = ops.iter().find(|op| op.path().conflicts_with(&path)) {
                    return Err(CorvidError::invalid(
                        "update",
                        format!("'{}' conflicts with '{}'", path, existing.path()),
                    ));
                }
                let op = match operator {
                    "$set" => {
                        UpdateOp::Set {
                            path,
                            value: value.clone(),
                        }
                    },
                    "$unset" => {
                        UpdateOp::Unset {
                            path,
                        }
                    },
                    "$inc" => {
                        if !value.is_number() {
                            return Err(CorvidError::TypeMismatch {
                                operation: "$inc".to_owned(),
                                field:     path.to_string(),
                                expected:  "number".to_owned(),
                                found:     value.kind().to_string(),
                            });
                        }
                        UpdateOp::Inc {
                            path,
                            delta: value.clone(),
                        }
                    },
                    "$push" => {
                        UpdateOp::Push {
                            path,
                            values: parse_push_values(value)?,
                        }
                    },
                    _ => {
                        UpdateOp::Pull {
                            path,
                            criterion: parse_pull_criterion(value)?,
                        }
                    },
                };
                ops.push(op);
            }
        }
        trace!("Compiled update with {} operators", ops.len());
        Ok(Self::Operators(ops))
    }

    /// Compiles an update from a JSON object.
    ///
    /// # Errors
    ///
    /// As [`UpdateSpec::parse`], plus `CorvidError::InvalidArgument` if `json` is not an object.
    pub fn from_json(json: serde_json::Value) -> Result<Self> { Self::parse(&Document::from_json(json)?) }

    /// Builds a full-replacement update.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::InvalidArgument` if the body has `$`-prefixed top-level keys.
    pub fn replacement(body: Document) -> Result<Self> {
        if let Some(key) = body.keys().find(|k| k.starts_with('$')) {
            return Err(CorvidError::invalid(
                "replace",
                format!("replacement documents cannot contain operator '{}'", key),
            ));
        }
        Ok(Self::Replacement(body))
    }

    /// Returns true for full-replacement updates.
    pub const fn is_replacement(&self) -> bool { matches!(*self, Self::Replacement(_)) }

    /// Applies the update, returning the new document version. The input is not modified.
    ///
    /// # Errors
    ///
    /// - `CorvidError::ImmutableField` if the update would change an existing `_id`
    /// - `CorvidError::TypeMismatch` when an operator meets a value of the wrong kind
    pub fn apply(&self, document: &Document) -> Result<Document> {
        let updated = match *self {
            Self::Replacement(ref body) => replace_body(document, body)?,
            Self::Operators(ref ops) => {
                let mut updated = document.clone();
                for op in ops {
                    apply_op(&mut updated, op)?;
                }
                updated
            },
        };
        if let Some(original) = document.id() &&
            !updated.id().is_some_and(|id| same_id(id, original))
        {
            return Err(CorvidError::ImmutableField {
                field: ID_FIELD.to_owned(),
            });
        }
        Ok(updated)
    }

    /// Builds the document an upsert inserts from the filter's equality `seed`.
    ///
    /// Operators apply to the seed. A replacement body is laid over the seed, so the inserted
    /// document still satisfies the filter's equalities.
    ///
    /// # Errors
    ///
    /// As [`UpdateSpec::apply`]; a body `_id` that differs from the seed's is `ImmutableField`.
    pub fn apply_upsert(&self, seed: &Document) -> Result<Document> {
        let Self::Replacement(ref body) = *self
        else {
            return self.apply(seed);
        };
        let mut merged = seed.clone();
        match (seed.id(), body.id()) {
            (Some(current), Some(requested)) if !same_id(current, requested) => {
                return Err(CorvidError::ImmutableField {
                    field: ID_FIELD.to_owned(),
                });
            },
            (None, Some(id)) => merged.set_id_first(id.clone()),
            _ => {},
        }
        for (key, value) in body.iter().filter(|&(k, _)| k != ID_FIELD) {
            merged.insert(key, value.clone());
        }
        Ok(merged)
    }
}

/// Identifiers compare by their exact rendering, so `1` and `1.0` are different ids.
fn same_id(a: &Value, b: &Value) -> bool { a.to_json() == b.to_json() }

/// Applies `spec` to `document` in one call.
///
/// # Errors
///
/// Returns any error [`UpdateSpec::parse`] or [`UpdateSpec::apply`] returns.
pub fn apply(document: &Document, spec: &Document) -> Result<Document> { UpdateSpec::parse(spec)?.apply(document) }

fn replace_body(document: &Document, body: &Document) -> Result<Document> {
    let mut replaced = Document::new();
    match (document.id(), body.id()) {
        (Some(current), Some(requested)) if !same_id(current, requested) => {
            return Err(CorvidError::ImmutableField {
                field: ID_FIELD.to_owned(),
            });
        },
        (Some(id), _) | (None, Some(id)) => {
            replaced.insert(ID_FIELD, id.clone());
        },
        (None, None) => {},
    }
    for (key, value) in body.iter().filter(|&(k, _)| k != ID_FIELD) {
        replaced.insert(key, value.clone());
    }
    Ok(replaced)
}

fn mismatch(operation: &str, path: &FieldPath, expected: &str, found: &Value) -> CorvidError {
    CorvidError::TypeMismatch {
        operation: operation.to_owned(),
        field:     path.to_string(),
        expected:  expected.to_owned(),
        found:     found.kind().to_string(),
    }
}

fn add_numbers(current: &Value, delta: &Value) -> Option<Value> {
    match (current, delta) {
        (&Value::Int(a), &Value::Int(b)) => {
            Some(
                a.checked_add(b)
                    .map_or_else(|| Value::Float(a as f64 + b as f64), Value::Int),
            )
        },
        _ => Some(Value::Float(current.as_f64()? + delta.as_f64()?)),
    }
}

fn apply_op(document: &mut Document, op: &UpdateOp) -> Result<()> {
    match *op {
        UpdateOp::Set {
            ref path,
            ref value,
        } => document.set_path(path, value.clone(), "$set"),
        UpdateOp::Unset {
            ref path,
        } => {
            document.remove_path(path);
            Ok(())
        },
        UpdateOp::Inc {
            ref path,
            ref delta,
        } => {
            let next = match document.resolve(path) {
                Resolved::Absent => delta.clone(),
                Resolved::Present(current) => {
                    add_numbers(current, delta).ok_or_else(|| mismatch("$inc", path, "number", current))?
                },
            };
            document.set_path(path, next, "$inc")
        },
        UpdateOp::Push {
            ref path,
            ref values,
        } => {
            let next = match document.resolve(path) {
                Resolved::Absent => values.clone(),
                Resolved::Present(Value::Array(items)) => items.iter().chain(values).cloned().collect(),
                Resolved::Present(current) => return Err(mismatch("$push", path, "array", current)),
            };
            document.set_path(path, Value::Array(next), "$push")
        },
        UpdateOp::Pull {
            ref path,
            ref criterion,
        } => {
            let next: Vec<Value> = match document.resolve(path) {
                Resolved::Absent => return Ok(()),
                Resolved::Present(Value::Array(items)) => {
                    items
                        .iter()
                        .filter(|item| !criterion.removes(item))
                        .cloned()
                        .collect()
                },
                Resolved::Present(current) => return Err(mismatch("$pull", path, "array", current)),
            };
            document.set_path(path, Value::Array(next), "$pull")
        },
    }
}
