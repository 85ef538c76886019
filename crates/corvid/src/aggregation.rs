//! Aggregation pipelines: ordered stages run over a snapshot of a collection.

use std::{collections::BTreeMap, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    comparison::compare_values,
    constants::ID_FIELD,
    projection::{Projection, ProjectionMode},
    query::SortSpec,
    CorvidError,
    Document,
    FieldPath,
    Filter,
    Result,
    Value,
};

/// A computed value: a field reference (`"$gpa"`), a literal, or an operator expression.
#[derive(Debug, Clone)]
pub enum Expression {
    /// `"$path"`
    Field(FieldPath),
    /// A constant (also produced by `$literal`)
    Literal(Value),
    /// A document whose fields are expressions
    Document(Vec<(String, Self)>),
    /// An array whose elements are expressions
    Array(Vec<Self>),
    /// `$size`: array length
    Size(Box<Self>),
    /// `$add`
    Add(Vec<Self>),
    /// `$subtract`
    Subtract(Box<Self>, Box<Self>),
    /// `$multiply`
    Multiply(Vec<Self>),
    /// `$divide`
    Divide(Box<Self>, Box<Self>),
    /// `$concat`
    Concat(Vec<Self>),
    /// `$toUpper`
    ToUpper(Box<Self>),
    /// `$toLower`
    ToLower(Box<Self>),
}

fn expression_args(operand: &Value) -> Result<Vec<Expression>> {
    match *operand {
        Value::Array(ref items) => items.iter().map(Expression::parse).collect(),
        _ => Ok(vec![Expression::parse(operand)?]),
    }
}

fn expression_pair(operator: &str, operand: &Value) -> Result<(Box<Expression>, Box<Expression>)> {
    let mut args = expression_args(operand)?.into_iter();
    match (args.next(), args.next(), args.next()) {
        (Some(left), Some(right), None) => Ok((Box::new(left), Box::new(right))),
        _ => Err(CorvidError::invalid(operator, "expected exactly two arguments")),
    }
}

fn expression_single(operator: &str, operand: &Value) -> Result<Box<Expression>> {
    let mut args = expression_args(operand)?.into_iter();
    match (args.next(), args.next()) {
        (Some(arg), None) => Ok(Box::new(arg)),
        _ => Err(CorvidError::invalid(operator, "expected exactly one argument")),
    }
}

impl Expression {
    /// Parses an expression.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::UnknownOperator` for unsupported expression operators and
    /// `CorvidError::InvalidArgument` for wrong argument counts.
    pub fn parse(value: &Value) -> Result<Self> {
        match *value {
            Value::String(ref s) if s.starts_with("$$") => Err(CorvidError::unknown_operator("expression", s)),
            Value::String(ref s) if s.starts_with('$') => Ok(Self::Field(FieldPath::parse(&s[1 ..])?)),
            Value::Array(ref items) => Ok(Self::Array(items.iter().map(Self::parse).collect::<Result<_>>()?)),
            Value::Document(ref doc) => {
                let mut fields = doc.iter();
                match (fields.next(), fields.next()) {
                    (Some((operator, operand)), None) if operator.starts_with('$') => {
                        Self::parse_operator(operator, operand)
                    },
                    _ => {
                        if let Some(key) = doc.keys().find(|k| k.starts_with('$')) {
                            return Err(CorvidError::invalid(
                                "expression",
                                format!("operator '{}' must be the only field of its document", key),
                            ));
                        }
                        Ok(Self::Document(
                            doc.iter()
                                .map(|(k, v)| Ok((k.to_owned(), Self::parse(v)?)))
                                .collect::<Result<_>>()?,
                        ))
                    },
                }
            },
            ref literal => Ok(Self::Literal(literal.clone())),
        }
    }

    fn parse_operator(operator: &str, operand: &Value) -> Result<Self> {
        let expression = match operator {
            "$literal" => Self::Literal(operand.clone()),
            "$size" => Self::Size(expression_single(operator, operand)?),
            "$add" => Self::Add(expression_args(operand)?),
            "$multiply" => Self::Multiply(expression_args(operand)?),
            "$concat" => Self::Concat(expression_args(operand)?),
            "$subtract" => {
                let (left, right) = expression_pair(operator, operand)?;
                Self::Subtract(left, right)
            },
            "$divide" => {
                let (left, right) = expression_pair(operator, operand)?;
                Self::Divide(left, right)
            },
            "$toUpper" => Self::ToUpper(expression_single(operator, operand)?),
            "$toLower" => Self::ToLower(expression_single(operator, operand)?),
            other => return Err(CorvidError::unknown_operator("expression", other)),
        };
        Ok(expression)
    }

    fn describe(&self) -> String {
        match *self {
            Self::Field(ref path) => path.to_string(),
            Self::Literal(ref value) => value.to_string(),
            Self::Document(_) => "document".to_owned(),
            Self::Array(_) => "array".to_owned(),
            Self::Size(_) => "$size".to_owned(),
            Self::Add(_) => "$add".to_owned(),
            Self::Subtract(..) => "$subtract".to_owned(),
            Self::Multiply(_) => "$multiply".to_owned(),
            Self::Divide(..) => "$divide".to_owned(),
            Self::Concat(_) => "$concat".to_owned(),
            Self::ToUpper(_) => "$toUpper".to_owned(),
            Self::ToLower(_) => "$toLower".to_owned(),
        }
    }

    /// Evaluates the expression against a document. `None` means the value is absent.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::TypeMismatch` when an operator receives the wrong kind (for
    /// example `$size` of a non-array) and `CorvidError::InvalidArgument` on division by zero.
    pub fn evaluate(&self, document: &Document) -> Result<Option<Value>> {
        let value = match *self {
            Self::Field(ref path) => return Ok(document.resolve(path).value().cloned()),
            Self::Literal(ref value) => value.clone(),
            Self::Document(ref fields) => {
                let mut built = Document::new();
                for &(ref key, ref expression) in fields {
                    if let Some(value) = expression.evaluate(document)? {
                        built.insert(key.as_str(), value);
                    }
                }
                Value::Document(built)
            },
            Self::Array(ref items) => {
                Value::Array(
                    items
                        .iter()
                        .map(|item| Ok(item.evaluate(document)?.unwrap_or_default()))
                        .collect::<Result<_>>()?,
                )
            },
            Self::Size(ref arg) => {
                match arg.evaluate(document)? {
                    Some(Value::Array(items)) => Value::Int(i64::try_from(items.len()).unwrap_or(i64::MAX)),
                    other => return Err(operand_mismatch("$size", arg, "array", other.as_ref())),
                }
            },
            Self::Add(ref args) => fold_numbers("$add", args, document, Value::Int(0), |a, b| a.checked_add(b), |a, b| a + b)?,
            Self::Multiply(ref args) => {
                fold_numbers("$multiply", args, document, Value::Int(1), |a, b| a.checked_mul(b), |a, b| a * b)?
            },
            Self::Subtract(ref left, ref right) => {
                match (left.evaluate(document)?, right.evaluate(document)?) {
                    (Some(l), Some(r)) if l.is_number() && r.is_number() => {
                        numeric(&l, &r, |a, b| a.checked_sub(b), |a, b| a - b)
                    },
                    (None | Some(Value::Null), _) | (_, None | Some(Value::Null)) => Value::Null,
                    (Some(l), Some(r)) => {
                        let culprit = if l.is_number() { &r } else { &l };
                        return Err(CorvidError::TypeMismatch {
                            operation: "$subtract".to_owned(),
                            field:     self.describe(),
                            expected:  "number".to_owned(),
                            found:     culprit.kind().to_string(),
                        });
                    },
                }
            },
            Self::Divide(ref left, ref right) => {
                match (left.evaluate(document)?, right.evaluate(document)?) {
                    (None | Some(Value::Null), _) | (_, None | Some(Value::Null)) => Value::Null,
                    (Some(l), Some(r)) => {
                        let (Some(dividend), Some(divisor)) = (l.as_f64(), r.as_f64())
                        else {
                            let culprit = if l.is_number() { &r } else { &l };
                            return Err(CorvidError::TypeMismatch {
                                operation: "$divide".to_owned(),
                                field:     self.describe(),
                                expected:  "number".to_owned(),
                                found:     culprit.kind().to_string(),
                            });
                        };
                        if divisor == 0.0 {
                            return Err(CorvidError::invalid("$divide", "division by zero"));
                        }
                        Value::Float(dividend / divisor)
                    },
                }
            },
            Self::Concat(ref args) => {
                let mut joined = String::new();
                for arg in args {
                    match arg.evaluate(document)? {
                        None | Some(Value::Null) => return Ok(Some(Value::Null)),
                        Some(Value::String(s)) => joined.push_str(&s),
                        Some(other) => return Err(operand_mismatch("$concat", arg, "string", Some(&other))),
                    }
                }
                Value::String(joined)
            },
            Self::ToUpper(ref arg) | Self::ToLower(ref arg) => {
                let upper = matches!(*self, Self::ToUpper(_));
                match arg.evaluate(document)? {
                    None | Some(Value::Null) => Value::String(String::new()),
                    Some(Value::String(s)) if upper => Value::String(s.to_uppercase()),
                    Some(Value::String(s)) => Value::String(s.to_lowercase()),
                    Some(other) => {
                        let operation = if upper { "$toUpper" } else { "$toLower" };
                        return Err(operand_mismatch(operation, arg, "string", Some(&other)));
                    },
                }
            },
        };
        Ok(Some(value))
    }
}

fn operand_mismatch(operation: &str, arg: &Expression, expected: &str, found: Option<&Value>) -> CorvidError {
    CorvidError::TypeMismatch {
        operation: operation.to_owned(),
        field:     arg.describe(),
        expected:  expected.to_owned(),
        found:     found.map_or_else(|| "missing".to_owned(), |v| v.kind().to_string()),
    }
}

fn numeric(left: &Value, right: &Value, int_op: fn(i64, i64) -> Option<i64>, float_op: fn(f64, f64) -> f64) -> Value {
    match (left, right) {
        (&Value::Int(a), &Value::Int(b)) => {
            int_op(a, b).map_or_else(|| Value::Float(float_op(a as f64, b as f64)), Value::Int)
        },
        _ => Value::Float(float_op(left.as_f64().unwrap_or(0.0), right.as_f64().unwrap_or(0.0))),
    }
}

fn fold_numbers(
    operation: &str,
    args: &[Expression],
    document: &Document,
    identity: Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    let mut total = identity;
    for arg in args {
        match arg.evaluate(document)? {
            None | Some(Value::Null) => return Ok(Value::Null),
            Some(value) if value.is_number() => total = numeric(&total, &value, int_op, float_op),
            Some(other) => return Err(operand_mismatch(operation, arg, "number", Some(&other))),
        }
    }
    Ok(total)
}

/// A `$group` accumulator operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorOp {
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
    Push,
    AddToSet,
    Count,
}

#[derive(Debug, Clone)]
struct Accumulator {
    field:      String,
    op:         AccumulatorOp,
    expression: Expression,
}

/// Running state of one accumulator for one group.
#[derive(Debug, Clone)]
enum AccumulatorState {
    Sum(Value),
    Avg { total: f64, count: usize },
    Extremum(Option<Value>),
    First(Option<Value>),
    Last(Value),
    Values(Vec<Value>),
    Count(i64),
}

impl AccumulatorState {
    const fn new(op: AccumulatorOp) -> Self {
        match op {
            AccumulatorOp::Sum => Self::Sum(Value::Int(0)),
            AccumulatorOp::Avg => {
                Self::Avg {
                    total: 0.0,
                    count: 0,
                }
            },
            AccumulatorOp::Min | AccumulatorOp::Max => Self::Extremum(None),
            AccumulatorOp::First => Self::First(None),
            AccumulatorOp::Last => Self::Last(Value::Null),
            AccumulatorOp::Push | AccumulatorOp::AddToSet => Self::Values(Vec::new()),
            AccumulatorOp::Count => Self::Count(0),
        }
    }

    fn accumulate(&mut self, op: AccumulatorOp, value: Option<Value>) {
        match *self {
            Self::Sum(ref mut total) => {
                if let Some(value) = value.filter(Value::is_number) {
                    *total = numeric(total, &value, i64::checked_add, |a, b| a + b);
                }
            },
            Self::Avg {
                ref mut total,
                ref mut count,
            } => {
                if let Some(n) = value.as_ref().and_then(Value::as_f64) {
                    *total += n;
                    *count += 1;
                }
            },
            Self::Extremum(ref mut current) => {
                let Some(value) = value.filter(|v| !v.is_null())
                else {
                    return;
                };
                let replace = current.as_ref().is_none_or(|existing| {
                    let ordering = compare_values(&value, existing);
                    if op == AccumulatorOp::Min {
                        ordering.is_lt()
                    }
                    else {
                        ordering.is_gt()
                    }
                });
                if replace {
                    *current = Some(value);
                }
            },
            Self::First(ref mut first) => {
                if first.is_none() {
                    *first = Some(value.unwrap_or_default());
                }
            },
            Self::Last(ref mut last) => *last = value.unwrap_or_default(),
            Self::Values(ref mut values) => {
                if let Some(value) = value &&
                    (op == AccumulatorOp::Push || !values.contains(&value))
                {
                    values.push(value);
                }
            },
            Self::Count(ref mut count) => *count = count.saturating_add(1),
        }
    }

    fn finish(self) -> Value {
        match self {
            Self::Sum(total) => total,
            Self::Avg {
                total,
                count,
            } => {
                if count == 0 {
                    Value::Null
                }
                else {
                    Value::Float(total / count as f64)
                }
            },
            Self::Extremum(value) | Self::First(value) => value.unwrap_or_default(),
            Self::Last(value) => value,
            Self::Values(values) => Value::Array(values),
            Self::Count(count) => Value::Int(count),
        }
    }
}

/// A parsed `$group` stage.
#[derive(Debug, Clone)]
pub struct GroupStage {
    key:          Expression,
    accumulators: Vec<Accumulator>,
}

impl GroupStage {
    fn parse(spec: &Value) -> Result<Self> {
        let Some(spec) = spec.as_document()
        else {
            return Err(CorvidError::invalid("$group", "expected a document"));
        };
        let key = spec
            .get(ID_FIELD)
            .ok_or_else(|| CorvidError::invalid("$group", "a group specification must include _id"))?;
        let key = Expression::parse(key)?;

        let mut accumulators = Vec::new();
        for (field, operand) in spec.iter().filter(|&(k, _)| k != ID_FIELD) {
            if field.contains('.') || field.starts_with('$') {
                return Err(CorvidError::invalid(
                    "$group",
                    format!("invalid output field name '{}'", field),
                ));
            }
            let mut entries = operand.as_document().map(|d| d.iter()).into_iter().flatten();
            let (Some((name, argument)), None) = (entries.next(), entries.next())
            else {
                return Err(CorvidError::invalid(
                    "$group",
                    format!("field '{}' must be a single accumulator", field),
                ));
            };
            let op = match name {
                "$sum" => AccumulatorOp::Sum,
                "$avg" => AccumulatorOp::Avg,
                "$min" => AccumulatorOp::Min,
                "$max" => AccumulatorOp::Max,
                "$first" => AccumulatorOp::First,
                "$last" => AccumulatorOp::Last,
                "$push" => AccumulatorOp::Push,
                "$addToSet" => AccumulatorOp::AddToSet,
                "$count" => AccumulatorOp::Count,
                other => return Err(CorvidError::unknown_operator("$group", other)),
            };
            let expression = if op == AccumulatorOp::Count {
                Expression::Literal(Value::Null)
            }
            else {
                Expression::parse(argument)?
            };
            accumulators.push(Accumulator {
                field: field.to_owned(),
                op,
                expression,
            });
        }
        Ok(Self {
            key,
            accumulators,
        })
    }

    fn run(&self, documents: &[Arc<Document>]) -> Result<Vec<Arc<Document>>> {
        let mut positions: BTreeMap<Value, usize> = BTreeMap::new();
        let mut groups: Vec<(Value, Vec<AccumulatorState>)> = Vec::new();
        for document in documents {
            let key = self.key.evaluate(document)?.unwrap_or_default();
            let position = match positions.get(&key) {
                Some(&position) => position,
                None => {
                    let states = self
                        .accumulators
                        .iter()
                        .map(|acc| AccumulatorState::new(acc.op))
                        .collect();
                    groups.push((key.clone(), states));
                    positions.insert(key, groups.len() - 1);
                    groups.len() - 1
                },
            };
            for (accumulator, state) in self.accumulators.iter().zip(&mut groups[position].1) {
                let value = accumulator.expression.evaluate(document)?;
                state.accumulate(accumulator.op, value);
            }
        }
        trace!("$group produced {} groups", groups.len());
        Ok(groups
            .into_iter()
            .map(|(key, states)| {
                let mut output = Document::new();
                output.insert(ID_FIELD, key);
                for (accumulator, state) in self.accumulators.iter().zip(states) {
                    output.insert(accumulator.field.as_str(), state.finish());
                }
                Arc::new(output)
            })
            .collect())
    }
}

/// A parsed `$project` stage: an inclusion or exclusion projection plus computed fields.
#[derive(Debug, Clone)]
pub struct ProjectStage {
    projection: Projection,
    computed:   Vec<(FieldPath, Expression)>,
}

impl ProjectStage {
    fn parse(spec: &Value) -> Result<Self> {
        let Some(spec) = spec.as_document()
        else {
            return Err(CorvidError::invalid("$project", "expected a document"));
        };
        let mut include_id = true;
        let mut included = Vec::new();
        let mut excluded = Vec::new();
        let mut computed = Vec::new();
        for (field, value) in spec.iter() {
            let path = FieldPath::parse(field)?;
            let flag = match *value {
                Value::Bool(_) | Value::Int(_) | Value::Float(_) => value.as_flag(),
                _ => None,
            };
            match flag {
                Some(flag) if field == ID_FIELD => include_id = flag,
                Some(true) => included.push(path),
                Some(false) => excluded.push(path),
                None => computed.push((path, Expression::parse(value)?)),
            }
        }
        if !excluded.is_empty() && (!included.is_empty() || !computed.is_empty()) {
            return Err(CorvidError::invalid(
                "$project",
                "cannot mix exclusion with inclusion or computed fields",
            ));
        }
        let projection = if excluded.is_empty() && (!included.is_empty() || !computed.is_empty()) {
            Projection::from_paths(ProjectionMode::Include, &included, include_id)?
        }
        else {
            Projection::from_paths(ProjectionMode::Exclude, &excluded, include_id)?
        };
        Ok(Self {
            projection,
            computed,
        })
    }

    fn run(&self, documents: Vec<Arc<Document>>) -> Result<Vec<Arc<Document>>> {
        documents
            .into_iter()
            .map(|document| {
                let mut projected = self.projection.apply(&document);
                for &(ref path, ref expression) in &self.computed {
                    if let Some(value) = expression.evaluate(&document)? {
                        projected.set_path(path, value, "$project")?;
                    }
                }
                Ok(Arc::new(projected))
            })
            .collect()
    }
}

/// One pipeline stage.
#[derive(Debug, Clone)]
pub enum Stage {
    Match(Filter),
    Group(GroupStage),
    Project(ProjectStage),
    Sort(SortSpec),
    Skip(usize),
    Limit(usize),
    Count(String),
}

fn stage_count(stage: &str, operand: &Value, allow_zero: bool) -> Result<usize> {
    operand
        .as_i64()
        .and_then(|n| usize::try_from(n).ok())
        .filter(|&n| allow_zero || n > 0)
        .ok_or_else(|| CorvidError::invalid(stage, format!("expected a non-negative integer, found {}", operand)))
}

impl Stage {
    fn parse(spec: &Document) -> Result<Self> {
        let mut entries = spec.iter();
        let (Some((name, operand)), None) = (entries.next(), entries.next())
        else {
            return Err(CorvidError::invalid(
                "aggregate",
                "each stage must be a document with exactly one field",
            ));
        };
        let stage = match name {
            "$match" => {
                let filter = operand
                    .as_document()
                    .ok_or_else(|| CorvidError::invalid(name, "expected a filter document"))?;
                Self::Match(Filter::parse(filter)?)
            },
            "$group" => Self::Group(GroupStage::parse(operand)?),
            "$project" => Self::Project(ProjectStage::parse(operand)?),
            "$sort" => {
                let sort = operand
                    .as_document()
                    .ok_or_else(|| CorvidError::invalid(name, "expected a sort document"))?;
                if sort.is_empty() {
                    return Err(CorvidError::invalid(name, "sort document cannot be empty"));
                }
                Self::Sort(SortSpec::parse(sort)?)
            },
            "$skip" => Self::Skip(stage_count(name, operand, true)?),
            "$limit" => Self::Limit(stage_count(name, operand, false)?),
            "$count" => {
                let field = operand.as_str().unwrap_or_default();
                if field.is_empty() || field.starts_with('$') || field.contains('.') {
                    return Err(CorvidError::invalid(
                        name,
                        "expected a non-empty field name without '$' or '.'",
                    ));
                }
                Self::Count(field.to_owned())
            },
            other => {
                return Err(CorvidError::UnsupportedStage {
                    stage: other.to_owned(),
                })
            },
        };
        Ok(stage)
    }

    /// The stage operator name.
    pub const fn name(&self) -> &'static str {
        match *self {
            Self::Match(_) => "$match",
            Self::Group(_) => "$group",
            Self::Project(_) => "$project",
            Self::Sort(_) => "$sort",
            Self::Skip(_) => "$skip",
            Self::Limit(_) => "$limit",
            Self::Count(_) => "$count",
        }
    }

    fn run(&self, documents: Vec<Arc<Document>>) -> Result<Vec<Arc<Document>>> {
        match *self {
            Self::Match(ref filter) => {
                Ok(documents
                    .into_iter()
                    .filter(|document| filter.matches(document))
                    .collect())
            },
            Self::Group(ref group) => group.run(&documents),
            Self::Project(ref project) => project.run(documents),
            Self::Sort(ref sort) => {
                let mut documents = documents;
                sort.sort(&mut documents);
                Ok(documents)
            },
            Self::Skip(n) => Ok(documents.into_iter().skip(n).collect()),
            Self::Limit(n) => Ok(documents.into_iter().take(n).collect()),
            Self::Count(ref field) => {
                if documents.is_empty() {
                    return Ok(Vec::new());
                }
                let mut output = Document::new();
                output.insert(
                    field.as_str(),
                    Value::Int(i64::try_from(documents.len()).unwrap_or(i64::MAX)),
                );
                Ok(vec![Arc::new(output)])
            },
        }
    }
}

/// A compiled aggregation pipeline.
///
/// # Example
///
/// ```rust
/// use corvid_db::{Document, Pipeline};
/// use serde_json::json;
///
/// let stages = [
///     json!({"$group": {"_id": "$major", "avg_gpa": {"$avg": "$gpa"}}}),
///     json!({"$sort": {"avg_gpa": -1}}),
/// ];
/// let stages: Vec<Document> = stages.into_iter().map(Document::from_json).collect::<Result<_, _>>().unwrap();
/// let pipeline = Pipeline::parse(&stages).unwrap();
/// assert_eq!(pipeline.stages().len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Compiles a list of stage documents.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::UnsupportedStage` for unknown stage operators, and the parse errors
    /// of each stage's own specification.
    pub fn parse(stages: &[Document]) -> Result<Self> {
        Ok(Self {
            stages: stages.iter().map(Stage::parse).collect::<Result<_>>()?,
        })
    }

    pub fn stages(&self) -> &[Stage] { &self.stages }

    /// Returns true if a `$match` stage uses `$text`.
    pub fn has_text(&self) -> bool {
        self.stages.iter().any(|stage| {
            match *stage {
                Stage::Match(ref filter) => filter.has_text(),
                _ => false,
            }
        })
    }

    /// Binds `$text` clauses in `$match` stages to the collection's text-indexed fields.
    pub fn bind_text_fields(&mut self, fields: &[FieldPath]) {
        for stage in &mut self.stages {
            if let Stage::Match(ref mut filter) = *stage {
                filter.bind_text_fields(fields);
            }
        }
    }

    /// Runs the pipeline over a snapshot, checking `cancel` before every stage.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::Cancelled` naming the stage that was about to run when the token
    /// is cancelled, or the first evaluation error of any stage.
    pub async fn run(&self, documents: Vec<Arc<Document>>, cancel: &CancellationToken) -> Result<Vec<Document>> {
        let mut current = documents;
        for stage in &self.stages {
            if cancel.is_cancelled() {
                debug!("Aggregation cancelled before {}", stage.name());
                return Err(CorvidError::Cancelled {
                    stage: stage.name().to_owned(),
                });
            }
            let input = current.len();
            current = stage.run(current)?;
            trace!("{} consumed {} documents, produced {}", stage.name(), input, current.len());
            tokio::task::yield_now().await;
        }
        Ok(current.into_iter().map(Arc::unwrap_or_clone).collect())
    }
}
