//! Document projection utilities.

use crate::{constants::ID_FIELD, CorvidError, Document, FieldPath, Result, Value};

/// Whether a projection lists the fields to keep or the fields to drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionMode {
    Include,
    Exclude,
}

#[derive(Debug, Clone)]
enum Node {
    /// The whole field is selected
    Leaf,
    /// Only some nested fields are selected
    Branch(Vec<(String, Self)>),
}

/// A compiled projection (`{"name": 1, "gpa": 1, "_id": 0}` or `{"courses": 0}`).
///
/// `_id` is kept unless explicitly excluded, in either mode. Inclusion keeps the
/// document's own field order.
#[derive(Debug, Clone)]
pub struct Projection {
    mode:       ProjectionMode,
    tree:       Vec<(String, Node)>,
    include_id: bool,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            mode:       ProjectionMode::Exclude,
            tree:       Vec::new(),
            include_id: true,
        }
    }
}

impl Projection {
    /// Compiles a projection document. Values are flags: `1`/`true` include, `0`/`false`
    /// exclude.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::InvalidArgument` for non-flag values, for mixing inclusion and
    /// exclusion (other than `_id`), or for overlapping paths; `CorvidError::InvalidPath` for
    /// malformed paths.
    ///
    /// # Example
    ///
    /// ```rust
    /// use corvid_db::{Document, Projection};
    /// use serde_json::json;
    ///
    /// let spec = Document::from_json(json!({"name": 1, "gpa": 1, "_id": 0})).unwrap();
    /// let projection = Projection::parse(&spec).unwrap();
    /// let alice = Document::from_json(json!({"_id": 1, "name": "Alice", "gpa": 3.8, "major": "CS"})).unwrap();
    /// assert_eq!(projection.apply(&alice).to_json(), json!({"name": "Alice", "gpa": 3.8}));
    /// ```
    pub fn parse(spec: &Document) -> Result<Self> {
        let mut mode = None;
        let mut include_id = true;
        let mut paths = Vec::new();
        for (field, value) in spec.iter() {
            let flag = value.as_flag().ok_or_else(|| {
                CorvidError::invalid(
                    "projection",
                    format!("value for '{}' must be 0, 1, true or false", field),
                )
            })?;
            if field == ID_FIELD {
                include_id = flag;
                continue;
            }
            let field_mode = if flag {
                ProjectionMode::Include
            }
            else {
                ProjectionMode::Exclude
            };
            match mode {
                Some(existing) if existing != field_mode => {
                    return Err(CorvidError::invalid(
                        "projection",
                        "cannot mix inclusion and exclusion",
                    ));
                },
                _ => mode = Some(field_mode),
            }
            paths.push(FieldPath::parse(field)?);
        }
        // `{_id: 0}` alone drops only the id
        let mode = mode.unwrap_or(ProjectionMode::Exclude);
        Self::from_paths(mode, &paths, include_id)
    }

    /// Builds a projection from already parsed paths.
    pub(crate) fn from_paths(mode: ProjectionMode, paths: &[FieldPath], include_id: bool) -> Result<Self> {
        for (i, path) in paths.iter().enumerate() {
            if let Some(other) = paths.iter().skip(i + 1).find(|other| other.conflicts_with(path)) {
                return Err(CorvidError::invalid(
                    "projection",
                    format!("path '{}' collides with '{}'", path, other),
                ));
            }
        }
        let mut tree = Vec::new();
        for path in paths {
            insert_path(&mut tree, path.segments());
        }
        Ok(Self {
            mode,
            tree,
            include_id,
        })
    }

    pub const fn mode(&self) -> ProjectionMode { self.mode }

    /// Returns true if the projection returns documents unchanged.
    pub fn is_identity(&self) -> bool { self.mode == ProjectionMode::Exclude && self.tree.is_empty() && self.include_id }

    /// Projects one document.
    pub fn apply(&self, document: &Document) -> Document {
        if self.is_identity() {
            return document.clone();
        }
        match self.mode {
            ProjectionMode::Include => include(document, &self.tree, self.include_id),
            ProjectionMode::Exclude => {
                let mut projected = exclude(document, &self.tree);
                if !self.include_id {
                    projected.remove(ID_FIELD);
                }
                projected
            },
        }
    }
}

fn insert_path(tree: &mut Vec<(String, Node)>, segments: &[String]) {
    let Some((head, rest)) = segments.split_first()
    else {
        return;
    };
    let position = match tree.iter().position(|(k, _)| k == head) {
        Some(position) => position,
        None => {
            tree.push((head.clone(), Node::Branch(Vec::new())));
            tree.len() - 1
        },
    };
    if rest.is_empty() {
        tree[position].1 = Node::Leaf;
    }
    else if let Node::Branch(ref mut children) = tree[position].1 {
        insert_path(children, rest);
    }
}

fn lookup<'a>(tree: &'a [(String, Node)], key: &str) -> Option<&'a Node> {
    tree.iter()
        .find(|(k, _)| k == key)
        .map(|(_, node)| node)
}

fn include(document: &Document, tree: &[(String, Node)], keep_id: bool) -> Document {
    let mut projected = Document::new();
    for (key, value) in document.iter() {
        match lookup(tree, key) {
            None if keep_id && key == ID_FIELD => {
                projected.insert(key, value.clone());
            },
            None => {},
            Some(&Node::Leaf) => {
                projected.insert(key, value.clone());
            },
            Some(&Node::Branch(ref children)) => {
                match *value {
                    Value::Document(ref nested) => {
                        projected.insert(key, include(nested, children, false));
                    },
                    Value::Array(ref items) => {
                        let kept: Vec<Value> = items
                            .iter()
                            .filter_map(|item| item.as_document().map(|d| Value::Document(include(d, children, false))))
                            .collect();
                        projected.insert(key, kept);
                    },
                    _ => {},
                }
            },
        }
    }
    projected
}

fn exclude(document: &Document, tree: &[(String, Node)]) -> Document {
    let mut projected = Document::new();
    for (key, value) in document.iter() {
        match lookup(tree, key) {
            None => {
                projected.insert(key, value.clone());
            },
            Some(&Node::Leaf) => {},
            Some(&Node::Branch(ref children)) => {
                let kept = match *value {
                    Value::Document(ref nested) => Value::Document(exclude(nested, children)),
                    Value::Array(ref items) => {
                        Value::Array(
                            items
                                .iter()
                                .map(|item| {
                                    match *item {
                                        Value::Document(ref d) => Value::Document(exclude(d, children)),
                                        ref other => other.clone(),
                                    }
                                })
                                .collect(),
                        )
                    },
                    ref other => other.clone(),
                };
                projected.insert(key, kept);
            },
        }
    }
    projected
}
