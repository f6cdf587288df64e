//! Stack files
//!
//! A stack file names an app and lists the resources to declare:
//!
//! ```toml
//! app = "website"
//!
//! [[resources]]
//! kind = "directory"
//! id = "public"
//! props = { path = "/srv/www", files = { "index.html" = "<h1>hi</h1>" } }
//!
//! [[resources]]
//! kind = "file"
//! id = "env"
//! group = "deploy"
//! [resources.props]
//! path = "${public.path}/.env"
//! content = { secret_env = "DEPLOY_ENV" }
//! mode = "600"
//! ```
//!
//! `${id.field}` embeds another resource's output. A string that is
//! exactly one reference keeps the referenced value's JSON type; anything
//! else is concatenated into a string. `{ secret_env = "VAR" }` reads a
//! secret from the environment.

use declarative::{Input, Resource, Scope};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

/// `${<id>.<field>[.<field>...]}`
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^.{}\s]+)\.([^{}\s]+)\}").expect("reference pattern is valid")
});

const SECRET_ENV_KEY: &str = "secret_env";

/// Problems found in a stack file before anything is applied
#[derive(Error, Debug)]
pub enum StackError {
    #[error("could not read stack file {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid stack file {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("resource #{index} has an empty {field}")]
    Empty { index: usize, field: &'static str },

    #[error("resource id '{0}' may not contain '.', braces or whitespace")]
    InvalidId(String),

    #[error("resource id '{0}' is declared more than once")]
    DuplicateId(String),

    #[error("group '{0}' has the same name as an ungrouped resource")]
    GroupClash(String),

    #[error("'{resource}' references unknown resource '{target}'")]
    UnknownReference { resource: String, target: String },

    #[error("reference cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("props of '{resource}' cannot be converted to JSON")]
    Props {
        resource: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("'{resource}' needs a secret from ${var}, which is not set")]
    MissingSecret { resource: String, var: String },

    #[error(transparent)]
    Engine(#[from] declarative::Error),
}

/// On-disk shape of a stack file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackFile {
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
}

/// One `[[resources]]` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceDecl {
    pub kind: String,
    pub id: String,
    /// Child scope to declare the resource in
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub props: toml::Table,
}

/// A validated stack, with its declaration order
#[derive(Debug, Clone)]
pub struct Stack {
    path: PathBuf,
    file: StackFile,
    order: Vec<usize>,
}

impl Stack {
    pub fn load(path: &Path) -> Result<Self, StackError> {
        let content = fs::read_to_string(path).map_err(|source| StackError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Parse and validate stack text; `path` is only used in messages
    pub fn parse(content: &str, path: &Path) -> Result<Self, StackError> {
        let file: StackFile = toml::from_str(content).map_err(|source| StackError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let order = declaration_order(&file.resources)?;
        log::debug!(
            "Loaded {} resource(s) from {}",
            file.resources.len(),
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            file,
            order,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn app(&self) -> Option<&str> {
        self.file.app.as_deref()
    }

    /// Resources in file order
    pub fn resources(&self) -> &[ResourceDecl] {
        &self.file.resources
    }

    /// Resources in the order they will be declared
    pub fn ordered(&self) -> impl Iterator<Item = &ResourceDecl> {
        self.order.iter().map(|&i| &self.file.resources[i])
    }

    /// Declare every resource in `scope`, reading secrets from the environment
    pub fn declare(&self, scope: &Scope) -> Result<Vec<Resource>, StackError> {
        self.declare_with(scope, |var| std::env::var(var).ok())
    }

    /// Declare every resource in `scope`
    ///
    /// Returns handles in file order. Nothing is applied here; the
    /// caller finalizes the root scope.
    pub fn declare_with(
        &self,
        scope: &Scope,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Vec<Resource>, StackError> {
        let mut declared: HashMap<&str, Resource> = HashMap::new();

        for decl in self.ordered() {
            let props = serde_json::to_value(&decl.props).map_err(|source| StackError::Props {
                resource: decl.id.clone(),
                source,
            })?;
            let input = to_input(&decl.id, &props, &declared, &env)?;

            let target = match &decl.group {
                Some(group) => scope.child(group)?,
                None => scope.clone(),
            };
            let resource = target.declare(&decl.kind, &decl.id, input)?;
            declared.insert(decl.id.as_str(), resource);
        }

        Ok(self
            .file
            .resources
            .iter()
            .filter_map(|decl| declared.get(decl.id.as_str()).cloned())
            .collect())
    }
}

// ============================================================================
// Validation and Ordering
// ============================================================================

fn validate(resources: &[ResourceDecl]) -> Result<HashMap<&str, usize>, StackError> {
    let mut index = HashMap::new();
    for (i, decl) in resources.iter().enumerate() {
        if decl.kind.trim().is_empty() {
            return Err(StackError::Empty {
                index: i + 1,
                field: "kind",
            });
        }
        if decl.id.trim().is_empty() {
            return Err(StackError::Empty {
                index: i + 1,
                field: "id",
            });
        }
        if decl
            .id
            .chars()
            .any(|c| c == '.' || c == '{' || c == '}' || c.is_whitespace())
        {
            return Err(StackError::InvalidId(decl.id.clone()));
        }
        if index.insert(decl.id.as_str(), i).is_some() {
            return Err(StackError::DuplicateId(decl.id.clone()));
        }
    }

    // An ungrouped resource's nested scope lives under its id
    for group in resources.iter().filter_map(|decl| decl.group.as_deref()) {
        if index
            .get(group)
            .is_some_and(|&owner| resources[owner].group.is_none())
        {
            return Err(StackError::GroupClash(group.to_string()));
        }
    }
    Ok(index)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Depth-first topological order; producers come before their consumers
fn declaration_order(resources: &[ResourceDecl]) -> Result<Vec<usize>, StackError> {
    let index = validate(resources)?;

    let mut deps = Vec::with_capacity(resources.len());
    for decl in resources {
        let mut ids = Vec::new();
        for value in decl.props.values() {
            collect_references(value, &mut ids);
        }
        let mut edges = Vec::with_capacity(ids.len());
        for id in ids {
            let &target = index
                .get(id.as_str())
                .ok_or_else(|| StackError::UnknownReference {
                    resource: decl.id.clone(),
                    target: id.clone(),
                })?;
            edges.push(target);
        }
        deps.push(edges);
    }

    let mut marks = vec![Mark::Unvisited; resources.len()];
    let mut path = Vec::new();
    let mut order = Vec::with_capacity(resources.len());
    for i in 0..resources.len() {
        visit(i, &deps, resources, &mut marks, &mut path, &mut order)?;
    }
    Ok(order)
}

fn visit(
    node: usize,
    deps: &[Vec<usize>],
    resources: &[ResourceDecl],
    marks: &mut [Mark],
    path: &mut Vec<usize>,
    order: &mut Vec<usize>,
) -> Result<(), StackError> {
    match marks[node] {
        Mark::Done => return Ok(()),
        Mark::Visiting => {
            let start = path.iter().position(|&n| n == node).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..]
                .iter()
                .map(|&n| resources[n].id.clone())
                .collect();
            cycle.push(resources[node].id.clone());
            return Err(StackError::Cycle(cycle));
        }
        Mark::Unvisited => {}
    }

    marks[node] = Mark::Visiting;
    path.push(node);
    for &dep in &deps[node] {
        visit(dep, deps, resources, marks, path, order)?;
    }
    path.pop();
    marks[node] = Mark::Done;
    order.push(node);
    Ok(())
}

/// Ids referenced anywhere in a props value, first appearance first
fn collect_references(value: &toml::Value, out: &mut Vec<String>) {
    match value {
        toml::Value::String(s) => {
            for caps in REFERENCE.captures_iter(s) {
                let id = caps[1].to_string();
                if !out.contains(&id) {
                    out.push(id);
                }
            }
        }
        toml::Value::Array(items) => {
            for item in items {
                collect_references(item, out);
            }
        }
        toml::Value::Table(table) => {
            for item in table.values() {
                collect_references(item, out);
            }
        }
        _ => {}
    }
}

// ============================================================================
// Conversion to Inputs
// ============================================================================

fn to_input(
    resource: &str,
    value: &Value,
    declared: &HashMap<&str, Resource>,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<Input, StackError> {
    Ok(match value {
        Value::String(s) => string_input(resource, s, declared)?,
        Value::Array(items) => Input::Array(
            items
                .iter()
                .map(|item| to_input(resource, item, declared, env))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Object(map) => {
            if let Some(var) = secret_var(value) {
                let secret = env(var).ok_or_else(|| StackError::MissingSecret {
                    resource: resource.to_string(),
                    var: var.to_string(),
                })?;
                return Ok(Input::secret(secret));
            }
            let mut object = Input::object();
            for (key, item) in map {
                object = object.with(key, to_input(resource, item, declared, env)?);
            }
            object
        }
        other => Input::Value(other.clone()),
    })
}

/// `{ secret_env = "VAR" }` and nothing else
fn secret_var(value: &Value) -> Option<&str> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.get(SECRET_ENV_KEY)?.as_str()
}

fn string_input(
    resource: &str,
    s: &str,
    declared: &HashMap<&str, Resource>,
) -> Result<Input, StackError> {
    let lookup = |id: &str, path: &str| {
        declared
            .get(id)
            .map(|producer| Input::Deferred(producer.output().path(path)))
            .ok_or_else(|| StackError::UnknownReference {
                resource: resource.to_string(),
                target: id.to_string(),
            })
    };

    let mut parts = Vec::new();
    let mut last = 0;
    for caps in REFERENCE.captures_iter(s) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if whole.start() == 0 && whole.end() == s.len() {
            return lookup(&caps[1], &caps[2]);
        }
        if whole.start() > last {
            parts.push(Input::from(&s[last..whole.start()]));
        }
        parts.push(lookup(&caps[1], &caps[2])?);
        last = whole.end();
    }

    if parts.is_empty() {
        return Ok(Input::from(s));
    }
    if last < s.len() {
        parts.push(Input::from(&s[last..]));
    }
    Ok(Input::concat(parts))
}
