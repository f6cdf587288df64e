//! Provider definitions and the kind registry
//!
//! A provider is the create/update/delete body for one resource kind.
//! Providers are registered on an explicit [`Registry`] that the
//! [`Engine`](crate::Engine) owns for the whole run.

use crate::context::HandlerContext;
use crate::error::{Error, Result};
use crate::types::Event;
use anyhow::Context as _;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Coarse JSON type for schema fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Any,
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Any => "any",
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
struct Field {
    ty: FieldType,
    required: bool,
}

/// Object shape checked against a provider's input or output
///
/// Fields not named in the schema are allowed.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: BTreeMap<String, Field>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field that must be present and non-null
    pub fn required(mut self, name: &str, ty: FieldType) -> Self {
        self.fields.insert(name.to_string(), Field { ty, required: true });
        self
    }

    /// Add a field that may be absent or null
    pub fn optional(mut self, name: &str, ty: FieldType) -> Self {
        self.fields
            .insert(name.to_string(), Field { ty, required: false });
        self
    }

    /// Check a value, returning every violation found
    pub fn validate(&self, value: &Value) -> std::result::Result<(), Vec<String>> {
        let Some(object) = value.as_object() else {
            return Err(vec![format!("expected an object, got {}", type_name(value))]);
        };

        let mut violations = Vec::new();
        for (name, field) in &self.fields {
            match object.get(name) {
                None | Some(Value::Null) => {
                    if field.required {
                        violations.push(format!("missing required field '{name}'"));
                    }
                }
                Some(v) if !field.ty.matches(v) => violations.push(format!(
                    "field '{name}' should be {}, got {}",
                    field.ty,
                    type_name(v)
                )),
                Some(_) => {}
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Per-kind behaviour switches
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderOptions {
    /// Run the update handler even when props are unchanged
    pub always_update: bool,
}

/// The lifecycle body of a provider
///
/// Returns the new output for create and update. Returning `None` is
/// only valid for delete.
pub trait Handler {
    fn handle(&self, ctx: &mut HandlerContext<'_>, input: &Value) -> anyhow::Result<Option<Value>>;
}

struct FnHandler<F>(F);

impl<F> Handler for FnHandler<F>
where
    F: Fn(&mut HandlerContext<'_>, &Value) -> anyhow::Result<Option<Value>>,
{
    fn handle(&self, ctx: &mut HandlerContext<'_>, input: &Value) -> anyhow::Result<Option<Value>> {
        (self.0)(ctx, input)
    }
}

/// A registered resource kind
pub struct ProviderDefinition {
    pub kind: String,
    pub options: ProviderOptions,
    pub input_schema: Option<Schema>,
    pub output_schema: Option<Schema>,
    handler: Box<dyn Handler>,
}

impl ProviderDefinition {
    pub fn new(kind: &str, handler: impl Handler + 'static) -> Self {
        Self {
            kind: kind.to_string(),
            options: ProviderOptions::default(),
            input_schema: None,
            output_schema: None,
            handler: Box::new(handler),
        }
    }

    pub fn with_options(mut self, options: ProviderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub(crate) fn handler(&self) -> &dyn Handler {
        self.handler.as_ref()
    }
}

impl fmt::Debug for ProviderDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDefinition")
            .field("kind", &self.kind)
            .field("options", &self.options)
            .field("input_schema", &self.input_schema)
            .field("output_schema", &self.output_schema)
            .finish_non_exhaustive()
    }
}

/// Statically typed provider
///
/// Props and output travel as serde types instead of raw JSON. Register
/// it with [`Registry::register`].
pub trait Provider {
    type Props: DeserializeOwned;
    type Output: Serialize + DeserializeOwned;

    /// Globally unique kind name
    fn kind(&self) -> &str;

    fn options(&self) -> ProviderOptions {
        ProviderOptions::default()
    }

    fn input_schema(&self) -> Option<Schema> {
        None
    }

    fn output_schema(&self) -> Option<Schema> {
        None
    }

    fn create(&self, ctx: &mut HandlerContext<'_>, props: Self::Props) -> anyhow::Result<Self::Output>;

    /// `prior` is the last successful output
    fn update(
        &self,
        ctx: &mut HandlerContext<'_>,
        props: Self::Props,
        prior: Option<Self::Output>,
    ) -> anyhow::Result<Self::Output>;

    fn delete(
        &self,
        ctx: &mut HandlerContext<'_>,
        props: Self::Props,
        output: Option<Self::Output>,
    ) -> anyhow::Result<()>;
}

struct TypedHandler<P>(P);

impl<P: Provider> TypedHandler<P> {
    fn prior_output(ctx: &HandlerContext<'_>) -> anyhow::Result<Option<P::Output>> {
        ctx.prior_output()
            .filter(|v| !v.is_null())
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .with_context(|| format!("stored output of {} has an unexpected shape", ctx.fqn()))
    }
}

impl<P: Provider> Handler for TypedHandler<P> {
    fn handle(&self, ctx: &mut HandlerContext<'_>, input: &Value) -> anyhow::Result<Option<Value>> {
        let props: P::Props = serde_json::from_value(input.clone())
            .with_context(|| format!("invalid props for {}", ctx.fqn()))?;

        match ctx.event() {
            Event::Create => {
                let output = self.0.create(ctx, props)?;
                Ok(Some(serde_json::to_value(output)?))
            }
            Event::Update => {
                let prior = Self::prior_output(ctx)?;
                let output = self.0.update(ctx, props, prior)?;
                Ok(Some(serde_json::to_value(output)?))
            }
            Event::Delete => {
                let output = Self::prior_output(ctx)?;
                self.0.delete(ctx, props, output)?;
                Ok(None)
            }
        }
    }
}

/// Kind → provider table
#[derive(Debug, Default)]
pub struct Registry {
    providers: BTreeMap<String, Rc<ProviderDefinition>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure as the handler for `kind`
    pub fn define<F>(&mut self, kind: &str, options: ProviderOptions, handler: F) -> Result<()>
    where
        F: Fn(&mut HandlerContext<'_>, &Value) -> anyhow::Result<Option<Value>> + 'static,
    {
        self.register_definition(ProviderDefinition::new(kind, FnHandler(handler)).with_options(options))
    }

    /// Register a fully built definition
    pub fn register_definition(&mut self, definition: ProviderDefinition) -> Result<()> {
        if self.providers.contains_key(&definition.kind) {
            return Err(Error::DuplicateKind(definition.kind));
        }
        log::debug!("Registered provider '{}'", definition.kind);
        self.providers
            .insert(definition.kind.clone(), Rc::new(definition));
        Ok(())
    }

    /// Register a typed provider
    pub fn register<P: Provider + 'static>(&mut self, provider: P) -> Result<()> {
        let kind = provider.kind().to_string();
        let options = provider.options();
        let input_schema = provider.input_schema();
        let output_schema = provider.output_schema();

        let mut definition = ProviderDefinition::new(&kind, TypedHandler(provider)).with_options(options);
        definition.input_schema = input_schema;
        definition.output_schema = output_schema;
        self.register_definition(definition)
    }

    /// Look up a provider by kind
    pub fn get(&self, kind: &str) -> Option<Rc<ProviderDefinition>> {
        self.providers.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.providers.contains_key(kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_duplicate_kind_rejected() {
        let mut registry = Registry::new();
        registry
            .define("file", ProviderOptions::default(), |_, input| Ok(Some(input.clone())))
            .unwrap();
        let err = registry
            .define("file", ProviderOptions::default(), |_, _| Ok(None))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateKind(kind) if kind == "file"));
        assert_eq!(registry.kinds(), vec!["file"]);
    }

    #[test]
    fn test_unknown_kind_lookup() {
        let registry = Registry::new();
        assert!(registry.get("bucket").is_none());
        assert!(!registry.contains("bucket"));
    }

    #[test]
    fn test_schema_reports_all_violations() {
        let schema = Schema::new()
            .required("path", FieldType::String)
            .required("size", FieldType::Integer)
            .optional("mode", FieldType::Integer);

        assert!(schema.validate(&json!({"path": "/a", "size": 3})).is_ok());
        assert!(schema.validate(&json!({"path": "/a", "size": 3, "mode": null})).is_ok());

        let violations = schema
            .validate(&json!({"size": "3", "mode": 1.5}))
            .unwrap_err();
        assert_eq!(violations.len(), 3);
        assert!(
            violations
                .iter()
                .any(|v| v.contains("missing required field 'path'"))
        );

        let not_object = schema.validate(&json!([1])).unwrap_err();
        assert!(not_object[0].contains("got array"));
    }

    #[test]
    fn test_field_types() {
        assert!(FieldType::Number.matches(&json!(1.5)));
        assert!(!FieldType::Integer.matches(&json!(1.5)));
        assert!(FieldType::Any.matches(&Value::Null));
        assert!(FieldType::Array.matches(&json!([])));
    }
}
