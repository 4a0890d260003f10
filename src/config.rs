//! Per-collection engine configuration.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::record::Record;

const DEFAULT_ID_FIELD: &str = "id";

/// Declared field names for a collection. The cache only reads the
/// names: any field ending in `Id` (e.g. `fatherId`, `siteId`) is
/// treated as a foreign key and gets a secondary index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
  fields: Vec<String>,
}

impl Schema {
  pub fn new<I, S>(fields: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      fields: fields.into_iter().map(Into::into).collect(),
    }
  }

  pub fn fields(&self) -> &[String] {
    &self.fields
  }

  /// Field names matching the foreign-key naming convention.
  pub fn to_one_fields(&self) -> Vec<String> {
    self
      .fields
      .iter()
      .filter(|name| name.len() > 2 && name.ends_with("Id"))
      .cloned()
      .collect()
  }
}

/// Cross-cutting field injection applied to a record before `create`
/// sends it. An explicit list per engine, not a global registry.
pub type RecordDecorator = Arc<dyn Fn(&mut Record) + Send + Sync>;

/// Configuration for one collection's cache engine.
#[derive(Clone)]
pub struct CollectionConfig {
  pub collection: String,
  pub schema: Schema,
  pub id_field: String,
  pub decorators: Vec<RecordDecorator>,
}

impl CollectionConfig {
  pub fn new(collection: impl Into<String>, schema: Schema) -> Self {
    Self {
      collection: collection.into(),
      schema,
      id_field: DEFAULT_ID_FIELD.to_string(),
      decorators: Vec::new(),
    }
  }

  pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
    self.id_field = id_field.into();
    self
  }

  pub fn with_decorator(mut self, decorator: RecordDecorator) -> Self {
    self.decorators.push(decorator);
    self
  }
}

impl fmt::Debug for CollectionConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CollectionConfig")
      .field("collection", &self.collection)
      .field("schema", &self.schema)
      .field("id_field", &self.id_field)
      .field("decorators", &self.decorators.len())
      .finish()
  }
}

/// Decorator filling a missing or empty id with a generated uuid.
pub fn generated_id(id_field: impl Into<String>) -> RecordDecorator {
  let id_field = id_field.into();
  Arc::new(move |record: &mut Record| {
    let missing = match record.get(&id_field) {
      Some(Value::String(id)) => id.is_empty(),
      Some(Value::Null) | None => true,
      Some(_) => false,
    };
    if missing {
      record.insert(id_field.clone(), Value::String(Uuid::new_v4().to_string()));
    }
  })
}

/// Decorator stamping the creation time (epoch milliseconds) if absent.
pub fn created_at(field: impl Into<String>) -> RecordDecorator {
  let field = field.into();
  Arc::new(move |record: &mut Record| {
    let missing = matches!(record.get(&field), Some(Value::Null) | None);
    if missing {
      record.insert(field.clone(), Value::from(Utc::now().timestamp_millis()));
    }
  })
}
