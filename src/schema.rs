//! Cargo table schemas.
//!
//! A Cargo table is declared by a wiki template; its schema is an ordered
//! list of fields, each with a closed [`FieldType`] and list/hierarchy flags.
//! Schemas are read from a [`SchemaSource`]; [`SchemaRegistry`] is the
//! in-memory implementation, loadable from JSON or TOML.
//!
//! # Example
//! ```
//! use cargoquery::schema::{SchemaRegistry, SchemaSource};
//!
//! let json = r#"{
//!     "Cities": {
//!         "Country": { "type": "Page" },
//!         "Population": { "type": "Integer" },
//!         "Languages": { "type": "String", "isList": true, "delimiter": "," }
//!     }
//! }"#;
//!
//! let registry = SchemaRegistry::from_json(json).unwrap();
//! let cities = registry.table_schema("Cities").unwrap();
//! assert!(cities.field("Languages").unwrap().is_list);
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CargoError, CargoResult};

/// The type tag of a Cargo field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FieldType {
    #[default]
    String,
    Text,
    Integer,
    Float,
    Boolean,
    Date,
    #[serde(rename = "Start date")]
    StartDate,
    #[serde(rename = "End date")]
    EndDate,
    Datetime,
    #[serde(rename = "Start datetime")]
    StartDatetime,
    #[serde(rename = "End datetime")]
    EndDatetime,
    Page,
    File,
    #[serde(rename = "URL")]
    Url,
    Email,
    Coordinates,
    Searchtext,
    Wikitext,
    #[serde(rename = "Wikitext string")]
    WikitextString,
    Rating,
}

impl FieldType {
    /// Date and datetime variants, including start/end markers.
    pub fn is_date(&self) -> bool {
        matches!(
            self,
            FieldType::Date
                | FieldType::StartDate
                | FieldType::EndDate
                | FieldType::Datetime
                | FieldType::StartDatetime
                | FieldType::EndDatetime
        )
    }

    /// Whether values of this type carry a time-of-day part.
    pub fn has_time(&self) -> bool {
        matches!(
            self,
            FieldType::Datetime | FieldType::StartDatetime | FieldType::EndDatetime
        )
    }

    /// Numeric types.
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Float | FieldType::Rating)
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldType::String => "String",
            FieldType::Text => "Text",
            FieldType::Integer => "Integer",
            FieldType::Float => "Float",
            FieldType::Boolean => "Boolean",
            FieldType::Date => "Date",
            FieldType::StartDate => "Start date",
            FieldType::EndDate => "End date",
            FieldType::Datetime => "Datetime",
            FieldType::StartDatetime => "Start datetime",
            FieldType::EndDatetime => "End datetime",
            FieldType::Page => "Page",
            FieldType::File => "File",
            FieldType::Url => "URL",
            FieldType::Email => "Email",
            FieldType::Coordinates => "Coordinates",
            FieldType::Searchtext => "Searchtext",
            FieldType::Wikitext => "Wikitext",
            FieldType::WikitextString => "Wikitext string",
            FieldType::Rating => "Rating",
        };
        write!(f, "{}", name)
    }
}

/// Description of one field of a Cargo table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldDescription {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub is_list: bool,
    pub delimiter: Option<String>,
    pub is_hierarchy: bool,
    /// Wikitext bullet list describing the hierarchy tree.
    pub hierarchy_structure: Option<String>,
    pub size: Option<u32>,
    pub allowed_values: Vec<String>,
    pub is_mandatory: bool,
    pub is_unique: bool,
}

impl FieldDescription {
    /// Create a single-valued description of the given type.
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            ..Self::default()
        }
    }

    /// Builder: mark as a list field with the given delimiter.
    pub fn list(mut self, delimiter: &str) -> Self {
        self.is_list = true;
        self.delimiter = Some(delimiter.to_string());
        self
    }

    /// Builder: mark as a hierarchy field.
    pub fn hierarchy(mut self, structure: &str) -> Self {
        self.is_hierarchy = true;
        self.hierarchy_structure = Some(structure.to_string());
        self
    }

    /// The description of one element of this (list) field.
    pub fn element(&self) -> Self {
        Self {
            is_list: false,
            delimiter: None,
            ..self.clone()
        }
    }
}

/// Ordered field map of one Cargo table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableSchema {
    pub name: String,
    fields: Vec<(String, FieldDescription)>,
}

impl TableSchema {
    /// Create an empty schema.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
        }
    }

    /// Builder: add a field.
    pub fn field_def(mut self, name: &str, description: FieldDescription) -> Self {
        self.add_field(name, description);
        self
    }

    /// Add or replace a field, keeping declaration order.
    pub fn add_field(&mut self, name: &str, description: FieldDescription) {
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| n == name) {
            slot.1 = description;
        } else {
            self.fields.push((name.to_string(), description));
        }
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescription> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldDescription)> {
        self.fields.iter().map(|(n, d)| (n.as_str(), d))
    }

    /// Parse the JSON object stored for a table in the registry table.
    pub fn from_db_string(name: &str, json: &str) -> CargoResult<Self> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| CargoError::schema(format!("invalid schema for table '{}': {}", name, e)))?;
        Self::from_json_value(name, value)
    }

    fn from_json_value(name: &str, value: serde_json::Value) -> CargoResult<Self> {
        let serde_json::Value::Object(map) = value else {
            return Err(CargoError::schema(format!(
                "schema for table '{}' must be an object of fields",
                name
            )));
        };

        let mut schema = TableSchema::new(name);
        for (field_name, field_value) in map {
            let description: FieldDescription = serde_json::from_value(field_value).map_err(|e| {
                CargoError::schema(format!("invalid field '{}.{}': {}", name, field_name, e))
            })?;
            schema.add_field(&field_name, description);
        }
        Ok(schema)
    }
}

/// Read-only lookup of table schemas by table name.
pub trait SchemaSource {
    /// Fetch the schema of `table`, failing with [`CargoError::Schema`] if unknown.
    fn table_schema(&self, table: &str) -> CargoResult<TableSchema>;
}

/// In-memory schema registry.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: HashMap<String, TableSchema>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table schema.
    pub fn add_table(&mut self, schema: TableSchema) {
        self.tables.insert(schema.name.clone(), schema);
    }

    /// Builder: register a table schema.
    pub fn with_table(mut self, schema: TableSchema) -> Self {
        self.add_table(schema);
        self
    }

    /// Registered table names, sorted.
    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(|n| n.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Load from a JSON object of tables, each an object of fields.
    pub fn from_json(json: &str) -> CargoResult<Self> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| CargoError::schema(format!("invalid schema registry: {}", e)))?;
        Self::from_json_value(value)
    }

    /// Load from TOML, one table per `[Table]` section and one inline table per field.
    ///
    /// ```toml
    /// [Cities]
    /// Population = { type = "Integer" }
    /// Languages = { type = "String", isList = true, delimiter = "," }
    /// ```
    pub fn from_toml(content: &str) -> CargoResult<Self> {
        let value: serde_json::Value = toml::from_str(content)
            .map_err(|e| CargoError::schema(format!("invalid schema registry: {}", e)))?;
        Self::from_json_value(value)
    }

    /// Load from a file, picking the format from the extension (`.toml` or JSON).
    pub fn from_file(path: &Path) -> CargoResult<Self> {
        let content = std::fs::read_to_string(path)?;
        if path.extension().map(|e| e == "toml").unwrap_or(false) {
            Self::from_toml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    fn from_json_value(value: serde_json::Value) -> CargoResult<Self> {
        let serde_json::Value::Object(tables) = value else {
            return Err(CargoError::schema("schema registry must be an object of tables"));
        };

        let mut registry = SchemaRegistry::new();
        for (name, fields) in tables {
            registry.add_table(TableSchema::from_json_value(&name, fields)?);
        }
        Ok(registry)
    }
}

impl SchemaSource for SchemaRegistry {
    fn table_schema(&self, table: &str) -> CargoResult<TableSchema> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| CargoError::schema(format!("unknown table '{}'", table)))
    }
}
