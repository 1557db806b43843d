//! Schema registry: file type identifier -> target table and column order
//!
//! Every MedDRA distribution file is a headerless, positional record format.
//! A [`SchemaMapping`] pairs a file type (e.g. `llt.asc`) with the
//! [`RecordShape`] of its target table and the order in which the shape's
//! fields appear on each line. Mappings are validated when they are built;
//! the registry itself is immutable and only queried by the pipeline.
//!
//! Note that validation can only check names and counts. A mapping that
//! lists the right columns in the wrong order is accepted and loads
//! misaligned values.

mod meddra;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use thiserror::Error;

/// Ingestion metadata columns appended to every row
pub const RESERVED_COLUMNS: [&str; 4] = ["created_at", "updated_at", "language", "version"];

/// Errors raised while building a registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Mapping for '{file_type}' lists {actual} columns but table {table} declares {expected} fields")]
    ColumnCountMismatch {
        file_type: String,
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("Mapping for '{file_type}' references unknown column '{column}'")]
    UnknownColumn { file_type: String, column: String },

    #[error("Mapping for '{file_type}' lists column '{column}' more than once")]
    DuplicateColumn { file_type: String, column: String },

    #[error("Mapping for '{file_type}' uses reserved column '{column}'")]
    ReservedColumn { file_type: String, column: String },

    #[error("Invalid SQL identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("File type '{0}' is registered more than once")]
    DuplicateFileType(String),

    #[error("Failed to read registry file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse registry document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Storage type of a source column
///
/// Serialized as `"integer"`, `"big_int"`, `"numeric"`, `"text"` or
/// `{"varchar": <max length>}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// 32-bit integer
    Integer,
    /// 64-bit integer
    BigInt,
    /// Arbitrary precision decimal
    Numeric,
    /// Text bounded to the given number of characters
    Varchar(u32),
    /// Unbounded text
    Text,
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Integer => f.write_str("integer"),
            ColumnType::BigInt => f.write_str("bigint"),
            ColumnType::Numeric => f.write_str("numeric"),
            ColumnType::Varchar(len) => write!(f, "varchar({})", len),
            ColumnType::Text => f.write_str("text"),
        }
    }
}

/// One source column of a target table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable,
        }
    }
}

/// Target table and its declared source fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordShape {
    pub table: String,
    pub fields: Vec<ColumnDef>,
}

impl RecordShape {
    pub fn new(table: impl Into<String>, fields: Vec<ColumnDef>) -> Self {
        Self {
            table: table.into(),
            fields,
        }
    }

    /// Look up a declared field by name
    pub fn field(&self, name: &str) -> Option<&ColumnDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// File type -> shape + positional column order
#[derive(Debug, Clone)]
pub struct SchemaMapping {
    file_type: String,
    shape: RecordShape,
    column_order: Vec<String>,
    /// `positions[i]` is the index into `shape.fields` of the i-th value on a line
    positions: Vec<usize>,
}

impl SchemaMapping {
    /// Build and validate a mapping
    pub fn new(
        file_type: impl Into<String>,
        shape: RecordShape,
        column_order: Vec<String>,
    ) -> Result<Self, RegistryError> {
        let file_type = file_type.into();

        validate_identifier(&shape.table)?;

        if column_order.len() != shape.fields.len() {
            return Err(RegistryError::ColumnCountMismatch {
                file_type,
                table: shape.table.clone(),
                expected: shape.fields.len(),
                actual: column_order.len(),
            });
        }

        let mut declared = HashSet::new();
        for field in &shape.fields {
            validate_identifier(&field.name)?;
            if is_reserved(&field.name) {
                return Err(RegistryError::ReservedColumn {
                    file_type,
                    column: field.name.clone(),
                });
            }
            if !declared.insert(field.name.as_str()) {
                return Err(RegistryError::DuplicateColumn {
                    file_type,
                    column: field.name.clone(),
                });
            }
        }

        let mut seen = HashSet::new();
        let mut positions = Vec::with_capacity(column_order.len());
        for column in &column_order {
            if is_reserved(column) {
                return Err(RegistryError::ReservedColumn {
                    file_type,
                    column: column.clone(),
                });
            }
            if !seen.insert(column.as_str()) {
                return Err(RegistryError::DuplicateColumn {
                    file_type,
                    column: column.clone(),
                });
            }
            let index = shape
                .fields
                .iter()
                .position(|f| &f.name == column)
                .ok_or_else(|| RegistryError::UnknownColumn {
                    file_type: file_type.clone(),
                    column: column.clone(),
                })?;
            positions.push(index);
        }

        Ok(Self {
            file_type,
            shape,
            column_order,
            positions,
        })
    }

    /// Mapping whose column order is the shape's declaration order
    pub fn in_declared_order(
        file_type: impl Into<String>,
        shape: RecordShape,
    ) -> Result<Self, RegistryError> {
        let order = shape.fields.iter().map(|f| f.name.clone()).collect();
        Self::new(file_type, shape, order)
    }

    pub fn file_type(&self) -> &str {
        &self.file_type
    }

    pub fn shape(&self) -> &RecordShape {
        &self.shape
    }

    pub fn table(&self) -> &str {
        &self.shape.table
    }

    pub fn column_order(&self) -> &[String] {
        &self.column_order
    }

    /// Number of positional fields on a line
    pub fn column_count(&self) -> usize {
        self.column_order.len()
    }

    /// Column definitions in positional (file) order
    pub fn columns(&self) -> impl Iterator<Item = &ColumnDef> + '_ {
        self.positions.iter().map(move |&i| &self.shape.fields[i])
    }
}

/// Registry of supported file types
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    mappings: BTreeMap<String, SchemaMapping>,
}

impl SchemaRegistry {
    /// Build a registry, rejecting duplicate file types
    pub fn new(mappings: Vec<SchemaMapping>) -> Result<Self, RegistryError> {
        let mut by_type = BTreeMap::new();
        for mapping in mappings {
            let key = mapping.file_type.clone();
            if by_type.insert(key.clone(), mapping).is_some() {
                return Err(RegistryError::DuplicateFileType(key));
            }
        }
        Ok(Self { mappings: by_type })
    }

    /// The MedDRA distribution files
    pub fn meddra() -> Result<Self, RegistryError> {
        Self::new(meddra::mappings()?)
    }

    /// Parse a registry from a JSON document
    ///
    /// ```json
    /// { "mappings": [ { "file_type": "llt.asc", "table": "meddra_low_level_term",
    ///     "fields": [ { "name": "llt_code", "column_type": "big_int", "nullable": false } ],
    ///     "column_order": ["llt_code"] } ] }
    /// ```
    ///
    /// `column_order` may be omitted when it matches the field order.
    pub fn from_json_str(document: &str) -> Result<Self, RegistryError> {
        let document: RegistryDocument = serde_json::from_str(document)?;
        let mappings = document
            .mappings
            .into_iter()
            .map(|entry| {
                let shape = RecordShape::new(entry.table, entry.fields);
                match entry.column_order {
                    Some(order) => SchemaMapping::new(entry.file_type, shape, order),
                    None => SchemaMapping::in_declared_order(entry.file_type, shape),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(mappings)
    }

    /// Load a registry from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let document = std::fs::read_to_string(path)?;
        Self::from_json_str(&document)
    }

    pub fn lookup(&self, file_type: &str) -> Option<&SchemaMapping> {
        self.mappings.get(file_type)
    }

    pub fn is_supported(&self, file_type: &str) -> bool {
        self.mappings.contains_key(file_type)
    }

    pub fn all_supported_types(&self) -> BTreeSet<String> {
        self.mappings.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    mappings: Vec<MappingEntry>,
}

#[derive(Debug, Deserialize)]
struct MappingEntry {
    file_type: String,
    table: String,
    fields: Vec<ColumnDef>,
    #[serde(default)]
    column_order: Option<Vec<String>>,
}

fn is_reserved(column: &str) -> bool {
    RESERVED_COLUMNS.contains(&column)
}

/// Lowercase SQL identifier: `[a-z_][a-z0-9_]*`, at most 63 bytes
pub(crate) fn validate_identifier(ident: &str) -> Result<(), RegistryError> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_lowercase() || first == '_')
                && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
                && ident.len() <= 63
        },
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidIdentifier(ident.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn pair_shape() -> RecordShape {
        RecordShape::new(
            "meddra_hlt_pref_comp",
            vec![
                ColumnDef::new("hlt_code", ColumnType::Numeric, true),
                ColumnDef::new("pt_code", ColumnType::Numeric, true),
            ],
        )
    }

    #[test]
    fn test_builtin_registry_has_all_distribution_files() {
        let registry = SchemaRegistry::meddra().unwrap();
        let types = registry.all_supported_types();
        for expected in [
            "llt.asc",
            "pt.asc",
            "hlt.asc",
            "hlgt.asc",
            "soc.asc",
            "hlt_pt.asc",
            "hlgt_hlt.asc",
            "soc_hlgt.asc",
            "mdhier.asc",
            "intl_ord.asc",
            "smq_list.asc",
            "smq_content.asc",
            "meddra_release.asc",
        ] {
            assert!(types.contains(expected), "missing {}", expected);
        }
        assert_eq!(registry.len(), 13);
        assert!(registry.lookup("llt_history.asc").is_none());
    }

    #[test]
    fn test_llt_column_order() {
        let registry = SchemaRegistry::meddra().unwrap();
        let llt = registry.lookup("llt.asc").unwrap();
        assert_eq!(llt.table(), "meddra_low_level_term");
        assert_eq!(llt.column_count(), 11);
        assert_eq!(llt.column_order()[0], "llt_code");
        assert_eq!(llt.column_order()[2], "pt_code");
        assert_eq!(llt.column_order()[9], "llt_currency");
        let first = llt.columns().next().unwrap();
        assert_eq!(first.column_type, ColumnType::BigInt);
        assert!(!first.nullable);
    }

    #[test]
    fn test_column_count_mismatch_is_rejected() {
        let err = SchemaMapping::new("hlt_pt.asc", pair_shape(), vec!["hlt_code".to_string()])
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::ColumnCountMismatch {
                expected: 2,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_and_duplicate_columns_are_rejected() {
        let unknown = SchemaMapping::new(
            "hlt_pt.asc",
            pair_shape(),
            vec!["hlt_code".to_string(), "soc_code".to_string()],
        )
        .unwrap_err();
        assert!(matches!(unknown, RegistryError::UnknownColumn { ref column, .. } if column == "soc_code"));

        let duplicate = SchemaMapping::new(
            "hlt_pt.asc",
            pair_shape(),
            vec!["hlt_code".to_string(), "hlt_code".to_string()],
        )
        .unwrap_err();
        assert!(matches!(duplicate, RegistryError::DuplicateColumn { .. }));
    }

    #[test]
    fn test_reserved_column_is_rejected() {
        let shape = RecordShape::new(
            "meddra_release",
            vec![
                ColumnDef::new("meddra_version", ColumnType::Varchar(100), false),
                ColumnDef::new("language", ColumnType::Varchar(8), true),
            ],
        );
        let err = SchemaMapping::in_declared_order("meddra_release.asc", shape).unwrap_err();
        assert!(matches!(err, RegistryError::ReservedColumn { ref column, .. } if column == "language"));
    }

    #[test]
    fn test_invalid_identifier_is_rejected() {
        let shape = RecordShape::new(
            "pt; DROP TABLE x",
            vec![ColumnDef::new("pt_code", ColumnType::Integer, false)],
        );
        assert!(matches!(
            SchemaMapping::in_declared_order("pt.asc", shape),
            Err(RegistryError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_permuted_order_is_accepted_and_reorders_columns() {
        let mapping = SchemaMapping::new(
            "hlt_pt.asc",
            pair_shape(),
            vec!["pt_code".to_string(), "hlt_code".to_string()],
        )
        .unwrap();
        let names: Vec<&str> = mapping.columns().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["pt_code", "hlt_code"]);
    }

    #[test]
    fn test_duplicate_file_type_is_rejected() {
        let a = SchemaMapping::in_declared_order("hlt_pt.asc", pair_shape()).unwrap();
        let b = a.clone();
        assert!(matches!(
            SchemaRegistry::new(vec![a, b]),
            Err(RegistryError::DuplicateFileType(_))
        ));
    }

    #[test]
    fn test_registry_from_json() {
        let document = r#"
        {
            "mappings": [
                {
                    "file_type": "intl_ord.asc",
                    "table": "meddra_soc_intl_order",
                    "fields": [
                        { "name": "soc_code", "column_type": "big_int", "nullable": false },
                        { "name": "intl_ord_code", "column_type": "big_int", "nullable": false }
                    ],
                    "column_order": ["intl_ord_code", "soc_code"]
                },
                {
                    "file_type": "custom.asc",
                    "table": "custom_terms",
                    "fields": [
                        { "name": "term_name", "column_type": { "varchar": 100 } }
                    ]
                }
            ]
        }"#;

        let registry = SchemaRegistry::from_json_str(document).unwrap();
        assert_eq!(registry.len(), 2);

        let intl = registry.lookup("intl_ord.asc").unwrap();
        assert_eq!(intl.column_order(), &["intl_ord_code".to_string(), "soc_code".to_string()]);

        let custom = registry.lookup("custom.asc").unwrap();
        let column = custom.columns().next().unwrap();
        assert_eq!(column.column_type, ColumnType::Varchar(100));
        assert!(column.nullable);
    }

    #[test]
    fn test_registry_from_json_validates_mappings() {
        let document = r#"
        { "mappings": [ { "file_type": "x.asc", "table": "x",
            "fields": [ { "name": "a", "column_type": "text" } ],
            "column_order": ["a", "b"] } ] }"#;
        assert!(matches!(
            SchemaRegistry::from_json_str(document),
            Err(RegistryError::ColumnCountMismatch { .. })
        ));
    }
}
