//! Built-in mappings for the MedDRA ASCII distribution files
//!
//! Column order follows the field layout of each `.asc` file as shipped by
//! the MSSO. Every table also carries the reserved ingestion columns
//! (`created_at`, `updated_at`, `language`, `version`), which are not listed here.

use super::{ColumnDef, ColumnType, RecordShape, RegistryError, SchemaMapping};

use ColumnType::{BigInt, Integer, Numeric, Text, Varchar};

fn col(name: &str, column_type: ColumnType) -> ColumnDef {
    ColumnDef::new(name, column_type, true)
}

fn required(name: &str, column_type: ColumnType) -> ColumnDef {
    ColumnDef::new(name, column_type, false)
}

/// Legacy cross-terminology codes shared by the term files
fn legacy_codes(prefix: &str) -> Vec<ColumnDef> {
    vec![
        col(&format!("{}_whoart_code", prefix), Varchar(7)),
        col(&format!("{}_harts_code", prefix), Numeric),
        col(&format!("{}_costart_sym", prefix), Varchar(21)),
        col(&format!("{}_icd9_code", prefix), Varchar(8)),
        col(&format!("{}_icd9cm_code", prefix), Varchar(8)),
        col(&format!("{}_icd10_code", prefix), Varchar(8)),
    ]
}

fn mapping(file_type: &str, table: &str, fields: Vec<ColumnDef>) -> Result<SchemaMapping, RegistryError> {
    SchemaMapping::in_declared_order(file_type, RecordShape::new(table, fields))
}

fn low_level_term() -> Result<SchemaMapping, RegistryError> {
    let mut fields = vec![
        required("llt_code", BigInt),
        required("llt_name", Varchar(100)),
        col("pt_code", BigInt),
    ];
    fields.extend(legacy_codes("llt"));
    fields.push(col("llt_currency", Varchar(1)));
    fields.push(col("llt_jart_code", Varchar(6)));
    mapping("llt.asc", "meddra_low_level_term", fields)
}

fn preferred_term() -> Result<SchemaMapping, RegistryError> {
    let mut fields = vec![
        required("pt_code", Integer),
        col("pt_name", Varchar(100)),
        col("null_field", Varchar(10)),
        col("pt_soc_code", Numeric),
    ];
    fields.extend(legacy_codes("pt"));
    fields.push(col("pt_jart_code", Varchar(6)));
    mapping("pt.asc", "meddra_pref_term", fields)
}

fn high_level_term() -> Result<SchemaMapping, RegistryError> {
    let mut fields = vec![required("hlt_code", Numeric), required("hlt_name", Varchar(100))];
    fields.extend(legacy_codes("hlt"));
    fields.push(col("hlt_jart_code", Varchar(6)));
    mapping("hlt.asc", "meddra_hlt_pref_term", fields)
}

fn high_level_group_term() -> Result<SchemaMapping, RegistryError> {
    let mut fields = vec![col("hlgt_code", Numeric), col("hlgt_name", Varchar(100))];
    fields.extend(legacy_codes("hlgt"));
    fields.push(col("hlgt_jart_code", Varchar(6)));
    mapping("hlgt.asc", "meddra_hlgt_pref_term", fields)
}

fn system_organ_class() -> Result<SchemaMapping, RegistryError> {
    let mut fields = vec![
        required("soc_code", Numeric),
        required("soc_name", Varchar(100)),
        required("soc_abbrev", Varchar(5)),
    ];
    fields.extend(legacy_codes("soc"));
    fields.push(col("soc_jart_code", Varchar(6)));
    mapping("soc.asc", "meddra_soc_term", fields)
}

fn hierarchy() -> Result<SchemaMapping, RegistryError> {
    mapping(
        "mdhier.asc",
        "meddra_md_hierarchy",
        vec![
            required("pt_code", BigInt),
            required("hlt_code", BigInt),
            required("hlgt_code", BigInt),
            required("soc_code", BigInt),
            required("pt_name", Varchar(100)),
            required("hlt_name", Varchar(100)),
            required("hlgt_name", Varchar(100)),
            required("soc_name", Varchar(100)),
            required("soc_abbrev", Varchar(5)),
            col("null_field", Varchar(10)),
            col("pt_soc_code", BigInt),
            col("primary_soc_fg", Varchar(10)),
        ],
    )
}

fn smq_list() -> Result<SchemaMapping, RegistryError> {
    mapping(
        "smq_list.asc",
        "meddra_smq_list",
        vec![
            required("smq_code", BigInt),
            required("smq_name", Varchar(100)),
            required("smq_level", BigInt),
            required("smq_description", Text),
            col("smq_source", Text),
            col("smq_note", Text),
            required("meddra_version", Varchar(5)),
            required("status", Varchar(1)),
            required("smq_algorithm", Text),
        ],
    )
}

fn smq_content() -> Result<SchemaMapping, RegistryError> {
    mapping(
        "smq_content.asc",
        "meddra_smq_content",
        vec![
            required("smq_code", BigInt),
            required("term_code", BigInt),
            required("term_level", Integer),
            required("term_scope", Integer),
            required("term_category", Varchar(1)),
            required("term_weight", Integer),
            required("term_status", Varchar(1)),
            required("term_addition_version", Varchar(5)),
            required("term_last_modified_version", Varchar(5)),
        ],
    )
}

fn release() -> Result<SchemaMapping, RegistryError> {
    mapping(
        "meddra_release.asc",
        "meddra_release",
        vec![
            required("meddra_version", Varchar(100)),
            required("language_version", Varchar(100)),
            col("null_field_a", Varchar(100)),
            col("null_field_b", Varchar(100)),
            col("null_field_c", Varchar(100)),
        ],
    )
}

/// All built-in mappings
pub(super) fn mappings() -> Result<Vec<SchemaMapping>, RegistryError> {
    Ok(vec![
        mapping(
            "hlgt_hlt.asc",
            "meddra_hlgt_hlt_comp",
            vec![col("hlgt_code", Numeric), col("hlt_code", Numeric)],
        )?,
        high_level_group_term()?,
        mapping(
            "hlt_pt.asc",
            "meddra_hlt_pref_comp",
            vec![col("hlt_code", Numeric), col("pt_code", Numeric)],
        )?,
        high_level_term()?,
        low_level_term()?,
        hierarchy()?,
        preferred_term()?,
        release()?,
        smq_content()?,
        smq_list()?,
        mapping(
            "soc_hlgt.asc",
            "meddra_soc_hlgt_comp",
            vec![col("soc_code", BigInt), col("hlgt_code", BigInt)],
        )?,
        mapping(
            "intl_ord.asc",
            "meddra_soc_intl_order",
            vec![required("intl_ord_code", BigInt), required("soc_code", BigInt)],
        )?,
        system_organ_class()?,
    ])
}
