// src/schema/arrow.rs

use arrow::datatypes::{DataType, Field as ArrowField, Schema as ArrowSchema};
use std::sync::Arc;

use super::types::{DeclaredType, FieldSpec};

/// Map a declared dictionary type onto its Arrow column type.
///
/// - text    → Utf8
/// - integer → Int64
/// - real    → Float64
pub fn arrow_type_for(ty: DeclaredType) -> DataType {
    match ty {
        DeclaredType::Text => DataType::Utf8,
        DeclaredType::Integer => DataType::Int64,
        DeclaredType::Real => DataType::Float64,
    }
}

/// Build an ArrowSchema (inside an Arc) from the resolved fields. Every
/// column is nullable: null is the missing marker.
pub fn build_arrow_schema(fields: &[FieldSpec]) -> Arc<ArrowSchema> {
    let cols: Vec<ArrowField> = fields
        .iter()
        .map(|f| ArrowField::new(&f.name, arrow_type_for(f.declared_type), true))
        .collect();

    Arc::new(ArrowSchema::new(cols))
}
