use crate::mapper::ResourceKind;
use crate::metadata;
use crate::schema::{FieldSpec, FieldType, ResourceSchema, Scope};

pub const DESCRIPTION: &str = "description";
pub const GLOBAL_DEFAULT: &str = "global_default";
pub const VALUE: &str = "value";

/// `scheduling.k8s.io/v1` PriorityClass: cluster scoped, name may be
/// generated, and the server does not echo `generateName` back.
pub struct PriorityClass {
    schema: ResourceSchema,
}

impl PriorityClass {
    pub fn new() -> Self {
        let mut schema = ResourceSchema::new("scheduling.k8s.io/v1", "PriorityClass", Scope::Cluster);
        for f in metadata::metadata_fields("priority class", false, true) {
            schema = schema.field(f);
        }
        let schema = schema
            .field(
                FieldSpec::new(DESCRIPTION, &["description"], FieldType::String)
                    .default_value("")
                    .describe("An arbitrary string that usually provides guidelines on when this priority class should be used."),
            )
            .field(
                FieldSpec::new(GLOBAL_DEFAULT, &["globalDefault"], FieldType::Bool)
                    .default_value(false)
                    .describe("Whether this priority class is used for pods without a priorityClassName."),
            )
            .field(
                FieldSpec::new(VALUE, &["value"], FieldType::INT32)
                    .required()
                    .authoritative()
                    .describe("The integer priority value pods receive."),
            );
        Self { schema }
    }
}

impl Default for PriorityClass {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceKind for PriorityClass {
    fn name(&self) -> &'static str {
        "priority_class"
    }

    fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    fn omits_generate_name_on_read(&self) -> bool {
        true
    }
}
