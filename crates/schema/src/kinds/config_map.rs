use once_cell::sync::Lazy;
use regex::Regex;
use steward_core::{FlatModel, ValidationError};

use crate::mapper::ResourceKind;
use crate::metadata;
use crate::schema::{FieldSpec, FieldType, ResourceSchema, Scope};

pub const DATA: &str = "data";

static DATA_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-._a-zA-Z0-9]+$").unwrap());

/// `v1` ConfigMap: namespaced, string data only.
pub struct ConfigMap {
    schema: ResourceSchema,
}

impl ConfigMap {
    pub fn new() -> Self {
        let mut schema = ResourceSchema::new("v1", "ConfigMap", Scope::Namespaced);
        for f in metadata::metadata_fields("config map", true, true) {
            schema = schema.field(f);
        }
        let schema = schema.field(
            FieldSpec::new(DATA, &["data"], FieldType::StringMap)
                .authoritative()
                .describe("Configuration data for pods to consume."),
        );
        Self { schema }
    }
}

impl Default for ConfigMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceKind for ConfigMap {
    fn name(&self) -> &'static str {
        "config_map"
    }

    fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    fn validate(&self, model: &FlatModel) -> Result<(), ValidationError> {
        let Some(data) = model.get_map(DATA)? else { return Ok(()) };
        for key in data.keys() {
            if key.len() > 253 || key == "." || key == ".." || !DATA_KEY.is_match(key) {
                return Err(ValidationError::new(DATA, format!("{key:?} is not a valid config key")));
            }
        }
        Ok(())
    }
}
