use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::FieldPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Add,
    Remove,
    Replace,
    Test,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Add => "add",
            OpKind::Remove => "remove",
            OpKind::Replace => "replace",
            OpKind::Test => "test",
        }
    }
}

/// One field-level operation against the nested representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: OpKind,
    pub path: FieldPath,
    pub value: Option<Json>,
}

impl PatchOp {
    pub fn add(path: FieldPath, value: Json) -> Self {
        Self { op: OpKind::Add, path, value: Some(value) }
    }

    pub fn replace(path: FieldPath, value: Json) -> Self {
        Self { op: OpKind::Replace, path, value: Some(value) }
    }

    pub fn remove(path: FieldPath) -> Self {
        Self { op: OpKind::Remove, path, value: None }
    }

    pub fn test(path: FieldPath, value: Json) -> Self {
        Self { op: OpKind::Test, path, value: Some(value) }
    }

    /// Wire form: `{"op": "...", "path": "/json/pointer", "value": ...}`.
    pub fn to_json(&self) -> Json {
        let mut obj = serde_json::Map::new();
        obj.insert("op".into(), Json::String(self.op.as_str().into()));
        obj.insert("path".into(), Json::String(self.path.to_pointer()));
        if let Some(v) = &self.value {
            obj.insert("value".into(), v.clone());
        }
        Json::Object(obj)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

/// Ordered sequence of patch operations. Order is significant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchDocument {
    ops: Vec<PatchOp>,
}

impl PatchDocument {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, op: PatchOp) { self.ops.push(op); }
    pub fn ops(&self) -> &[PatchOp] { &self.ops }
    pub fn len(&self) -> usize { self.ops.len() }
    pub fn is_empty(&self) -> bool { self.ops.is_empty() }
    pub fn iter(&self) -> std::slice::Iter<'_, PatchOp> { self.ops.iter() }

    /// Prefix a `test` on `/metadata/resourceVersion` so the store rejects the
    /// patch if the object changed since it was last read. An empty document
    /// stays empty.
    pub fn guarded(self, resource_version: &str) -> Self {
        if self.ops.is_empty() {
            return self;
        }
        let mut ops = Vec::with_capacity(self.ops.len() + 1);
        ops.push(PatchOp::test(
            FieldPath::from_keys(&["metadata", "resourceVersion"]),
            Json::String(resource_version.to_string()),
        ));
        ops.extend(self.ops);
        Self { ops }
    }

    pub fn summary(&self) -> DiffSummary {
        let mut s = DiffSummary::default();
        for op in &self.ops {
            match op.op {
                OpKind::Add => s.adds += 1,
                OpKind::Replace => s.updates += 1,
                OpKind::Remove => s.removes += 1,
                OpKind::Test => {}
            }
        }
        s
    }

    /// RFC 6902 wire representation.
    pub fn to_json(&self) -> Json {
        Json::Array(self.ops.iter().map(PatchOp::to_json).collect())
    }
}

impl Extend<PatchOp> for PatchDocument {
    fn extend<I: IntoIterator<Item = PatchOp>>(&mut self, iter: I) {
        self.ops.extend(iter);
    }
}

impl FromIterator<PatchOp> for PatchDocument {
    fn from_iter<I: IntoIterator<Item = PatchOp>>(iter: I) -> Self {
        Self { ops: iter.into_iter().collect() }
    }
}

impl<'a> IntoIterator for &'a PatchDocument {
    type Item = &'a PatchOp;
    type IntoIter = std::slice::Iter<'a, PatchOp>;
    fn into_iter(self) -> Self::IntoIter { self.ops.iter() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_form_uses_json_pointers() {
        let doc: PatchDocument = vec![
            PatchOp::replace(FieldPath::root().child("value"), json!(900000)),
            PatchOp::remove(FieldPath::from_keys(&["metadata", "labels"]).child("team/owner")),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            doc.to_json(),
            json!([
                {"op": "replace", "path": "/value", "value": 900000},
                {"op": "remove", "path": "/metadata/labels/team~1owner"}
            ])
        );
    }

    #[test]
    fn guarded_prefixes_a_test_op() {
        let doc: PatchDocument = std::iter::once(PatchOp::replace(FieldPath::root().child("value"), json!(1))).collect();
        let g = doc.guarded("42");
        assert_eq!(g.len(), 2);
        assert_eq!(g.ops()[0].op, OpKind::Test);
        assert_eq!(g.ops()[0].path.to_pointer(), "/metadata/resourceVersion");
        assert!(PatchDocument::new().guarded("42").is_empty());
    }

    #[test]
    fn summary_counts_by_kind() {
        let doc: PatchDocument = vec![
            PatchOp::add(FieldPath::root().child("a"), json!(1)),
            PatchOp::replace(FieldPath::root().child("b"), json!(1)),
            PatchOp::replace(FieldPath::root().child("c"), json!(1)),
            PatchOp::remove(FieldPath::root().child("d")),
        ]
        .into_iter()
        .collect();
        assert_eq!(doc.summary(), DiffSummary { adds: 1, updates: 2, removes: 1 });
    }
}
