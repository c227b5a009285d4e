//! `ToolId -> ToolDefinition` registry.
//!
//! Grounded on a prior tool registry's `HashMap<String, Arc<dyn Tool>>`,
//! generalized here into a definition map plus a separately keyed body
//! map, since a REPLOID tool's schema/capabilities and its executable body
//! have independent lifecycles (the body is loaded from VFS and may be
//! swapped by a verified self-modification without re-registering the
//! definition).

use std::sync::Arc;

use dashmap::DashMap;

use super::body::ToolBody;
use super::definition::ToolDefinition;
use super::schema::validate_schema_shape;
use crate::error::ToolError;

#[derive(Default)]
pub struct ToolRegistry {
    defs: DashMap<String, Arc<ToolDefinition>>,
    bodies: DashMap<String, Arc<dyn ToolBody>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, def: ToolDefinition, body: Arc<dyn ToolBody>) -> Result<(), ToolError> {
        if self.defs.contains_key(&def.id) {
            return Err(ToolError::AlreadyRegistered(def.id));
        }
        validate_schema_shape(&def.id, &def.input_schema)?;
        let id = def.id.clone();
        self.defs.insert(id.clone(), Arc::new(def));
        self.bodies.insert(id, body);
        Ok(())
    }

    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.defs.remove(id).is_some();
        self.bodies.remove(id);
        removed
    }

    pub fn resolve(&self, id: &str) -> Result<Arc<ToolDefinition>, ToolError> {
        self.defs.get(id).map(|e| Arc::clone(&e)).ok_or_else(|| ToolError::UnknownTool(id.to_string()))
    }

    pub fn resolve_body(&self, id: &str) -> Result<Arc<dyn ToolBody>, ToolError> {
        self.bodies.get(id).map(|e| Arc::clone(&e)).ok_or_else(|| ToolError::UnknownTool(id.to_string()))
    }

    pub fn list(&self) -> Vec<Arc<ToolDefinition>> {
        let mut defs: Vec<Arc<ToolDefinition>> = self.defs.iter().map(|e| Arc::clone(e.value())).collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::tools::body::ToolContext;

    struct NoopBody;

    #[async_trait]
    impl ToolBody for NoopBody {
        async fn call(&self, _input: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
            Ok(json!(null))
        }
    }

    fn def(id: &str) -> ToolDefinition {
        ToolDefinition {
            id: id.to_string(),
            description: "test".into(),
            input_schema: json!({"type": "object"}),
            capabilities: vec![],
            body_ref: format!("/tools/{id}"),
        }
    }

    #[test]
    fn register_then_resolve_round_trips() {
        let registry = ToolRegistry::new();
        registry.register(def("Add"), Arc::new(NoopBody)).unwrap();
        assert_eq!(registry.resolve("Add").unwrap().id, "Add");
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = ToolRegistry::new();
        registry.register(def("Add"), Arc::new(NoopBody)).unwrap();
        let err = registry.register(def("Add"), Arc::new(NoopBody));
        assert!(matches!(err, Err(ToolError::AlreadyRegistered(_))));
    }

    #[test]
    fn malformed_schema_is_rejected() {
        let registry = ToolRegistry::new();
        let mut bad = def("Bad");
        bad.input_schema = json!({"type": "string"});
        let err = registry.register(bad, Arc::new(NoopBody));
        assert!(matches!(err, Err(ToolError::MalformedSchema(_, _))));
    }

    #[test]
    fn unregister_removes_definition_and_body() {
        let registry = ToolRegistry::new();
        registry.register(def("Add"), Arc::new(NoopBody)).unwrap();
        assert!(registry.unregister("Add"));
        assert!(registry.resolve("Add").is_err());
    }

    #[test]
    fn list_is_sorted_by_id() {
        let registry = ToolRegistry::new();
        registry.register(def("Zeta"), Arc::new(NoopBody)).unwrap();
        registry.register(def("Alpha"), Arc::new(NoopBody)).unwrap();
        let ids: Vec<String> = registry.list().iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec!["Alpha".to_string(), "Zeta".to_string()]);
    }
}
