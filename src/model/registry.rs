use crate::error::{Result, StemError};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    pub manifest: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Registry {
    pub default: String,
    pub models: Vec<RegistryEntry>,
}

const REGISTRY_JSON: &str = include_str!("../../models/registry.json");

impl Registry {
    pub fn bundled() -> Result<Self> {
        Self::from_json(REGISTRY_JSON)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let reg: Registry =
            serde_json::from_str(json).map_err(|e| StemError::Registry(e.to_string()))?;
        if !reg.models.iter().any(|m| m.name == reg.default) {
            return Err(StemError::Registry(format!(
                "default model `{}` is not listed",
                reg.default
            )));
        }
        Ok(reg)
    }

    /// Empty name means the registry default.
    pub fn canonical_name(&self, model_name: &str) -> Result<String> {
        let target = if model_name.is_empty() {
            self.default.as_str()
        } else {
            model_name
        };
        self.models
            .iter()
            .find(|m| m.name == target)
            .map(|m| m.name.clone())
            .ok_or_else(|| StemError::ModelNotFound(target.to_string()))
    }

    pub fn manifest_url(&self, model_name: &str) -> Result<String> {
        let name = self.canonical_name(model_name)?;
        self.models
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.manifest.clone())
            .ok_or(StemError::ModelNotFound(name))
    }

    pub fn names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name.clone()).collect()
    }
}

pub fn resolve_manifest_url(model_name: &str) -> Result<String> {
    Registry::bundled()?.manifest_url(model_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_registry_resolves_default() {
        let reg = Registry::bundled().unwrap();
        assert_eq!(reg.canonical_name("").unwrap(), reg.default);
        assert!(reg.names().contains(&"htdemucs".to_string()));
    }

    #[test]
    fn unknown_model_is_model_not_found() {
        let reg = Registry::bundled().unwrap();
        match reg.manifest_url("no-such-model") {
            Err(StemError::ModelNotFound(name)) => assert_eq!(name, "no-such-model"),
            other => panic!("expected ModelNotFound, got {other:?}"),
        }
    }

    #[test]
    fn registry_without_listed_default_is_rejected() {
        let json = r#"{"default":"a","models":[{"name":"b","manifest":"http://x"}]}"#;
        assert!(Registry::from_json(json).is_err());
    }
}
