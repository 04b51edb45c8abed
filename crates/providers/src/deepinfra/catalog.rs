use serde::Deserialize;

/// One row from the featured-models endpoint. Unknown `type` values land on
/// `Other` so a new kind upstream cannot break the fetch.
#[derive(Clone, Debug, Deserialize)]
pub struct ModelEntry {
    pub model_name: String,
    #[serde(rename = "type")]
    pub kind: ModelKind,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    TextGeneration,
    #[serde(other)]
    Other,
}

/// Text-generation models known to the service. Filled once by
/// `DeepinfraClient::init` and only read afterwards.
#[derive(Clone, Debug, Default)]
pub struct ModelCatalog {
    entries: Vec<ModelEntry>,
}

impl ModelCatalog {
    pub fn from_entries(entries: Vec<ModelEntry>) -> Self {
        let entries = entries
            .into_iter()
            .filter(|e| e.kind == ModelKind::TextGeneration)
            .collect();
        Self { entries }
    }

    /// Exact-match lookup: a cataloged identifier passes through, anything
    /// else falls back to the caller's default.
    pub fn resolve<'a>(&'a self, requested: Option<&'a str>, default: &'a str) -> &'a str {
        match requested {
            Some(name) if self.entries.iter().any(|e| e.model_name == name) => name,
            _ => default,
        }
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.model_name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
