use serde::{Deserialize, Serialize};

/// The company acting on the dashboard, as asserted by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompanyIdentity {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
}

impl CompanyIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            company_name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.display_name = Some(name.clone());
        self.company_name = Some(name);
        self
    }

    /// Name written onto deliveries and comments.
    pub fn label(&self) -> &str {
        self.company_name
            .as_deref()
            .or(self.display_name.as_deref())
            .filter(|name| !name.is_empty())
            .unwrap_or("Empresa")
    }

    pub fn answers_to_name(&self, name: &str) -> bool {
        !name.is_empty()
            && (self.display_name.as_deref() == Some(name)
                || self.company_name.as_deref() == Some(name))
    }
}

/// User profile served by the relational backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompanyProfile {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub nombre_completo: Option<String>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub ciudad: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct City {
    pub id: i64,
    pub nombre: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProfileSource {
    Backend,
    Document,
    Identity,
}

/// Dashboard header data merged from backend and document store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompanyOverview {
    pub id: String,
    pub name: String,
    pub verified: bool,
    pub city: Option<String>,
    pub source: ProfileSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverProfile {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub rating: f64,
    pub photo: String,
}

impl DriverProfile {
    pub fn placeholder(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: "Repartidor".to_string(),
            phone: String::new(),
            rating: 0.0,
            photo: String::new(),
        }
    }
}
