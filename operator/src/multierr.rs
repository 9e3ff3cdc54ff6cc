use thiserror::Error;

/// Why a single operator or operand could not be reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureKind {
    #[error("OperandRegistry {0} not found")]
    MissingRegistry(String),

    #[error("operator not listed in OperandRegistry {0}")]
    MissingOperator(String),

    #[error("CatalogSource {0} not found")]
    MissingCatalogSource(String),

    #[error("invalid OperandConfig: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Store(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityError {
    pub entity: String,
    pub kind: FailureKind,
}

/// Failures collected across independent operators and operands in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{} sub-resource(s) failed{}", .errors.len(), describe(.errors))]
pub struct MultiErr {
    errors: Vec<EntityError>,
}

impl MultiErr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entity: impl Into<String>, kind: FailureKind) {
        self.errors.push(EntityError {
            entity: entity.into(),
            kind,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[EntityError] {
        &self.errors
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.errors.iter().any(|e| e.entity == entity)
    }
}

fn describe(errors: &[EntityError]) -> String {
    errors
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let sep = if i == 0 { ": " } else { "; " };
            format!("{sep}{}: {}", e.entity, e.kind)
        })
        .collect()
}
