use serde::{Deserialize, Serialize};

use crate::{
    canonical_name, AttributeDefId, CalculationDefId, Constraints, DataType, EntityDefId,
    Formula, Scalar,
};

/// A stored-field definition: one typed, constrained piece of information an
/// entity carries. If an entity definition is like a table, an attribute
/// definition is like a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDef {
    pub id: AttributeDefId,
    pub parent: EntityDefId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub data_type: DataType,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default = "default_scalar")]
    pub default_value: Scalar,
}

fn default_scalar() -> Scalar {
    Scalar::Null
}

impl AttributeDef {
    #[must_use]
    pub fn new(parent: EntityDefId, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            id: AttributeDefId::new(),
            parent,
            name: name.into(),
            description: String::new(),
            data_type,
            constraints: Constraints::default(),
            default_value: Scalar::Null,
        }
    }
}

/// A computed-field definition. Instead of describing a value to be stored,
/// a calculation describes a formula over relatives in the tree; the value is
/// recomputed on every read and never persisted on instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationDef {
    pub id: CalculationDefId,
    pub parent: EntityDefId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub data_type: DataType,
    /// Author-written formula source text.
    pub formula: String,
    /// Resolved formula tree, derived from `formula` and the template shape
    /// by compilation. Never edited directly; cleared whenever the source
    /// text changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiled: Option<Formula>,
}

impl CalculationDef {
    #[must_use]
    pub fn new(
        parent: EntityDefId,
        name: impl Into<String>,
        data_type: DataType,
        formula: impl Into<String>,
    ) -> Self {
        Self {
            id: CalculationDefId::new(),
            parent,
            name: name.into(),
            description: String::new(),
            data_type,
            formula: formula.into(),
            compiled: None,
        }
    }
}

/// One node of the schema tree: a collection of attribute definitions,
/// calculation definitions, and child entity definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    pub id: EntityDefId,
    /// `None` only for the trunk node.
    pub parent: Option<EntityDefId>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDef>,
    #[serde(default)]
    pub calculations: Vec<CalculationDef>,
    /// Ordered child entity definitions, stored by id in the template arena.
    #[serde(default)]
    pub children: Vec<EntityDefId>,
}

impl EntityDef {
    #[must_use]
    pub fn new(parent: Option<EntityDefId>, name: impl Into<String>) -> Self {
        Self {
            id: EntityDefId::new(),
            parent,
            name: name.into(),
            description: String::new(),
            attributes: Vec::new(),
            calculations: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Find an attribute by the canonical form of its name.
    #[must_use]
    pub fn attribute_by_name(&self, canonical: &str) -> Option<&AttributeDef> {
        self.attributes
            .iter()
            .find(|a| canonical_name(&a.name) == canonical)
    }

    /// Find a calculation by the canonical form of its name.
    #[must_use]
    pub fn calculation_by_name(&self, canonical: &str) -> Option<&CalculationDef> {
        self.calculations
            .iter()
            .find(|c| canonical_name(&c.name) == canonical)
    }

    /// Whether any attribute, calculation, or (per the caller's child-name
    /// list) sibling element already uses this canonical name.
    #[must_use]
    pub fn has_member_named(&self, canonical: &str) -> bool {
        self.attribute_by_name(canonical).is_some() || self.calculation_by_name(canonical).is_some()
    }
}
