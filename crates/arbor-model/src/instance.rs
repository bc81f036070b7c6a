use serde::{Deserialize, Serialize};

use crate::{AttributeDefId, EntityDefId, EntityId, Scalar};

fn is_false(v: &bool) -> bool {
    !*v
}

/// One stored attribute value on a live entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub attribute_def: AttributeDefId,
    pub value: Scalar,
}

/// A live data record conforming to an entity definition.
///
/// Entities link into a runtime tree via `parent`; calculations are computed
/// on demand from the template and never stored here. Soft-deleted entities
/// stay in the store but are excluded from child queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub entity_def: EntityDefId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<EntityId>,
    #[serde(default)]
    pub attributes: Vec<AttributeValue>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
}

impl Entity {
    #[must_use]
    pub fn new(entity_def: EntityDefId, parent: Option<EntityId>) -> Self {
        Self {
            id: EntityId::new(),
            entity_def,
            parent,
            attributes: Vec::new(),
            deleted: false,
        }
    }

    /// Append an attribute value, builder style.
    #[must_use]
    pub fn with_value(mut self, attribute_def: AttributeDefId, value: impl Into<Scalar>) -> Self {
        self.attributes.push(AttributeValue {
            attribute_def,
            value: value.into(),
        });
        self
    }

    /// The stored value for an attribute definition, if present.
    #[must_use]
    pub fn attribute_value(&self, id: AttributeDefId) -> Option<&Scalar> {
        self.attributes
            .iter()
            .find(|v| v.attribute_def == id)
            .map(|v| &v.value)
    }
}
