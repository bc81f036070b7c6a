use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    canonical_name, validate_element_name, AttributeDef, AttributeDefId, CalculationDef,
    CalculationDefId, EntityDef, EntityDefId, NameError, TemplateId,
};

/// Lifecycle status of a template.
///
/// Only drafts may be edited or recompiled. A published template is the
/// pattern live data conforms to; deprecated templates were published once
/// and are kept immutable for their existing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateStatus {
    Draft,
    Published,
    Deprecated,
}

/// Errors raised by template structure edits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("entity definition not found: {0}")]
    UnknownNode(EntityDefId),
    #[error("calculation definition not found: {0}")]
    UnknownCalculation(CalculationDefId),
    #[error("invalid name: {0}")]
    InvalidName(#[from] NameError),
    #[error("an element named `{0}` already exists under this node")]
    DuplicateSiblingName(String),
    #[error("template is not a draft and cannot be edited")]
    Immutable,
}

/// A template: a whole schema tree, rooted at a trunk entity definition.
///
/// Nodes live in an arena keyed by [`EntityDefId`]; parent/child navigation is
/// index lookup on explicit id fields rather than pointer chasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub status: TemplateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<DateTime<Utc>>,
    /// Template this one was copied from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<TemplateId>,
    trunk: EntityDefId,
    nodes: BTreeMap<EntityDefId, EntityDef>,
}

impl Template {
    /// Create a draft template with an empty trunk node.
    #[must_use]
    pub fn new(name: impl Into<String>, trunk_name: impl Into<String>) -> Self {
        let trunk = EntityDef::new(None, trunk_name);
        let trunk_id = trunk.id;
        let mut nodes = BTreeMap::new();
        nodes.insert(trunk_id, trunk);
        Self {
            id: TemplateId::new(),
            name: name.into(),
            status: TemplateStatus::Draft,
            published_date: None,
            source_id: None,
            trunk: trunk_id,
            nodes,
        }
    }

    #[must_use]
    pub fn trunk_id(&self) -> EntityDefId {
        self.trunk
    }

    #[must_use]
    pub fn trunk(&self) -> &EntityDef {
        &self.nodes[&self.trunk]
    }

    #[must_use]
    pub fn node(&self, id: EntityDefId) -> Option<&EntityDef> {
        self.nodes.get(&id)
    }

    /// The parent node of `id`, or `None` for the trunk.
    #[must_use]
    pub fn parent_of(&self, id: EntityDefId) -> Option<&EntityDef> {
        self.nodes.get(&id)?.parent.and_then(|p| self.nodes.get(&p))
    }

    /// All nodes, in depth-first order from the trunk.
    #[must_use]
    pub fn nodes_depth_first(&self) -> Vec<&EntityDef> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.trunk];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get(&id) {
                out.push(node);
                for child in node.children.iter().rev() {
                    stack.push(*child);
                }
            }
        }
        out
    }

    /// Find an attribute definition and its owning node.
    #[must_use]
    pub fn attribute(&self, id: AttributeDefId) -> Option<(&EntityDef, &AttributeDef)> {
        self.nodes.values().find_map(|node| {
            node.attributes
                .iter()
                .find(|a| a.id == id)
                .map(|a| (node, a))
        })
    }

    /// Find a calculation definition and its owning node.
    #[must_use]
    pub fn calculation(&self, id: CalculationDefId) -> Option<(&EntityDef, &CalculationDef)> {
        self.nodes.values().find_map(|node| {
            node.calculations
                .iter()
                .find(|c| c.id == id)
                .map(|c| (node, c))
        })
    }

    pub fn calculation_mut(&mut self, id: CalculationDefId) -> Option<&mut CalculationDef> {
        self.nodes
            .values_mut()
            .find_map(|node| node.calculations.iter_mut().find(|c| c.id == id))
    }

    /// Ids of every calculation in the template, in depth-first node order.
    #[must_use]
    pub fn calculation_ids(&self) -> Vec<CalculationDefId> {
        self.nodes_depth_first()
            .iter()
            .flat_map(|node| node.calculations.iter().map(|c| c.id))
            .collect()
    }

    /// Add a child entity definition under `parent`.
    pub fn add_child_entity(
        &mut self,
        parent: EntityDefId,
        name: impl Into<String>,
    ) -> Result<EntityDefId, TemplateError> {
        self.ensure_draft()?;
        let name = name.into();
        self.ensure_name_free(parent, &name)?;

        let node = EntityDef::new(Some(parent), name);
        let id = node.id;
        self.nodes
            .get_mut(&parent)
            .ok_or(TemplateError::UnknownNode(parent))?
            .children
            .push(id);
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Add an attribute definition to `node`.
    pub fn add_attribute(
        &mut self,
        node: EntityDefId,
        attribute: AttributeDef,
    ) -> Result<AttributeDefId, TemplateError> {
        self.ensure_draft()?;
        self.ensure_name_free(node, &attribute.name)?;
        let id = attribute.id;
        self.nodes
            .get_mut(&node)
            .ok_or(TemplateError::UnknownNode(node))?
            .attributes
            .push(attribute);
        Ok(id)
    }

    /// Add a calculation definition to `node`. The compiled tree starts
    /// empty; run the engine's template compiler to populate it.
    pub fn add_calculation(
        &mut self,
        node: EntityDefId,
        calculation: CalculationDef,
    ) -> Result<CalculationDefId, TemplateError> {
        self.ensure_draft()?;
        self.ensure_name_free(node, &calculation.name)?;
        let id = calculation.id;
        self.nodes
            .get_mut(&node)
            .ok_or(TemplateError::UnknownNode(node))?
            .calculations
            .push(calculation);
        Ok(id)
    }

    /// Replace a calculation's formula source text, clearing the stale
    /// compiled tree.
    pub fn set_formula(
        &mut self,
        id: CalculationDefId,
        formula: impl Into<String>,
    ) -> Result<(), TemplateError> {
        self.ensure_draft()?;
        let calc = self
            .calculation_mut(id)
            .ok_or(TemplateError::UnknownCalculation(id))?;
        calc.formula = formula.into();
        calc.compiled = None;
        Ok(())
    }

    fn ensure_draft(&self) -> Result<(), TemplateError> {
        if self.status == TemplateStatus::Draft {
            Ok(())
        } else {
            Err(TemplateError::Immutable)
        }
    }

    /// Names must be unique among siblings: attributes, calculations, and
    /// child entities under one node share a namespace.
    fn ensure_name_free(&self, node_id: EntityDefId, name: &str) -> Result<(), TemplateError> {
        validate_element_name(name)?;
        let node = self
            .nodes
            .get(&node_id)
            .ok_or(TemplateError::UnknownNode(node_id))?;
        let canonical = canonical_name(name);
        let child_clash = node.children.iter().any(|c| {
            self.nodes
                .get(c)
                .is_some_and(|child| canonical_name(&child.name) == canonical)
        });
        if node.has_member_named(&canonical) || child_clash {
            return Err(TemplateError::DuplicateSiblingName(name.to_string()));
        }
        Ok(())
    }
}
