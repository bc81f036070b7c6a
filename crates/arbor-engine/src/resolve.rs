//! Relative-name resolution.
//!
//! A calculation's formula may reference, by name, fields on its own node
//! (`.name`), fields on the parent node (`..name`), and fields on a child
//! entity definition (`.child.name`). Resolution rewrites those names into
//! tagged absolute ids and verifies that every reference — including any
//! pre-tagged id smuggled into the formula text — stays inside the
//! calculation's scope.

use std::collections::HashSet;

use arbor_model::{
    canonical_name, AttributeDefId, CalculationDefId, EntityDef, Expr, Formula, RefToken,
    Template,
};

/// Resolution failures, wrapped with the owning calculation id by the
/// template compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ResolveErrorKind {
    Scope { name: String },
    UnsupportedFunction { name: String },
}

/// The set of ids a calculation on `owner` may reference.
#[derive(Debug, Default)]
pub(crate) struct ScopeSet {
    attributes: HashSet<AttributeDefId>,
    calculations: HashSet<CalculationDefId>,
    child_attributes: HashSet<AttributeDefId>,
    child_calculations: HashSet<CalculationDefId>,
}

impl ScopeSet {
    pub(crate) fn contains(&self, token: &RefToken) -> bool {
        match token {
            RefToken::Attribute(id) => self.attributes.contains(id),
            RefToken::Calculation(id) => self.calculations.contains(id),
            RefToken::ChildAttributes(id) => self.child_attributes.contains(id),
            RefToken::ChildCalculations(id) => self.child_calculations.contains(id),
        }
    }
}

/// Compute the visible-id scope for calculations owned by `owner`: the
/// node's own fields, the parent node's fields, and the fields of each
/// child entity definition.
pub(crate) fn scope_for(template: &Template, owner: &EntityDef) -> ScopeSet {
    let mut scope = ScopeSet::default();

    for attr in &owner.attributes {
        scope.attributes.insert(attr.id);
    }
    for calc in &owner.calculations {
        scope.calculations.insert(calc.id);
    }

    if let Some(parent) = template.parent_of(owner.id) {
        for attr in &parent.attributes {
            scope.attributes.insert(attr.id);
        }
        for calc in &parent.calculations {
            scope.calculations.insert(calc.id);
        }
    }

    for child_id in &owner.children {
        let Some(child) = template.node(*child_id) else {
            continue;
        };
        for attr in &child.attributes {
            scope.child_attributes.insert(attr.id);
        }
        for calc in &child.calculations {
            scope.child_calculations.insert(calc.id);
        }
    }

    scope
}

/// A parsed relative name.
#[derive(Debug, PartialEq, Eq)]
enum Relative {
    Sibling(String),
    Uncle(String),
    Nephew { child: String, field: String },
}

fn is_word(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_relative(s: &str) -> Option<Relative> {
    let rest = s.strip_prefix('.')?;
    if let Some(uncle) = rest.strip_prefix('.') {
        return is_word(uncle).then(|| Relative::Uncle(uncle.to_string()));
    }
    if let Some((child, field)) = rest.split_once('.') {
        return (is_word(child) && is_word(field)).then(|| Relative::Nephew {
            child: child.to_string(),
            field: field.to_string(),
        });
    }
    is_word(rest).then(|| Relative::Sibling(rest.to_string()))
}

/// Resolve every name and validate every reference in `formula`.
///
/// Returns a new tree; the input is untouched. Singleton parenthesized
/// groups collapse to their single element so persisted trees contain no
/// grouping artifacts.
pub(crate) fn resolve_formula(
    formula: &Formula,
    owner: &EntityDef,
    template: &Template,
) -> Result<Formula, ResolveErrorKind> {
    let scope = scope_for(template, owner);
    let items = resolve_items(formula.items(), owner, template, &scope)?;
    Ok(Formula::new(items))
}

fn resolve_items(
    items: &[Expr],
    owner: &EntityDef,
    template: &Template,
    scope: &ScopeSet,
) -> Result<Vec<Expr>, ResolveErrorKind> {
    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        match item {
            Expr::Literal(text) => {
                // A bare word directly before a parenthesized group is call
                // syntax for a function outside the allow-list.
                if looks_like_function_word(text)
                    && matches!(items.get(idx + 1), Some(Expr::Group(_)))
                {
                    return Err(ResolveErrorKind::UnsupportedFunction { name: text.clone() });
                }
                out.push(Expr::Literal(text.clone()));
            }
            Expr::Name(name) => {
                out.push(Expr::Ref(resolve_relative(name, owner, template)?));
            }
            Expr::Ref(token) => {
                if !scope.contains(token) {
                    return Err(ResolveErrorKind::Scope {
                        name: token.encode(),
                    });
                }
                out.push(Expr::Ref(*token));
            }
            Expr::Call(func, args) => {
                out.push(Expr::Call(
                    *func,
                    resolve_items(args, owner, template, scope)?,
                ));
            }
            Expr::Group(inner) => {
                let mut inner = resolve_items(inner, owner, template, scope)?;
                if inner.len() == 1 {
                    out.push(inner.pop().expect("length checked"));
                } else {
                    out.push(Expr::Group(inner));
                }
            }
        }
    }
    Ok(out)
}

fn looks_like_function_word(text: &str) -> bool {
    text.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) && is_word(text)
}

/// Rewrite one relative name into a tagged id. A calculation with the same
/// canonical name as an attribute shadows it.
fn resolve_relative(
    name: &str,
    owner: &EntityDef,
    template: &Template,
) -> Result<RefToken, ResolveErrorKind> {
    let out_of_scope = || ResolveErrorKind::Scope {
        name: name.to_string(),
    };

    let Some(relative) = parse_relative(name) else {
        return Err(out_of_scope());
    };

    match relative {
        Relative::Sibling(field) => {
            if let Some(calc) = owner.calculation_by_name(&field) {
                return Ok(RefToken::Calculation(calc.id));
            }
            if let Some(attr) = owner.attribute_by_name(&field) {
                return Ok(RefToken::Attribute(attr.id));
            }
            Err(out_of_scope())
        }
        Relative::Uncle(field) => {
            let Some(parent) = template.parent_of(owner.id) else {
                return Err(out_of_scope());
            };
            if let Some(calc) = parent.calculation_by_name(&field) {
                return Ok(RefToken::Calculation(calc.id));
            }
            if let Some(attr) = parent.attribute_by_name(&field) {
                return Ok(RefToken::Attribute(attr.id));
            }
            Err(out_of_scope())
        }
        Relative::Nephew { child, field } => {
            let node = owner
                .children
                .iter()
                .filter_map(|id| template.node(*id))
                .find(|n| canonical_name(&n.name) == child)
                .ok_or_else(out_of_scope)?;
            if let Some(calc) = node.calculation_by_name(&field) {
                return Ok(RefToken::ChildCalculations(calc.id));
            }
            if let Some(attr) = node.attribute_by_name(&field) {
                return Ok(RefToken::ChildAttributes(attr.id));
            }
            Err(out_of_scope())
        }
    }
}
