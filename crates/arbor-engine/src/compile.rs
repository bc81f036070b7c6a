//! Whole-template compilation.
//!
//! Any edit to a calculation can perturb the scope of every other
//! calculation (scope depends on tree shape), so compilation always
//! re-parses and re-resolves the template's entire calculation set, then
//! validates the dependency graph as a whole.

use arbor_model::{Template, TemplateStatus};

use crate::error::CompileError;
use crate::resolve::ResolveErrorKind;
use crate::{graph, parser, resolve};

/// Parse, resolve, and validate every calculation in a draft template.
///
/// Returns a new template with every calculation's compiled tree populated.
/// The input is never modified: a failed compile leaves the caller's prior
/// state fully intact, making the commit atomic.
pub fn compile_template(template: &Template) -> Result<Template, CompileError> {
    if template.status != TemplateStatus::Draft {
        return Err(CompileError::NotDraft);
    }

    let mut compiled = template.clone();
    for calc_id in template.calculation_ids() {
        let (owner, def) = template
            .calculation(calc_id)
            .expect("calculation_ids only yields existing calculations");

        let raw = parser::parse(&def.formula).map_err(|source| CompileError::Parse {
            calculation: calc_id,
            source,
        })?;
        let resolved =
            resolve::resolve_formula(&raw, owner, template).map_err(|kind| match kind {
                ResolveErrorKind::Scope { name } => CompileError::Scope {
                    calculation: calc_id,
                    name,
                },
                ResolveErrorKind::UnsupportedFunction { name } => {
                    CompileError::UnsupportedFunction {
                        calculation: calc_id,
                        name,
                    }
                }
            })?;

        log::debug!(
            "compiled calculation {calc_id} ({} references)",
            resolved.referenced_calculations().len()
        );
        compiled
            .calculation_mut(calc_id)
            .expect("cloned template has the same calculations")
            .compiled = Some(resolved);
    }

    graph::check_cycles(&compiled).map_err(CompileError::CircularReference)?;
    Ok(compiled)
}
