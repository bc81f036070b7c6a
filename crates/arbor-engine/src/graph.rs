//! Whole-template calculation dependency graph.
//!
//! Every resolved formula contributes one edge per referenced calculation.
//! The graph must be acyclic for evaluation to terminate; a cycle anywhere
//! in the template makes every calculation on it undefined, so compilation
//! rejects the whole commit.

use std::collections::HashMap;
use std::fmt;

use arbor_model::{CalculationDefId, Template};

/// A cycle through the calculation dependency graph, in reference order.
/// The first id appears again at the end of the printed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclePath(pub Vec<CalculationDefId>);

impl fmt::Display for CyclePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "circular reference: ")?;
        for (idx, id) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CyclePath {}

/// Check every compiled calculation's dependency edges for cycles.
///
/// Depth-first search with an explicit recursion stack; an edge back into
/// the stack is a cycle, returned as the offending path.
pub(crate) fn check_cycles(template: &Template) -> Result<(), CyclePath> {
    let order = template.calculation_ids();
    let mut edges: HashMap<CalculationDefId, Vec<CalculationDefId>> = HashMap::new();
    for id in &order {
        let deps = template
            .calculation(*id)
            .and_then(|(_, def)| def.compiled.as_ref())
            .map(|formula| formula.referenced_calculations())
            .unwrap_or_default();
        edges.insert(*id, deps);
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    struct Frame<'a> {
        node: CalculationDefId,
        neighbors: &'a [CalculationDefId],
        idx: usize,
    }

    let mut color: HashMap<CalculationDefId, Color> =
        order.iter().map(|id| (*id, Color::White)).collect();
    let mut stack: Vec<CalculationDefId> = Vec::new();
    let mut pos_in_stack: HashMap<CalculationDefId, usize> = HashMap::new();

    for start in &order {
        if color.get(start) != Some(&Color::White) {
            continue;
        }

        let mut frames = vec![Frame {
            node: *start,
            neighbors: edges.get(start).map(Vec::as_slice).unwrap_or_default(),
            idx: 0,
        }];
        stack.push(*start);
        pos_in_stack.insert(*start, stack.len() - 1);
        color.insert(*start, Color::Gray);

        while let Some(frame) = frames.last_mut() {
            if frame.idx >= frame.neighbors.len() {
                color.insert(frame.node, Color::Black);
                pos_in_stack.remove(&frame.node);
                stack.pop();
                frames.pop();
                continue;
            }

            let next = frame.neighbors[frame.idx];
            frame.idx += 1;

            match color.get(&next).copied().unwrap_or(Color::Black) {
                Color::White => {
                    color.insert(next, Color::Gray);
                    stack.push(next);
                    pos_in_stack.insert(next, stack.len() - 1);
                    frames.push(Frame {
                        node: next,
                        neighbors: edges.get(&next).map(Vec::as_slice).unwrap_or_default(),
                        idx: 0,
                    });
                }
                Color::Gray => {
                    let start_idx = pos_in_stack.get(&next).copied().unwrap_or(0);
                    let mut cycle = stack[start_idx..].to_vec();
                    cycle.push(next);
                    return Err(CyclePath(cycle));
                }
                Color::Black => {}
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_model::{CalculationDef, DataType, Expr, Formula, FuncName, RefToken};

    /// A trunk-only template whose calculations carry hand-installed
    /// compiled trees shaped as `calc -> [deps]`.
    fn template_with_edges(
        count: usize,
        edges: &[(usize, usize)],
    ) -> (Template, Vec<CalculationDefId>) {
        let mut template = Template::new("Graph Names", "Trunk Node");
        let trunk = template.trunk_id();
        let ids: Vec<CalculationDefId> = (0..count)
            .map(|i| {
                template
                    .add_calculation(
                        trunk,
                        CalculationDef::new(trunk, format!("Calc Number {i}"), DataType::Decimal, "1"),
                    )
                    .unwrap()
            })
            .collect();
        for id in &ids {
            let deps: Vec<Expr> = edges
                .iter()
                .filter(|(from, _)| ids[*from] == *id)
                .map(|(_, to)| Expr::Ref(RefToken::Calculation(ids[*to])))
                .collect();
            template.calculation_mut(*id).unwrap().compiled =
                Some(Formula::new(vec![Expr::Call(FuncName::Sum, deps)]));
        }
        (template, ids)
    }

    #[test]
    fn acyclic_graph_is_accepted() {
        // Diamond: 0 -> 1 -> 3, 0 -> 2 -> 3.
        let (template, _) = template_with_edges(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        assert_eq!(check_cycles(&template), Ok(()));
    }

    #[test]
    fn two_cycle_is_rejected() {
        let (template, ids) = template_with_edges(2, &[(0, 1), (1, 0)]);
        let cycle = check_cycles(&template).unwrap_err();
        assert!(cycle.0.len() >= 3);
        assert_eq!(cycle.0.first(), cycle.0.last());
        assert!(cycle.0.contains(&ids[0]) && cycle.0.contains(&ids[1]));
    }

    #[test]
    fn self_reference_is_rejected() {
        let (template, ids) = template_with_edges(1, &[(0, 0)]);
        let cycle = check_cycles(&template).unwrap_err();
        assert_eq!(cycle.0, vec![ids[0], ids[0]]);
    }

    #[test]
    fn longer_cycle_reports_a_path_through_it() {
        let (template, ids) = template_with_edges(4, &[(0, 1), (1, 2), (2, 3), (3, 1)]);
        let cycle = check_cycles(&template).unwrap_err();
        assert_eq!(cycle.0.first(), cycle.0.last());
        assert!(cycle.0.contains(&ids[1]) && cycle.0.contains(&ids[3]));
        assert!(!cycle.0.contains(&ids[0]));
    }

    #[test]
    fn uncompiled_calculations_contribute_no_edges() {
        let mut template = Template::new("Graph Names", "Trunk Node");
        let trunk = template.trunk_id();
        template
            .add_calculation(
                trunk,
                CalculationDef::new(trunk, "Calc Alone", DataType::Decimal, "1"),
            )
            .unwrap();
        assert_eq!(check_cycles(&template), Ok(()));
    }

    #[test]
    fn cycle_display_joins_ids_with_arrows() {
        let (template, _) = template_with_edges(2, &[(0, 1), (1, 0)]);
        let cycle = check_cycles(&template).unwrap_err();
        let text = cycle.to_string();
        assert!(text.starts_with("circular reference: "), "{text}");
        assert!(text.contains(" -> "), "{text}");
    }
}
