//! Runtime evaluation of compiled formulas against live entities.
//!
//! Evaluation is synchronous structural recursion with no shared mutable
//! state: it reads the template, one entity snapshot, and a read-only
//! [`InstanceStore`], and writes nothing. Reference leaves fetch stored
//! values from the subject entity or its parent, fan out across live
//! children, or recurse into other calculations.
//!
//! The compile-time cycle check covers the *template* dependency graph
//! only; a malformed store (an entity linked as its own ancestor, or a
//! hand-edited compiled tree) could still recurse without bound. Every
//! recursive step therefore passes through a guard that tracks the active
//! (entity, calculation) set and a depth cap.

use std::cell::Cell;
use std::collections::HashSet;

use arbor_model::{
    AttributeDefId, CalculationDefId, Entity, EntityId, Expr, FuncName, RefToken, Template,
};

use crate::error::{EvalError, EvalErrorKind};
use crate::functions;
use crate::value::Value;

/// Depth cap for recursive calculation references at evaluation time.
pub const MAX_RECURSION_DEPTH: usize = 64;

const DEFAULT_RNG_SEED: u64 = 0x9e3779b97f4a7c15;

/// Read-only access to live entities.
///
/// `children_of` returns only live (non-soft-deleted) entities, in a stable
/// store order; fan-out references and nearest-match lookups both rely on
/// that ordering being consistent within one evaluation.
pub trait InstanceStore {
    fn get(&self, id: EntityId) -> Option<Entity>;
    fn children_of(&self, parent: EntityId) -> Vec<Entity>;
}

/// An in-memory [`InstanceStore`] for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entities: Vec<Entity>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity, replacing any existing record with the same id.
    pub fn insert(&mut self, entity: Entity) -> EntityId {
        let id = entity.id;
        match self.entities.iter_mut().find(|e| e.id == id) {
            Some(existing) => *existing = entity,
            None => self.entities.push(entity),
        }
        id
    }
}

impl InstanceStore for MemoryStore {
    fn get(&self, id: EntityId) -> Option<Entity> {
        self.entities.iter().find(|e| e.id == id).cloned()
    }

    fn children_of(&self, parent: EntityId) -> Vec<Entity> {
        self.entities
            .iter()
            .filter(|e| e.parent == Some(parent) && !e.deleted)
            .cloned()
            .collect()
    }
}

/// Recursion guard state for one evaluation call.
#[derive(Default)]
struct Guard {
    depth: usize,
    active: HashSet<(EntityId, CalculationDefId)>,
}

impl Guard {
    fn enter(
        &mut self,
        entity: EntityId,
        calculation: CalculationDefId,
    ) -> Result<(), EvalErrorKind> {
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(EvalErrorKind::RecursionDepth(MAX_RECURSION_DEPTH));
        }
        if !self.active.insert((entity, calculation)) {
            return Err(EvalErrorKind::RecursionCycle {
                entity,
                calculation,
            });
        }
        self.depth += 1;
        Ok(())
    }

    fn exit(&mut self, entity: EntityId, calculation: CalculationDefId) {
        self.depth -= 1;
        self.active.remove(&(entity, calculation));
    }
}

/// The subject of one calculation evaluation: the entity, its parent
/// snapshot, and the calculation id for error attribution.
struct Frame<'e> {
    subject: &'e Entity,
    parent: Option<&'e Entity>,
    calc: CalculationDefId,
}

impl Frame<'_> {
    fn err(&self, kind: EvalErrorKind) -> EvalError {
        EvalError {
            calculation: self.calc,
            kind,
        }
    }
}

/// Evaluates compiled calculations against entities in an [`InstanceStore`].
///
/// Random tie-breaking in nearest-match lookups draws from a deterministic
/// splitmix64 generator owned by the evaluator; construct with
/// [`Evaluator::with_rng_seed`] to pin outcomes in tests.
pub struct Evaluator<'a, S: InstanceStore> {
    template: &'a Template,
    store: &'a S,
    rng: Cell<u64>,
}

impl<'a, S: InstanceStore> Evaluator<'a, S> {
    #[must_use]
    pub fn new(template: &'a Template, store: &'a S) -> Self {
        Self::with_rng_seed(template, store, DEFAULT_RNG_SEED)
    }

    #[must_use]
    pub fn with_rng_seed(template: &'a Template, store: &'a S, seed: u64) -> Self {
        Self {
            template,
            store,
            rng: Cell::new(seed),
        }
    }

    /// Evaluate a calculation for the entity with the given id.
    pub fn evaluate(
        &self,
        entity: EntityId,
        calculation: CalculationDefId,
    ) -> Result<Value, EvalError> {
        let subject = self.store.get(entity).ok_or(EvalError {
            calculation,
            kind: EvalErrorKind::MissingEntity(entity),
        })?;
        self.evaluate_entity(&subject, calculation)
    }

    /// Evaluate a calculation for an already-fetched entity snapshot.
    pub fn evaluate_entity(
        &self,
        entity: &Entity,
        calculation: CalculationDefId,
    ) -> Result<Value, EvalError> {
        let mut guard = Guard::default();
        self.eval_calc(entity, calculation, &mut guard)
    }

    fn eval_calc(
        &self,
        subject: &Entity,
        calc_id: CalculationDefId,
        guard: &mut Guard,
    ) -> Result<Value, EvalError> {
        guard
            .enter(subject.id, calc_id)
            .map_err(|kind| EvalError {
                calculation: calc_id,
                kind,
            })?;
        let result = self.eval_calc_inner(subject, calc_id, guard);
        guard.exit(subject.id, calc_id);
        result
    }

    fn eval_calc_inner(
        &self,
        subject: &Entity,
        calc_id: CalculationDefId,
        guard: &mut Guard,
    ) -> Result<Value, EvalError> {
        let fail = |kind| EvalError {
            calculation: calc_id,
            kind,
        };

        let (_, def) = self
            .template
            .calculation(calc_id)
            .ok_or_else(|| fail(EvalErrorKind::MissingCalculation(calc_id)))?;
        let formula = def
            .compiled
            .as_ref()
            .ok_or_else(|| fail(EvalErrorKind::NotCompiled))?;

        let parent = match subject.parent {
            Some(pid) => Some(
                self.store
                    .get(pid)
                    .ok_or_else(|| fail(EvalErrorKind::MissingEntity(pid)))?,
            ),
            None => None,
        };
        let frame = Frame {
            subject,
            parent: parent.as_ref(),
            calc: calc_id,
        };

        let values = self.reduce_items(formula.items(), &frame, guard)?;
        functions::identity(values).map_err(fail)
    }

    /// Reduce a list of expressions to concrete values. Fan-out references
    /// splice their per-child values into the list; a surviving group (a
    /// list directly inside a list) is a structural error.
    fn reduce_items(
        &self,
        items: &[Expr],
        frame: &Frame<'_>,
        guard: &mut Guard,
    ) -> Result<Vec<Value>, EvalError> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Expr::Literal(text) => values.push(Value::Text(text.clone())),
                Expr::Name(name) => {
                    return Err(frame.err(EvalErrorKind::UnresolvedName(name.clone())))
                }
                Expr::Ref(token) => self.fetch_reference(token, frame, guard, &mut values)?,
                Expr::Call(func, args) => {
                    values.push(self.eval_call(*func, args, frame, guard)?)
                }
                Expr::Group(_) => return Err(frame.err(EvalErrorKind::NestedList)),
            }
        }
        Ok(values)
    }

    fn fetch_reference(
        &self,
        token: &RefToken,
        frame: &Frame<'_>,
        guard: &mut Guard,
        out: &mut Vec<Value>,
    ) -> Result<(), EvalError> {
        match token {
            RefToken::Attribute(id) => out.push(self.fetch_single_attribute(*id, frame)?),
            RefToken::ChildAttributes(id) => {
                for child in self.store.children_of(frame.subject.id) {
                    match child.attribute_value(*id) {
                        Some(scalar) => out.push(Value::from(scalar)),
                        // Children of a different entity definition simply
                        // lack the attribute.
                        None => log::debug!(
                            "child {} has no attribute {id}; skipped in fan-out",
                            child.id
                        ),
                    }
                }
            }
            RefToken::Calculation(id) => out.push(self.eval_calc(frame.subject, *id, guard)?),
            RefToken::ChildCalculations(id) => {
                for child in self.store.children_of(frame.subject.id) {
                    out.push(self.eval_calc(&child, *id, guard)?);
                }
            }
        }
        Ok(())
    }

    /// A `""`-tagged reference: the subject entity's own value first, then
    /// the parent instance's.
    fn fetch_single_attribute(
        &self,
        id: AttributeDefId,
        frame: &Frame<'_>,
    ) -> Result<Value, EvalError> {
        if let Some(scalar) = frame.subject.attribute_value(id) {
            return Ok(Value::from(scalar));
        }
        if let Some(parent) = frame.parent {
            if let Some(scalar) = parent.attribute_value(id) {
                return Ok(Value::from(scalar));
            }
        }
        Err(frame.err(EvalErrorKind::MissingAttribute(id)))
    }

    fn eval_call(
        &self,
        func: FuncName,
        args: &[Expr],
        frame: &Frame<'_>,
        guard: &mut Guard,
    ) -> Result<Value, EvalError> {
        match func {
            FuncName::If => {
                if args.len() != 3 {
                    return Err(frame.err(EvalErrorKind::ArgumentCount {
                        func: "IF",
                        expected: "exactly 3",
                        got: args.len(),
                    }));
                }
                let cond = self.reduce_single(&args[0], frame, guard)?;
                let cond = cond.coerce_bool().map_err(|kind| frame.err(kind))?;
                // Only the taken branch is evaluated.
                let branch = if cond { &args[1] } else { &args[2] };
                self.reduce_single(branch, frame, guard)
            }
            FuncName::Lookup => self.eval_lookup(args, frame, guard),
            _ => {
                let values = self.reduce_items(args, frame, guard)?;
                functions::apply(func, values).map_err(|kind| frame.err(kind))
            }
        }
    }

    /// Reduce one expression and pass its value list through identity.
    fn reduce_single(
        &self,
        expr: &Expr,
        frame: &Frame<'_>,
        guard: &mut Guard,
    ) -> Result<Value, EvalError> {
        let values = self.reduce_items(std::slice::from_ref(expr), frame, guard)?;
        functions::identity(values).map_err(|kind| frame.err(kind))
    }

    /// Nearest-match lookup over the fan-out of a child entity's attributes:
    /// `LOOKUP(sought, source_ref, target_ref)`. The ranking policy follows
    /// the source attribute's data type.
    fn eval_lookup(
        &self,
        args: &[Expr],
        frame: &Frame<'_>,
        guard: &mut Guard,
    ) -> Result<Value, EvalError> {
        if args.len() != 3 {
            return Err(frame.err(EvalErrorKind::ArgumentCount {
                func: "LOOKUP",
                expected: "exactly 3",
                got: args.len(),
            }));
        }

        let sought = self.reduce_single(&args[0], frame, guard)?;
        let source = lookup_reference(&args[1], "source").map_err(|kind| frame.err(kind))?;
        let target = lookup_reference(&args[2], "target").map_err(|kind| frame.err(kind))?;

        let (source_node, source_def) = self.template.attribute(source).ok_or_else(|| {
            frame.err(EvalErrorKind::LookupReference(format!(
                "source attribute {source} is not defined"
            )))
        })?;
        let (target_node, _) = self.template.attribute(target).ok_or_else(|| {
            frame.err(EvalErrorKind::LookupReference(format!(
                "target attribute {target} is not defined"
            )))
        })?;
        if source_node.id != target_node.id {
            return Err(frame.err(EvalErrorKind::LookupReference(
                "source and target attributes must live on the same child entity".to_string(),
            )));
        }

        let mut candidates: Vec<(Value, Value)> = Vec::new();
        for child in self.store.children_of(frame.subject.id) {
            if child.entity_def != source_node.id {
                continue;
            }
            let (Some(s), Some(t)) = (child.attribute_value(source), child.attribute_value(target))
            else {
                continue;
            };
            candidates.push((Value::from(s), Value::from(t)));
        }

        let data_type = source_def.data_type;
        let outcome = if data_type.is_textual() {
            lookup_textual(&sought, candidates)
        } else if data_type.is_numeric_like() {
            self.lookup_nearest_numeric(&sought, candidates)
        } else if data_type.is_exact_match() {
            self.lookup_exact(&sought, candidates)
        } else {
            Err(EvalErrorKind::UnsupportedLookupSource(data_type))
        };
        outcome.map_err(|kind| frame.err(kind))
    }

    /// Rank by absolute difference; equally close candidates resolve by a
    /// uniform draw.
    fn lookup_nearest_numeric(
        &self,
        sought: &Value,
        candidates: Vec<(Value, Value)>,
    ) -> Result<Value, EvalErrorKind> {
        let sought = sought.coerce_number()?;
        let mut best = f64::INFINITY;
        let mut ties: Vec<Value> = Vec::new();
        for (source, target) in candidates {
            let diff = (source.coerce_number()? - sought).abs();
            if diff < best {
                best = diff;
                ties.clear();
                ties.push(target);
            } else if diff == best {
                ties.push(target);
            }
        }
        self.pick_uniform(ties)
    }

    /// Exact equality only: no match is `Null`, several matches resolve by a
    /// uniform draw.
    fn lookup_exact(
        &self,
        sought: &Value,
        candidates: Vec<(Value, Value)>,
    ) -> Result<Value, EvalErrorKind> {
        let sought = sought.coerce_text()?;
        let mut matches = Vec::new();
        for (source, target) in candidates {
            if source.coerce_text()? == sought {
                matches.push(target);
            }
        }
        self.pick_uniform(matches)
    }

    fn pick_uniform(&self, mut ties: Vec<Value>) -> Result<Value, EvalErrorKind> {
        match ties.len() {
            0 => Ok(Value::Null),
            1 => Ok(ties.pop().expect("length checked")),
            n => {
                let idx = self.rand_below(n as u64) as usize;
                Ok(ties.swap_remove(idx))
            }
        }
    }

    fn rand_u64(&self) -> u64 {
        let state = self.rng.get().wrapping_add(0x9e3779b97f4a7c15);
        self.rng.set(state);
        splitmix64(state)
    }

    /// Unbiased uniform integer in `[0, span)` via rejection sampling.
    fn rand_below(&self, span: u64) -> u64 {
        if span <= 1 {
            return 0;
        }
        let zone = (u64::MAX / span) * span;
        loop {
            let v = self.rand_u64();
            if v < zone {
                return v % span;
            }
        }
    }
}

fn lookup_reference(expr: &Expr, role: &str) -> Result<AttributeDefId, EvalErrorKind> {
    match expr {
        Expr::Ref(RefToken::ChildAttributes(id)) => Ok(*id),
        _ => Err(EvalErrorKind::LookupReference(format!(
            "{role} must be a child-collection attribute reference"
        ))),
    }
}

/// Rank by Damerau-Levenshtein distance from the sought value, ties broken
/// by ascending source value.
fn lookup_textual(
    sought: &Value,
    candidates: Vec<(Value, Value)>,
) -> Result<Value, EvalErrorKind> {
    let sought = sought.coerce_text()?;
    let mut best: Option<(usize, String, Value)> = None;
    for (source, target) in candidates {
        let source_text = source.coerce_text()?;
        let distance = functions::damerau_levenshtein(&sought, &source_text);
        let better = match &best {
            None => true,
            Some((best_distance, best_source, _)) => {
                distance < *best_distance
                    || (distance == *best_distance && source_text < *best_source)
            }
        };
        if better {
            best = Some((distance, source_text, target));
        }
    }
    Ok(best.map(|(_, _, target)| target).unwrap_or(Value::Null))
}

fn splitmix64(mut state: u64) -> u64 {
    state = (state ^ (state >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    state = (state ^ (state >> 27)).wrapping_mul(0x94d049bb133111eb);
    state ^ (state >> 31)
}
