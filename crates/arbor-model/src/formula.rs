use std::fmt;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::{AttributeDefId, CalculationDefId};

/// A resolved reference leaf: an absolute identifier tagged with how the
/// evaluator must fetch it.
///
/// The wire form is a prefixed id string:
/// - `""` + attribute id — single value from the subject entity or its parent
/// - `"_"` + attribute id — one value per live child entity
/// - `"c_"` + calculation id — nested calculation on the subject entity
/// - `"_c_"` + calculation id — nested calculation, once per live child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefToken {
    Attribute(AttributeDefId),
    ChildAttributes(AttributeDefId),
    Calculation(CalculationDefId),
    ChildCalculations(CalculationDefId),
}

impl RefToken {
    /// Parse a prefixed id string. Longer prefixes are tried first so that
    /// `_c_` is never misread as a bare child-attribute reference.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        if let Some(rest) = s.strip_prefix("_c_") {
            return Uuid::parse_str(rest)
                .ok()
                .map(|u| RefToken::ChildCalculations(u.into()));
        }
        if let Some(rest) = s.strip_prefix("c_") {
            return Uuid::parse_str(rest)
                .ok()
                .map(|u| RefToken::Calculation(u.into()));
        }
        if let Some(rest) = s.strip_prefix('_') {
            return Uuid::parse_str(rest)
                .ok()
                .map(|u| RefToken::ChildAttributes(u.into()));
        }
        Uuid::parse_str(s).ok().map(|u| RefToken::Attribute(u.into()))
    }

    /// The prefixed id string this token serializes to.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            RefToken::Attribute(id) => id.to_string(),
            RefToken::ChildAttributes(id) => format!("_{id}"),
            RefToken::Calculation(id) => format!("c_{id}"),
            RefToken::ChildCalculations(id) => format!("_c_{id}"),
        }
    }

    /// The referenced calculation id, if this token targets a calculation.
    #[must_use]
    pub fn calculation_id(&self) -> Option<CalculationDefId> {
        match self {
            RefToken::Calculation(id) | RefToken::ChildCalculations(id) => Some(*id),
            _ => None,
        }
    }

    /// The referenced attribute id, if this token targets a stored attribute.
    #[must_use]
    pub fn attribute_id(&self) -> Option<AttributeDefId> {
        match self {
            RefToken::Attribute(id) | RefToken::ChildAttributes(id) => Some(*id),
            _ => None,
        }
    }

    /// Whether the token fans out across child entities.
    #[must_use]
    pub fn is_fan_out(&self) -> bool {
        matches!(
            self,
            RefToken::ChildAttributes(_) | RefToken::ChildCalculations(_)
        )
    }
}

impl fmt::Display for RefToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Function and operator tags, closed by construction.
///
/// Word and symbol spellings of the same operation are distinct tags so a
/// formula round-trips through the wire form exactly as written; evaluation
/// treats each pair identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuncName {
    Sum,
    Add,
    Difference,
    Subtract,
    Product,
    Multiply,
    Quotient,
    Divide,
    Min,
    Max,
    Mean,
    Count,
    And,
    AndOp,
    Or,
    OrOp,
    Not,
    If,
    Lookup,
    Concatenate,
    Contains,
    NotContains,
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl FuncName {
    /// Surface spelling, used as the wire-form map key.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FuncName::Sum => "SUM",
            FuncName::Add => "+",
            FuncName::Difference => "DIFFERENCE",
            FuncName::Subtract => "-",
            FuncName::Product => "PRODUCT",
            FuncName::Multiply => "*",
            FuncName::Quotient => "QUOTIENT",
            FuncName::Divide => "/",
            FuncName::Min => "MIN",
            FuncName::Max => "MAX",
            FuncName::Mean => "MEAN",
            FuncName::Count => "COUNT",
            FuncName::And => "AND",
            FuncName::AndOp => "&&",
            FuncName::Or => "OR",
            FuncName::OrOp => "||",
            FuncName::Not => "NOT",
            FuncName::If => "IF",
            FuncName::Lookup => "LOOKUP",
            FuncName::Concatenate => "CONCATENATE",
            FuncName::Contains => "CONTAINS",
            FuncName::NotContains => "NOT_CONTAINS",
            FuncName::Gt => ">",
            FuncName::Lt => "<",
            FuncName::Ge => ">=",
            FuncName::Le => "<=",
            FuncName::Eq => "=",
            FuncName::Ne => "!=",
        }
    }

    /// Look up any surface spelling (function word or operator symbol).
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "SUM" => FuncName::Sum,
            "+" => FuncName::Add,
            "DIFFERENCE" => FuncName::Difference,
            "-" => FuncName::Subtract,
            "PRODUCT" => FuncName::Product,
            "*" => FuncName::Multiply,
            "QUOTIENT" => FuncName::Quotient,
            "/" => FuncName::Divide,
            "MIN" => FuncName::Min,
            "MAX" => FuncName::Max,
            "MEAN" => FuncName::Mean,
            "COUNT" => FuncName::Count,
            "AND" => FuncName::And,
            "&&" => FuncName::AndOp,
            "OR" => FuncName::Or,
            "||" => FuncName::OrOp,
            "NOT" => FuncName::Not,
            "IF" => FuncName::If,
            "LOOKUP" => FuncName::Lookup,
            "CONCATENATE" => FuncName::Concatenate,
            "CONTAINS" => FuncName::Contains,
            "NOT_CONTAINS" => FuncName::NotContains,
            ">" => FuncName::Gt,
            "<" => FuncName::Lt,
            ">=" => FuncName::Ge,
            "<=" => FuncName::Le,
            "=" => FuncName::Eq,
            "!=" => FuncName::Ne,
            _ => return None,
        })
    }

    /// Look up a callable function word (the names that may precede an
    /// argument list in formula text). Operator symbols are not callable.
    #[must_use]
    pub fn function_from_name(name: &str) -> Option<Self> {
        match Self::from_key(name) {
            Some(f) if !f.is_operator() => Some(f),
            _ => None,
        }
    }

    /// Whether this tag is an infix operator spelling.
    #[must_use]
    pub fn is_operator(self) -> bool {
        matches!(
            self,
            FuncName::Add
                | FuncName::Subtract
                | FuncName::Multiply
                | FuncName::Divide
                | FuncName::AndOp
                | FuncName::OrOp
                | FuncName::Gt
                | FuncName::Lt
                | FuncName::Ge
                | FuncName::Le
                | FuncName::Eq
                | FuncName::Ne
        )
    }
}

impl fmt::Display for FuncName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node of a formula tree.
///
/// `Name` only occurs between parsing and resolution; persisted trees contain
/// literals, [`RefToken`]s, and calls. `Group` is a parenthesized run that no
/// function call consumed; resolution collapses singleton groups, and the
/// evaluator rejects any that remain inside an argument list.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(String),
    Name(String),
    Ref(RefToken),
    Call(FuncName, Vec<Expr>),
    Group(Vec<Expr>),
}

impl Expr {
    /// Visit every reference token in this subtree.
    pub fn visit_refs<F: FnMut(&RefToken)>(&self, f: &mut F) {
        match self {
            Expr::Ref(token) => f(token),
            Expr::Call(_, items) | Expr::Group(items) => {
                for item in items {
                    item.visit_refs(f);
                }
            }
            Expr::Literal(_) | Expr::Name(_) => {}
        }
    }
}

/// A parsed (and, once resolved, persisted) formula tree.
///
/// The wire form is a list whose elements are literals, prefixed tagged-id
/// strings, or single-key maps from a function spelling to an argument list,
/// e.g. `[{"SUM": ["_9461d5db-72ba-4b72-bbb5-02113deaa637"]}]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Formula {
    items: Vec<Expr>,
}

impl Formula {
    #[must_use]
    pub fn new(items: Vec<Expr>) -> Self {
        Self { items }
    }

    #[must_use]
    pub fn items(&self) -> &[Expr] {
        &self.items
    }

    #[must_use]
    pub fn into_items(self) -> Vec<Expr> {
        self.items
    }

    /// Visit every reference token in the tree.
    pub fn visit_refs<F: FnMut(&RefToken)>(&self, mut f: F) {
        for item in &self.items {
            item.visit_refs(&mut f);
        }
    }

    /// Ids of all calculations this formula references.
    #[must_use]
    pub fn referenced_calculations(&self) -> Vec<CalculationDefId> {
        let mut out = Vec::new();
        self.visit_refs(|token| {
            if let Some(id) = token.calculation_id() {
                out.push(id);
            }
        });
        out
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Expr::Literal(s) | Expr::Name(s) => serializer.serialize_str(s),
            Expr::Ref(token) => serializer.serialize_str(&token.encode()),
            Expr::Call(func, args) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(func.as_str(), args)?;
                map.end()
            }
            Expr::Group(items) => items.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ExprVisitor;

        impl<'de> Visitor<'de> for ExprVisitor {
            type Value = Expr;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a literal, a tagged id string, a function map, or a list")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Expr, E> {
                if let Some(token) = RefToken::parse(v) {
                    return Ok(Expr::Ref(token));
                }
                if v.starts_with('.') {
                    return Ok(Expr::Name(v.to_string()));
                }
                Ok(Expr::Literal(v.to_string()))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Expr, A::Error> {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element()? {
                    items.push(item);
                }
                Ok(Expr::Group(items))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Expr, A::Error> {
                let Some((key, args)) = map.next_entry::<String, Vec<Expr>>()? else {
                    return Err(de::Error::custom("function node must have one key"));
                };
                if map.next_key::<String>()?.is_some() {
                    return Err(de::Error::custom(
                        "function node must have exactly one key",
                    ));
                }
                let func = FuncName::from_key(&key)
                    .ok_or_else(|| de::Error::custom(format!("unknown function `{key}`")))?;
                Ok(Expr::Call(func, args))
            }
        }

        deserializer.deserialize_any(ExprVisitor)
    }
}

impl Serialize for Formula {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.items.len()))?;
        for item in &self.items {
            seq.serialize_element(item)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Formula {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let items = Vec::<Expr>::deserialize(deserializer)?;
        Ok(Formula { items })
    }
}
