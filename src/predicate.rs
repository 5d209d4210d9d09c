//! Predicate types every [`crate::encoding::Encoding`] must answer
//! (`spec.md` §4.3 "Predicate kinds").

/// A single column value, typed loosely enough to cover every
/// [`crate::column::ColumnType`] the predicate kinds below need to carry.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Numeric value for comparison purposes; text scalars have no
    /// numeric ordering and panic if compared this way (callers are
    /// expected to route text columns through discrete-set or keyword
    /// predicates instead).
    pub fn as_f64(&self) -> f64 {
        match self {
            Scalar::Int(v) => *v as f64,
            Scalar::UInt(v) => *v as f64,
            Scalar::Float(v) => *v,
            Scalar::Text(_) => panic!("Scalar::Text has no numeric ordering"),
        }
    }
}

/// Relational operator for a single-bound continuous range predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// Orders two scalars of the same variant; text compares lexically, numeric
/// variants compare via [`Scalar::as_f64`]. Comparing a `Text` against a
/// numeric scalar is a caller error and falls back to `Equal` so sorts stay
/// total rather than panicking mid-build.
pub fn cmp_scalars(a: &Scalar, b: &Scalar) -> std::cmp::Ordering {
    match (a, b) {
        (Scalar::Text(x), Scalar::Text(y)) => x.cmp(y),
        (Scalar::Text(_), _) | (_, Scalar::Text(_)) => std::cmp::Ordering::Equal,
        _ => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(std::cmp::Ordering::Equal),
    }
}

/// The predicate kinds `spec.md` §4.3 requires every encoding to answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `v rel x`.
    Compare { op: RelOp, value: Scalar },
    /// `v ∈ [lo, hi]` (inclusive on both ends; callers wanting a half-open
    /// range use `Compare` twice and AND the results upstream of the
    /// index, matching the source's own query-planner boundary).
    Between { lo: Scalar, hi: Scalar },
    /// `v ∈ {x₁, …}`.
    In(Vec<Scalar>),
    /// Two-column range-join `|u − v| ≤ delta`, evaluated between this
    /// column (`u`) and a named sibling column (`v`) carrying its own
    /// index; only the join-capable encodings (binned numeric families)
    /// implement it.
    RangeJoin { other_column: String, delta: f64 },
}

impl Predicate {
    /// Whether `value` satisfies this predicate. `RangeJoin` cannot be
    /// decided against a single scalar (it needs the sibling column) and
    /// always reports `false`; callers route it through the join-capable
    /// encodings instead.
    pub fn matches(&self, value: &Scalar) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Predicate::Compare { op, value: x } => {
                let ord = cmp_scalars(value, x);
                match op {
                    RelOp::Lt => ord == Less,
                    RelOp::Le => ord != Greater,
                    RelOp::Gt => ord == Greater,
                    RelOp::Ge => ord != Less,
                    RelOp::Eq => ord == Equal,
                    RelOp::Ne => ord != Equal,
                }
            }
            Predicate::Between { lo, hi } => {
                cmp_scalars(value, lo) != Less && cmp_scalars(value, hi) != Greater
            }
            Predicate::In(set) => set.iter().any(|x| cmp_scalars(value, x) == Equal),
            Predicate::RangeJoin { .. } => false,
        }
    }
}
