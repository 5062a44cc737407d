//! Backend-independent algebraic expressions over solver variables.
//!
//! Expressions are built with explicit [`Expression::add`], [`Expression::scale`] and
//! [`Expression::sum`] calls rather than operator overloading, so that any backend can consume
//! the same representation.
use super::VarHandle;
use std::collections::BTreeMap;

/// The linear part of an expression: `sum(coeff * var) + constant`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinearExpr {
    terms: BTreeMap<VarHandle, f64>,
    constant: f64,
}

impl LinearExpr {
    /// Iterate over the (variable, coefficient) terms, in variable order
    pub fn terms(&self) -> impl Iterator<Item = (VarHandle, f64)> + '_ {
        self.terms.iter().map(|(var, coeff)| (*var, *coeff))
    }

    /// The constant offset
    pub fn constant(&self) -> f64 {
        self.constant
    }

    fn add_term(&mut self, var: VarHandle, coeff: f64) {
        *self.terms.entry(var).or_default() += coeff;
    }

    fn add_assign(&mut self, other: &LinearExpr) {
        for (var, coeff) in other.terms() {
            self.add_term(var, coeff);
        }
        self.constant += other.constant;
    }

    fn scale(&mut self, factor: f64) {
        for coeff in self.terms.values_mut() {
            *coeff *= factor;
        }
        self.constant *= factor;
    }
}

/// A quadratic expression: `sum(coeff * var_a * var_b) + linear part`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuadraticExpr {
    quadratic: BTreeMap<(VarHandle, VarHandle), f64>,
    linear: LinearExpr,
}

impl QuadraticExpr {
    /// Iterate over the quadratic terms. Each pair is stored with the lower handle first.
    pub fn quadratic_terms(&self) -> impl Iterator<Item = (VarHandle, VarHandle, f64)> + '_ {
        self.quadratic.iter().map(|((a, b), coeff)| (*a, *b, *coeff))
    }

    /// The linear part of the expression
    pub fn linear(&self) -> &LinearExpr {
        &self.linear
    }

    fn add_product(&mut self, a: VarHandle, b: VarHandle, coeff: f64) {
        let key = if a <= b { (a, b) } else { (b, a) };
        *self.quadratic.entry(key).or_default() += coeff;
    }
}

/// An expression which can appear in a constraint or objective.
#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    /// A fixed value
    Constant(f64),
    /// An affine combination of variables
    Linear(LinearExpr),
    /// An expression with products of variables
    Quadratic(QuadraticExpr),
}

impl Default for Expression {
    fn default() -> Self {
        Self::Constant(0.0)
    }
}

impl From<VarHandle> for Expression {
    fn from(var: VarHandle) -> Self {
        Self::term(var, 1.0)
    }
}

impl From<f64> for Expression {
    fn from(value: f64) -> Self {
        Self::Constant(value)
    }
}

impl Expression {
    /// A single `coeff * var` term
    pub fn term(var: VarHandle, coeff: f64) -> Self {
        let mut linear = LinearExpr::default();
        linear.add_term(var, coeff);
        Self::Linear(linear)
    }

    /// A `coeff * a * b` term
    pub fn product(a: VarHandle, b: VarHandle, coeff: f64) -> Self {
        let mut quadratic = QuadraticExpr::default();
        quadratic.add_product(a, b, coeff);
        Self::Quadratic(quadratic)
    }

    /// Add another expression to this one, promoting the representation where needed
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn add(self, other: &Expression) -> Self {
        match (self, other) {
            (Self::Constant(a), Self::Constant(b)) => Self::Constant(a + b),
            (Self::Constant(c), Self::Linear(lin)) => {
                let mut lin = lin.clone();
                lin.constant += c;
                Self::Linear(lin)
            }
            (Self::Linear(mut lin), Self::Constant(c)) => {
                lin.constant += c;
                Self::Linear(lin)
            }
            (Self::Linear(mut a), Self::Linear(b)) => {
                a.add_assign(b);
                Self::Linear(a)
            }
            (lhs, rhs) => {
                let mut quad = lhs.into_quadratic();
                quad.linear.add_assign(&rhs.linear_part());
                if let Self::Quadratic(q) = rhs {
                    for (a, b, coeff) in q.quadratic_terms() {
                        quad.add_product(a, b, coeff);
                    }
                }
                Self::Quadratic(quad)
            }
        }
    }

    /// Add `coeff * var` to this expression
    #[must_use]
    pub fn add_term(self, var: VarHandle, coeff: f64) -> Self {
        self.add(&Self::term(var, coeff))
    }

    /// Multiply every coefficient (and the constant) by `factor`
    #[must_use]
    pub fn scale(self, factor: f64) -> Self {
        match self {
            Self::Constant(c) => Self::Constant(c * factor),
            Self::Linear(mut lin) => {
                lin.scale(factor);
                Self::Linear(lin)
            }
            Self::Quadratic(mut quad) => {
                for coeff in quad.quadratic.values_mut() {
                    *coeff *= factor;
                }
                quad.linear.scale(factor);
                Self::Quadratic(quad)
            }
        }
    }

    /// Subtract another expression from this one
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn sub(self, other: &Expression) -> Self {
        self.add(&other.clone().scale(-1.0))
    }

    /// Sum a sequence of expressions
    pub fn sum<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Expression>,
    {
        iter.into_iter()
            .fold(Self::default(), |acc, expr| acc.add(&expr))
    }

    /// Whether the expression contains products of variables
    pub fn is_quadratic(&self) -> bool {
        matches!(self, Self::Quadratic(q) if !q.quadratic.is_empty())
    }

    /// The linear part of the expression (including the constant)
    pub fn linear_part(&self) -> LinearExpr {
        match self {
            Self::Constant(c) => LinearExpr {
                terms: BTreeMap::new(),
                constant: *c,
            },
            Self::Linear(lin) => lin.clone(),
            Self::Quadratic(quad) => quad.linear.clone(),
        }
    }

    fn into_quadratic(self) -> QuadraticExpr {
        match self {
            Self::Quadratic(quad) => quad,
            other => QuadraticExpr {
                quadratic: BTreeMap::new(),
                linear: other.linear_part(),
            },
        }
    }

    /// Evaluate the expression given a value for every variable
    pub fn evaluate<F>(&self, value_of: F) -> f64
    where
        F: Fn(VarHandle) -> f64,
    {
        let linear = |lin: &LinearExpr| {
            lin.terms()
                .map(|(var, coeff)| coeff * value_of(var))
                .sum::<f64>()
                + lin.constant
        };

        match self {
            Self::Constant(c) => *c,
            Self::Linear(lin) => linear(lin),
            Self::Quadratic(quad) => {
                quad.quadratic_terms()
                    .map(|(a, b, coeff)| coeff * value_of(a) * value_of(b))
                    .sum::<f64>()
                    + linear(&quad.linear)
            }
        }
    }
}
