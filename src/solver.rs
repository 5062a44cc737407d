//! The boundary between model construction and the external optimisation engine.
//!
//! Model code only ever talks to a [`SolverAdapter`]: it creates variables, adds constraints, sets
//! the objective, runs the solve and reads values back. Concrete engines live in submodules.
use anyhow::{Result, ensure};
use serde_string_enum::{DeserializeLabeledStringEnum, SerializeLabeledStringEnum};
use std::fmt;
use std::path::PathBuf;

pub mod expression;
pub use expression::Expression;
pub mod highs;
pub use highs::HighsSolver;

/// A handle referring to a variable (column) in the problem.
///
/// This does **not** hold the variable's value; values are read back from the adapter after a
/// solve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarHandle(usize);

impl VarHandle {
    /// The handle of the variable created at position `index`
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index)
    }

    /// The position of the variable in creation order
    pub fn index(self) -> usize {
        self.0
    }
}

/// The relation between a constraint's expression and its right-hand side
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintSense {
    /// `expr <= rhs`
    LessEqual,
    /// `expr == rhs`
    Equal,
    /// `expr >= rhs`
    GreaterEqual,
}

/// The optimisation direction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectiveSense {
    /// Minimise the objective
    Minimise,
}

/// Termination status reported by the engine after a solve
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum TerminationStatus {
    /// An optimal solution was found
    Optimal,
    /// The problem has no feasible solution
    Infeasible,
    /// The objective is unbounded
    Unbounded,
    /// The engine could not tell infeasibility and unboundedness apart
    InfeasibleOrUnbounded,
    /// The objective crossed a user-supplied cutoff
    Cutoff,
    /// The iteration limit was reached
    IterationLimit,
    /// The branch-and-bound node limit was reached
    NodeLimit,
    /// The solution-count limit was reached
    SolutionLimit,
    /// The solve was interrupted
    Interrupted,
    /// The engine stopped with a solution it cannot prove optimal
    Suboptimal,
    /// The wall-clock time limit was reached
    TimeLimit,
    /// The engine hit numerical trouble
    Numeric,
}

/// An event emitted by the engine while solving.
///
/// Events are purely informational: handling them must never change the model.
#[derive(Clone, Debug, PartialEq)]
pub enum SolveEvent {
    /// Intermediate progress
    Progress {
        /// Iterations performed so far, if known
        iteration: Option<u64>,
        /// Current objective value, if known
        objective: Option<f64>,
        /// Current primal/dual feasibility gap, if known
        gap: Option<f64>,
    },
    /// A free-text message from the engine
    Message(String),
}

/// The algorithm requested from the engine
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, DeserializeLabeledStringEnum, SerializeLabeledStringEnum,
)]
pub enum SolverMethod {
    /// Let the engine decide
    #[string = "choose"]
    Choose,
    /// Simplex
    #[string = "simplex"]
    Simplex,
    /// Interior point (barrier)
    #[string = "barrier"]
    Barrier,
}

impl Default for SolverMethod {
    fn default() -> Self {
        Self::Choose
    }
}

/// Settings for a single solve attempt
#[derive(Clone, Debug, PartialEq)]
pub struct SolveSettings {
    /// Algorithm to use
    pub method: SolverMethod,
    /// Number of engine threads (0 lets the engine decide)
    pub threads: u32,
    /// Wall-clock limit in seconds
    pub time_limit: Option<f64>,
    /// How conservative the engine should be numerically (0 = engine defaults).
    ///
    /// Raised by one on each retry after a [`TerminationStatus::Numeric`] outcome.
    pub numeric_focus: u8,
    /// File to which the engine should write its log
    pub log_file: Option<PathBuf>,
}

impl Default for SolveSettings {
    fn default() -> Self {
        Self {
            method: SolverMethod::Choose,
            threads: 0,
            time_limit: None,
            numeric_focus: 0,
            log_file: None,
        }
    }
}

/// The interface to an external LP/QP engine.
pub trait SolverAdapter {
    /// Create a continuous variable with the given bounds (use infinities for "unbounded")
    fn create_variable(&mut self, lower: f64, upper: f64) -> VarHandle;

    /// Add the constraint `expr <sense> rhs`. Constants in `expr` are moved to the right-hand side.
    fn add_constraint(&mut self, expr: Expression, sense: ConstraintSense, rhs: f64)
    -> Result<()>;

    /// Set the objective function
    fn set_objective(&mut self, expr: Expression, sense: ObjectiveSense) -> Result<()>;

    /// Run the engine, forwarding progress to `callback`.
    ///
    /// The problem is left intact so that the caller may solve again with other settings.
    fn solve(
        &mut self,
        settings: &SolveSettings,
        callback: &mut dyn FnMut(SolveEvent),
    ) -> Result<TerminationStatus>;

    /// The solved value of a variable, if a solution is available
    fn value(&self, var: VarHandle) -> Option<f64>;

    /// The objective value of the last solution, if any
    fn objective_value(&self) -> Option<f64>;

    /// The bounds a variable was created with
    fn bounds(&self, var: VarHandle) -> (f64, f64);

    /// Number of variables created so far
    fn num_variables(&self) -> usize;

    /// Number of constraints added so far
    fn num_constraints(&self) -> usize;
}

/// Creates a fresh adapter for every stage
pub type SolverFactory<'a> = dyn FnMut() -> Box<dyn SolverAdapter> + 'a;

/// A constraint row as stored by [`ProblemData`]
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    /// The left-hand side
    pub expr: Expression,
    /// The relation
    pub sense: ConstraintSense,
    /// The right-hand side (already net of any constant in `expr`)
    pub rhs: f64,
}

/// Backend-independent storage for a problem under construction.
///
/// Adapters keep the problem in this form and only translate it to the engine's own
/// representation when solving, which lets a failed solve be repeated with different settings.
#[derive(Clone, Debug, Default)]
pub struct ProblemData {
    columns: Vec<(f64, f64)>,
    rows: Vec<Row>,
    objective: Option<(Expression, ObjectiveSense)>,
}

impl ProblemData {
    /// Add a column with the given bounds
    pub fn add_column(&mut self, lower: f64, upper: f64) -> VarHandle {
        self.columns.push((lower, upper));
        VarHandle(self.columns.len() - 1)
    }

    /// Add a row, folding the expression's constant into the right-hand side
    pub fn add_row(&mut self, expr: Expression, sense: ConstraintSense, rhs: f64) -> Result<()> {
        self.check_handles(&expr)?;
        let constant = expr.linear_part().constant();
        let expr = expr.add(&Expression::Constant(-constant));
        self.rows.push(Row {
            expr,
            sense,
            rhs: rhs - constant,
        });

        Ok(())
    }

    /// Set the objective
    pub fn set_objective(&mut self, expr: Expression, sense: ObjectiveSense) -> Result<()> {
        self.check_handles(&expr)?;
        self.objective = Some((expr, sense));

        Ok(())
    }

    /// Column bounds in creation order
    pub fn columns(&self) -> &[(f64, f64)] {
        &self.columns
    }

    /// Constraint rows in insertion order
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// The objective, if set
    pub fn objective(&self) -> Option<&(Expression, ObjectiveSense)> {
        self.objective.as_ref()
    }

    /// Whether `values` (one per column) satisfy every bound and row within `tolerance`
    pub fn is_feasible(&self, values: &[f64], tolerance: f64) -> bool {
        if values.len() != self.columns.len() {
            return false;
        }
        let within_bounds = self
            .columns
            .iter()
            .zip(values)
            .all(|(&(lower, upper), &value)| {
                value.is_finite() && value >= lower - tolerance && value <= upper + tolerance
            });

        within_bounds
            && self.rows.iter().all(|row| {
                let lhs = row.expr.evaluate(|var| values[var.0]);
                match row.sense {
                    ConstraintSense::LessEqual => lhs <= row.rhs + tolerance,
                    ConstraintSense::Equal => (lhs - row.rhs).abs() <= tolerance,
                    ConstraintSense::GreaterEqual => lhs >= row.rhs - tolerance,
                }
            })
    }

    fn check_handles(&self, expr: &Expression) -> Result<()> {
        let n = self.columns.len();
        let linear = expr.linear_part();
        ensure!(
            linear.terms().all(|(var, _)| var.0 < n),
            "Expression refers to a variable which does not belong to this problem"
        );
        if let Expression::Quadratic(quad) = expr {
            ensure!(
                quad.quadratic_terms().all(|(a, b, _)| a.0 < n && b.0 < n),
                "Expression refers to a variable which does not belong to this problem"
            );
        }

        Ok(())
    }
}

impl fmt::Display for ConstraintSense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LessEqual => "<=",
            Self::Equal => "==",
            Self::GreaterEqual => ">=",
        };
        write!(f, "{s}")
    }
}
