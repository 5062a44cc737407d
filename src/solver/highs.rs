//! A [`SolverAdapter`] backed by the HiGHS engine.
use super::{
    ConstraintSense, Expression, ObjectiveSense, ProblemData, SolveEvent, SolveSettings,
    SolverAdapter, SolverMethod, TerminationStatus, VarHandle,
};
use anyhow::{Result, bail, ensure};
use highs::{HighsModelStatus, RowProblem as Problem, Sense};
use log::debug;

/// Feasibility tolerance used once numerical focus is raised
const TIGHT_FEASIBILITY_TOLERANCE: f64 = 1e-9;

/// Tolerance for accepting the point left by a solve stopped at a limit
const LIMIT_FEASIBILITY_TOLERANCE: f64 = 1e-6;

/// Simplex scaling strategy "max value 0" (the most conservative HiGHS offers)
const CONSERVATIVE_SCALE_STRATEGY: i32 = 4;

/// Solves linear problems with HiGHS.
///
/// Quadratic constraints and objectives are rejected.
#[derive(Default)]
pub struct HighsSolver {
    problem: ProblemData,
    solution: Option<Vec<f64>>,
    objective_value: Option<f64>,
}

impl HighsSolver {
    /// Translate the stored problem into a HiGHS model with the given settings applied
    fn build_model(&self, settings: &SolveSettings) -> highs::Model {
        let mut problem = Problem::default();

        let mut costs = vec![0.0; self.problem.columns().len()];
        if let Some((objective, _)) = self.problem.objective() {
            for (var, coeff) in objective.linear_part().terms() {
                costs[var.index()] += coeff;
            }
        }

        let cols: Vec<highs::Col> = self
            .problem
            .columns()
            .iter()
            .zip(&costs)
            .map(|(&(lower, upper), &cost)| problem.add_column(cost, lower..=upper))
            .collect();

        for row in self.problem.rows() {
            let factors = row
                .expr
                .linear_part()
                .terms()
                .map(|(var, coeff)| (cols[var.index()], coeff))
                .collect::<Vec<_>>();
            match row.sense {
                ConstraintSense::LessEqual => problem.add_row(..=row.rhs, factors),
                ConstraintSense::Equal => problem.add_row(row.rhs..=row.rhs, factors),
                ConstraintSense::GreaterEqual => problem.add_row(row.rhs.., factors),
            }
        }

        let sense = match self.problem.objective() {
            Some((_, ObjectiveSense::Minimise)) | None => Sense::Minimise,
        };
        let mut model = problem.optimise(sense);
        apply_settings(&mut model, settings);

        model
    }

    fn objective_constant(&self) -> f64 {
        self.problem
            .objective()
            .map_or(0.0, |(expr, _)| expr.linear_part().constant())
    }
}

/// Apply solve settings as HiGHS options
fn apply_settings(model: &mut highs::Model, settings: &SolveSettings) {
    if let Some(log_file) = &settings.log_file {
        model.set_option("output_flag", true);
        model.set_option("log_to_console", false);
        model.set_option("log_file", log_file.to_string_lossy().as_ref());
    } else {
        model.make_quiet();
    }

    let solver = match settings.method {
        SolverMethod::Choose => "choose",
        SolverMethod::Simplex => "simplex",
        SolverMethod::Barrier => "ipm",
    };
    model.set_option("solver", solver);

    if settings.threads > 0 {
        model.set_option("threads", i32::try_from(settings.threads).unwrap_or(i32::MAX));
    }
    if let Some(time_limit) = settings.time_limit {
        model.set_option("time_limit", time_limit);
    }

    // Each level of numerical focus adds to the ones below it
    if settings.numeric_focus >= 1 {
        model.set_option("simplex_scale_strategy", CONSERVATIVE_SCALE_STRATEGY);
        model.set_option("primal_feasibility_tolerance", TIGHT_FEASIBILITY_TOLERANCE);
        model.set_option("dual_feasibility_tolerance", TIGHT_FEASIBILITY_TOLERANCE);
    }
    if settings.numeric_focus >= 2 {
        model.set_option("presolve", "off");
    }
    if settings.numeric_focus >= 3 {
        model.set_option("solver", "ipm");
        model.set_option("run_crossover", "on");
    }
}

/// Translate a HiGHS model status into a [`TerminationStatus`]
fn termination_status(status: HighsModelStatus) -> Result<TerminationStatus> {
    let status = match status {
        HighsModelStatus::Optimal | HighsModelStatus::ModelEmpty => TerminationStatus::Optimal,
        HighsModelStatus::Infeasible => TerminationStatus::Infeasible,
        HighsModelStatus::Unbounded => TerminationStatus::Unbounded,
        HighsModelStatus::UnboundedOrInfeasible => TerminationStatus::InfeasibleOrUnbounded,
        HighsModelStatus::ReachedTimeLimit => TerminationStatus::TimeLimit,
        HighsModelStatus::ReachedIterationLimit => TerminationStatus::IterationLimit,
        HighsModelStatus::ObjectiveBound | HighsModelStatus::ObjectiveTarget => {
            TerminationStatus::Cutoff
        }
        HighsModelStatus::SolveError | HighsModelStatus::Unknown => TerminationStatus::Numeric,
        HighsModelStatus::NotSet
        | HighsModelStatus::LoadError
        | HighsModelStatus::ModelError
        | HighsModelStatus::PresolveError
        | HighsModelStatus::PostsolveError => {
            bail!("Incoherent model: {status:?}")
        }
    };

    Ok(status)
}

/// Whether the column values left by a solve with this status can be reported.
///
/// A solve stopped by a limit may leave an infeasible point behind, so its columns are only kept
/// when they satisfy every bound and row of `problem`.
fn usable_solution(status: TerminationStatus, problem: &ProblemData, columns: &[f64]) -> bool {
    match status {
        TerminationStatus::Optimal | TerminationStatus::Suboptimal => true,
        TerminationStatus::Cutoff
        | TerminationStatus::TimeLimit
        | TerminationStatus::IterationLimit
        | TerminationStatus::NodeLimit
        | TerminationStatus::SolutionLimit
        | TerminationStatus::Interrupted => {
            problem.is_feasible(columns, LIMIT_FEASIBILITY_TOLERANCE)
        }
        TerminationStatus::Infeasible
        | TerminationStatus::Unbounded
        | TerminationStatus::InfeasibleOrUnbounded
        | TerminationStatus::Numeric => false,
    }
}

impl SolverAdapter for HighsSolver {
    fn create_variable(&mut self, lower: f64, upper: f64) -> VarHandle {
        self.problem.add_column(lower, upper)
    }

    fn add_constraint(
        &mut self,
        expr: Expression,
        sense: ConstraintSense,
        rhs: f64,
    ) -> Result<()> {
        ensure!(
            !expr.is_quadratic(),
            "HiGHS backend does not support quadratic constraints"
        );
        self.problem.add_row(expr, sense, rhs)
    }

    fn set_objective(&mut self, expr: Expression, sense: ObjectiveSense) -> Result<()> {
        ensure!(
            !expr.is_quadratic(),
            "HiGHS backend does not support quadratic objectives"
        );
        self.problem.set_objective(expr, sense)
    }

    fn solve(
        &mut self,
        settings: &SolveSettings,
        callback: &mut dyn FnMut(SolveEvent),
    ) -> Result<TerminationStatus> {
        self.solution = None;
        self.objective_value = None;

        callback(SolveEvent::Message(format!(
            "Solving problem with {} variables and {} constraints",
            self.problem.columns().len(),
            self.problem.rows().len()
        )));
        debug!("HiGHS settings: {settings:?}");

        let model = self.build_model(settings);
        let solved = match model.try_solve() {
            Ok(solved) => solved,
            Err(status) => bail!("Incoherent model: {status:?}"),
        };

        let status = termination_status(solved.status())?;
        let columns = solved.get_solution().columns().to_vec();
        if usable_solution(status, &self.problem, &columns) {
            let objective = solved.objective_value() + self.objective_constant();
            self.solution = Some(columns);
            self.objective_value = Some(objective);
            callback(SolveEvent::Progress {
                iteration: None,
                objective: Some(objective),
                gap: None,
            });
        }
        callback(SolveEvent::Message(format!("Solver finished: {status}")));

        Ok(status)
    }

    fn value(&self, var: VarHandle) -> Option<f64> {
        self.solution.as_ref()?.get(var.index()).copied()
    }

    fn objective_value(&self) -> Option<f64> {
        self.objective_value
    }

    fn bounds(&self, var: VarHandle) -> (f64, f64) {
        self.problem.columns()[var.index()]
    }

    fn num_variables(&self) -> usize {
        self.problem.columns().len()
    }

    fn num_constraints(&self) -> usize {
        self.problem.rows().len()
    }
}
