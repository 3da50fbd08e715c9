//! Sandboxed renderer for generated visualization scripts.
//!
//! Scripts run in a freshly built `rhai` engine whose only bindings are `df`, `plt` and
//! `sns`. The engine has no module resolver, `eval` is disabled, output primitives go to
//! the log, and both an operation limit and a wall-clock deadline bound execution.
//! Containment is about faults and hangs; it is not a security boundary.

pub mod figure;
pub mod frame;

use std::fmt::{Display, Formatter};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Array, Dynamic, Engine, EvalAltResult, INT, Scope};
use serde::Serialize;

use crate::models::TabularResult;

pub use figure::{Figure, RenderedImage, Series, SeriesKind};
pub use frame::DataFrame;

pub const DEFAULT_MAX_OPERATIONS: u64 = 5_000_000;
pub const DEFAULT_WALL_CLOCK: Duration = Duration::from_secs(5);
const PROGRESS_CHECK_INTERVAL: u64 = 1_024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderBudget {
    pub max_operations: u64,
    pub wall_clock: Duration,
}

impl Default for RenderBudget {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_MAX_OPERATIONS,
            wall_clock: DEFAULT_WALL_CLOCK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderErrorKind {
    Script,
    BudgetExceeded,
    Panicked,
}

impl RenderErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::BudgetExceeded => "budget_exceeded",
            Self::Panicked => "panicked",
        }
    }
}

/// A contained rendering fault. `code` is the script that raised it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderError {
    pub kind: RenderErrorKind,
    pub message: String,
    pub code: String,
}

impl Display for RenderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "render {}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for RenderError {}

#[derive(Debug, Clone, Copy, Default)]
pub struct SandboxedRenderer {
    budget: RenderBudget,
}

impl SandboxedRenderer {
    #[must_use]
    pub fn new(budget: RenderBudget) -> Self {
        Self { budget }
    }

    #[must_use]
    pub fn budget(&self) -> RenderBudget {
        self.budget
    }

    pub fn render(
        &self,
        code: &str,
        table: &Arc<TabularResult>,
    ) -> Result<RenderedImage, RenderError> {
        let started = Instant::now();
        let figure = Arc::new(Mutex::new(Figure::default()));

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let engine = build_engine(self.budget, started);
            let mut scope = Scope::new();
            scope.push("df", DataFrame::new(Arc::clone(table)));
            scope.push("plt", PyplotHandle::new(Arc::clone(&figure)));
            scope.push("sns", SeabornHandle::new(Arc::clone(&figure)));
            engine.run_with_scope(&mut scope, code)
        }));

        let fail = |kind: RenderErrorKind, message: String| RenderError {
            kind,
            message,
            code: code.to_string(),
        };
        let result = match outcome {
            Ok(Ok(())) => Ok(lock_figure(&figure).to_image()),
            Ok(Err(error)) => {
                let kind = if is_budget_error(&error) {
                    RenderErrorKind::BudgetExceeded
                } else {
                    RenderErrorKind::Script
                };
                Err(fail(kind, error.to_string()))
            }
            Err(payload) => Err(fail(RenderErrorKind::Panicked, panic_message(&*payload))),
        };
        drop(figure);

        match &result {
            Ok(image) => tracing::info!(
                series = image.series_count,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "figure rendered"
            ),
            Err(error) => tracing::warn!(kind = error.kind.as_str(), error = %error.message, "render failed"),
        }
        result
    }
}

fn build_engine(budget: RenderBudget, started: Instant) -> Engine {
    let mut engine = Engine::new();
    engine.set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");
    engine.set_max_operations(budget.max_operations);
    engine.set_max_call_levels(32);
    engine.set_max_expr_depths(64, 32);
    engine.set_max_string_size(64 * 1024);
    engine.set_max_array_size(100_000);
    engine.set_max_map_size(10_000);

    let deadline = started + budget.wall_clock;
    engine.on_progress(move |operations| {
        if operations % PROGRESS_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
            Some(Dynamic::from("wall-clock budget exhausted".to_string()))
        } else {
            None
        }
    });
    engine.on_print(|text| tracing::debug!(target: "libinsight::render", "{text}"));
    engine.on_debug(|text, _source, position| {
        tracing::debug!(target: "libinsight::render", %position, "{text}");
    });

    register_data_frame(&mut engine);
    register_pyplot(&mut engine);
    register_seaborn(&mut engine);
    engine
}

fn is_budget_error(error: &EvalAltResult) -> bool {
    match error {
        EvalAltResult::ErrorTooManyOperations(..) | EvalAltResult::ErrorTerminated(..) => true,
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => is_budget_error(inner),
        _ => false,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "renderer panicked".to_string()
    }
}

fn lock_figure(figure: &Mutex<Figure>) -> MutexGuard<'_, Figure> {
    figure.lock().unwrap_or_else(PoisonError::into_inner)
}

fn register_data_frame(engine: &mut Engine) {
    engine
        .register_type_with_name::<DataFrame>("DataFrame")
        .register_get("columns", |df: &mut DataFrame| df.columns())
        .register_fn("len", |df: &mut DataFrame| df.len() as INT)
        .register_fn("is_empty", |df: &mut DataFrame| df.is_empty())
        .register_indexer_get(|df: &mut DataFrame, name: &str| df.column(name))
        .register_fn("column", |df: &mut DataFrame, name: &str| df.column(name))
        .register_fn("head", |df: &mut DataFrame, count: INT| {
            df.head(usize::try_from(count).unwrap_or(0))
        })
        .register_fn("head", |df: &mut DataFrame| df.head(5))
        .register_fn("drop_duplicates", |df: &mut DataFrame| df.drop_duplicates())
        .register_fn(
            "sort_values",
            |df: &mut DataFrame, name: &str, ascending: bool| df.sort_values(name, ascending),
        )
        .register_fn("sort_values", |df: &mut DataFrame, name: &str| {
            df.sort_values(name, true)
        });
}

#[derive(Debug, Clone)]
struct PyplotHandle {
    figure: Arc<Mutex<Figure>>,
}

impl PyplotHandle {
    fn new(figure: Arc<Mutex<Figure>>) -> Self {
        Self { figure }
    }

    fn figure(&self) -> MutexGuard<'_, Figure> {
        lock_figure(&self.figure)
    }

    fn add(
        &self,
        kind: SeriesKind,
        x: &Array,
        y: &Array,
        label: Option<String>,
    ) -> Result<(), Box<EvalAltResult>> {
        let series = build_series(kind, x, y, label)?;
        self.figure().add_series(series);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct SeabornHandle {
    figure: Arc<Mutex<Figure>>,
}

impl SeabornHandle {
    fn new(figure: Arc<Mutex<Figure>>) -> Self {
        Self { figure }
    }

    fn plot(
        &self,
        kind: SeriesKind,
        df: &DataFrame,
        x: &str,
        y: &str,
    ) -> Result<(), Box<EvalAltResult>> {
        let xs = df.column(x)?;
        let ys = df.column(y)?;
        let series = build_series(kind, &xs, &ys, None)?;

        let mut figure = lock_figure(&self.figure);
        figure.add_series(series);
        figure.set_x_label(x);
        figure.set_y_label(y);
        Ok(())
    }
}

fn register_pyplot(engine: &mut Engine) {
    engine
        .register_type_with_name::<PyplotHandle>("Pyplot")
        .register_fn(
            "figure",
            |plt: &mut PyplotHandle, width: Dynamic, height: Dynamic| {
                let width = number(&width)?;
                let height = number(&height)?;
                plt.figure().reset(width, height);
                Ok::<_, Box<EvalAltResult>>(())
            },
        )
        .register_fn("figure", |plt: &mut PyplotHandle| {
            plt.figure().reset(
                figure::DEFAULT_WIDTH_INCHES,
                figure::DEFAULT_HEIGHT_INCHES,
            );
        })
        .register_fn("bar", |plt: &mut PyplotHandle, x: Array, y: Array| {
            plt.add(SeriesKind::Bar, &x, &y, None)
        })
        .register_fn(
            "bar",
            |plt: &mut PyplotHandle, x: Array, y: Array, label: &str| {
                plt.add(SeriesKind::Bar, &x, &y, Some(label.to_string()))
            },
        )
        .register_fn("barh", |plt: &mut PyplotHandle, y: Array, width: Array| {
            plt.add(SeriesKind::BarH, &y, &width, None)
        })
        .register_fn(
            "barh",
            |plt: &mut PyplotHandle, y: Array, width: Array, label: &str| {
                plt.add(SeriesKind::BarH, &y, &width, Some(label.to_string()))
            },
        )
        .register_fn("plot", |plt: &mut PyplotHandle, x: Array, y: Array| {
            plt.add(SeriesKind::Line, &x, &y, None)
        })
        .register_fn(
            "plot",
            |plt: &mut PyplotHandle, x: Array, y: Array, label: &str| {
                plt.add(SeriesKind::Line, &x, &y, Some(label.to_string()))
            },
        )
        .register_fn("scatter", |plt: &mut PyplotHandle, x: Array, y: Array| {
            plt.add(SeriesKind::Scatter, &x, &y, None)
        })
        .register_fn(
            "scatter",
            |plt: &mut PyplotHandle, x: Array, y: Array, label: &str| {
                plt.add(SeriesKind::Scatter, &x, &y, Some(label.to_string()))
            },
        )
        .register_fn(
            "pie",
            |plt: &mut PyplotHandle, values: Array, labels: Array| {
                plt.add(SeriesKind::Pie, &labels, &values, None)
            },
        )
        .register_fn("title", |plt: &mut PyplotHandle, text: &str| {
            plt.figure().set_title(text);
        })
        .register_fn("xlabel", |plt: &mut PyplotHandle, text: &str| {
            plt.figure().set_x_label(text);
        })
        .register_fn("ylabel", |plt: &mut PyplotHandle, text: &str| {
            plt.figure().set_y_label(text);
        })
        .register_fn("xticks", |plt: &mut PyplotHandle, rotation: Dynamic| {
            let rotation = number(&rotation)?;
            plt.figure().set_x_tick_rotation(rotation);
            Ok::<_, Box<EvalAltResult>>(())
        })
        .register_fn("legend", |plt: &mut PyplotHandle| {
            plt.figure().enable_legend();
        })
        .register_fn("grid", |plt: &mut PyplotHandle| plt.figure().set_grid(true))
        .register_fn("grid", |plt: &mut PyplotHandle, enabled: bool| {
            plt.figure().set_grid(enabled);
        })
        // Layout is computed at capture time; display and file output are disabled.
        .register_fn("tight_layout", |_: &mut PyplotHandle| {})
        .register_fn("show", |_: &mut PyplotHandle| {})
        .register_fn("close", |_: &mut PyplotHandle| {})
        .register_fn("savefig", |_: &mut PyplotHandle, _path: &str| {});
}

fn register_seaborn(engine: &mut Engine) {
    engine
        .register_type_with_name::<SeabornHandle>("Seaborn")
        .register_fn(
            "barplot",
            |sns: &mut SeabornHandle, df: DataFrame, x: &str, y: &str| {
                sns.plot(SeriesKind::Bar, &df, x, y)
            },
        )
        .register_fn(
            "lineplot",
            |sns: &mut SeabornHandle, df: DataFrame, x: &str, y: &str| {
                sns.plot(SeriesKind::Line, &df, x, y)
            },
        )
        .register_fn(
            "scatterplot",
            |sns: &mut SeabornHandle, df: DataFrame, x: &str, y: &str| {
                sns.plot(SeriesKind::Scatter, &df, x, y)
            },
        );
}

fn build_series(
    kind: SeriesKind,
    x: &Array,
    y: &Array,
    label: Option<String>,
) -> Result<Series, Box<EvalAltResult>> {
    if x.len() != y.len() {
        return Err(format!(
            "x and y must have the same length (got {} and {})",
            x.len(),
            y.len()
        )
        .into());
    }

    let values = y
        .iter()
        .map(|value| {
            if value.is_unit() {
                Ok(f64::NAN)
            } else {
                number(value)
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    let categories = x.iter().map(category_label).collect();

    Ok(Series {
        kind,
        label,
        categories,
        values,
    })
}

fn number(value: &Dynamic) -> Result<f64, Box<EvalAltResult>> {
    if let Ok(integer) = value.as_int() {
        return Ok(integer as f64);
    }
    if let Ok(float) = value.as_float() {
        return Ok(float);
    }
    if value.is_string()
        && let Ok(parsed) = value.to_string().trim().replace(',', "").parse::<f64>()
    {
        return Ok(parsed);
    }
    Err(format!("expected a number, got {} `{value}`", value.type_name()).into())
}

fn category_label(value: &Dynamic) -> String {
    if value.is_unit() {
        String::new()
    } else {
        value.to_string()
    }
}
