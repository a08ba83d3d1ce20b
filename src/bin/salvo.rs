use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use salvo::adapters::{adapter_factory, AdapterConfig};
use salvo::config::{find_project_root, ProjectConfig};
use salvo::loader::load_scenario_file;
use salvo::orchestrator::{default_parallelism, TrialRunner};
use salvo::recording::{reevaluate, ReevalOptions, TraceRecorder, TraceReplayer};
use salvo::render;
use salvo::storage::RunStore;
use salvo::suite::Verdict;

#[derive(Parser)]
#[command(name = "salvo")]
#[command(about = "Reliability testing for tool-using LLM agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scaffold a salvo.yaml and an example scenario
    Init,
    /// Load and validate a scenario file without running it
    Validate {
        /// Path to the scenario YAML file
        path: PathBuf,
    },
    /// Run a scenario N times and report the verdict
    Run {
        /// Path to the scenario YAML file
        path: PathBuf,
        /// Number of trials
        #[arg(short = 'n', long = "trials", default_value_t = 3)]
        trials: u32,
        /// Max concurrent trials (default: min(N, CPU count, 4))
        #[arg(long)]
        parallel: Option<usize>,
        /// Record redacted traces for replay and re-evaluation
        #[arg(long)]
        record: bool,
        /// Stop when the outcome is already determined
        #[arg(long)]
        early_stop: bool,
        /// Exclude infra-errored trials from the verdict
        #[arg(long)]
        allow_infra: bool,
        /// Override the scenario pass threshold
        #[arg(long)]
        threshold: Option<f64>,
        /// Emit the raw SuiteResult as JSON on stdout
        #[arg(long)]
        json: bool,
        /// Show per-trial detail even on PASS
        #[arg(short = 'V', long)]
        verbose: bool,
    },
    /// Inspect stored runs without touching any provider
    Report {
        /// Run id (default: latest)
        run_id: Option<String>,
        /// List stored runs instead of one run's detail
        #[arg(long)]
        history: bool,
        /// Show the cross-trial failure ranking
        #[arg(long)]
        failures: bool,
        /// Filter runs by scenario id
        #[arg(long)]
        scenario: Option<String>,
        /// Cap the number of listed runs
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Display a recorded trace without making API calls
    Replay {
        /// Trace id (default: latest recorded)
        trace_id: Option<String>,
        /// Exit cleanly when the trace is missing
        #[arg(long)]
        allow_partial: bool,
    },
    /// Re-evaluate a recorded trace with original or updated assertions
    Reeval {
        /// Trace id (default: latest recorded)
        trace_id: Option<String>,
        /// Updated scenario file (default: the recorded snapshot)
        #[arg(long, short = 's')]
        scenario: Option<PathBuf>,
        /// Skip content-dependent assertions on metadata_only traces
        #[arg(long)]
        allow_partial_reeval: bool,
        /// Refuse when the scenario changed since recording
        #[arg(long)]
        strict_scenario: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("salvo=warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Init => cmd_init(),
        Command::Validate { path } => cmd_validate(&path),
        Command::Run {
            path,
            trials,
            parallel,
            record,
            early_stop,
            allow_infra,
            threshold,
            json,
            verbose,
        } => {
            cmd_run(
                &path, trials, parallel, record, early_stop, allow_infra, threshold, json, verbose,
            )
            .await
        }
        Command::Report {
            run_id,
            history,
            failures,
            scenario,
            limit,
        } => cmd_report(run_id.as_deref(), history, failures, scenario.as_deref(), limit),
        Command::Replay {
            trace_id,
            allow_partial,
        } => cmd_replay(trace_id.as_deref(), allow_partial),
        Command::Reeval {
            trace_id,
            scenario,
            allow_partial_reeval,
            strict_scenario,
        } => {
            cmd_reeval(
                trace_id.as_deref(),
                scenario.as_deref(),
                allow_partial_reeval,
                strict_scenario,
            )
            .await
        }
    };

    ExitCode::from(code)
}

const EXAMPLE_SCENARIO: &str = r#"description: weather agent answers with the forecast tool
adapter: openai
model: gpt-4o-mini
system_prompt: You are a weather assistant. Use the forecast tool.
prompt: What is the weather in Paris tomorrow?
tools:
  - name: get_forecast
    description: Fetch the forecast for a city
    parameters:
      type: object
      properties:
        city:
          type: string
      required: [city]
    mock_response:
      city: Paris
      forecast: sunny
      high_c: 24
assertions:
  - type: tool_called
    tool: get_forecast
    required: true
  - type: output_contains
    value: sunny
threshold: 0.8
max_turns: 5
"#;

const EXAMPLE_CONFIG: &str = r#"default_adapter: openai
default_model: gpt-4o
scenarios_dir: scenarios
storage_dir: .salvo
judge:
  adapter: openai
  model: gpt-4o-mini
  k: 3
recording:
  mode: full
  custom_patterns: []
"#;

fn cmd_init() -> u8 {
    let config_path = Path::new("salvo.yaml");
    if config_path.exists() {
        eprintln!("error: salvo.yaml already exists; refusing to overwrite");
        return 1;
    }
    let scenario_path = Path::new("scenarios/example.yaml");
    if scenario_path.exists() {
        eprintln!("error: scenarios/example.yaml already exists; refusing to overwrite");
        return 1;
    }

    if let Err(err) = std::fs::write(config_path, EXAMPLE_CONFIG) {
        eprintln!("error: cannot write salvo.yaml: {err}");
        return 1;
    }
    if let Err(err) = std::fs::create_dir_all("scenarios")
        .and_then(|_| std::fs::write(scenario_path, EXAMPLE_SCENARIO))
    {
        eprintln!("error: cannot write scenarios/example.yaml: {err}");
        return 1;
    }

    println!("created salvo.yaml and scenarios/example.yaml");
    println!("next: set OPENAI_API_KEY and run `salvo run scenarios/example.yaml`");
    0
}

fn cmd_validate(path: &Path) -> u8 {
    match load_scenario_file(path) {
        Ok(scenario) => {
            println!(
                "ok: {} ({} assertions, {} tools, threshold {:.2})",
                scenario.name(),
                scenario.assertions.len(),
                scenario.tools.len(),
                scenario.threshold
            );
            0
        }
        Err(err) => {
            eprintln!("invalid scenario: {err}");
            1
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_run(
    path: &Path,
    trials: u32,
    parallel: Option<usize>,
    record: bool,
    early_stop: bool,
    allow_infra: bool,
    threshold: Option<f64>,
    json: bool,
    verbose: bool,
) -> u8 {
    let scenario = match load_scenario_file(path) {
        Ok(scenario) => scenario,
        Err(err) => {
            eprintln!("invalid scenario: {err}");
            return 1;
        }
    };

    let factory = match adapter_factory(&scenario.adapter) {
        Ok(factory) => factory,
        Err(err) => {
            eprintln!("adapter error: {err}");
            return Verdict::InfraError.exit_code() as u8;
        }
    };

    let project_root = find_project_root(path);
    let project = match ProjectConfig::load(&project_root) {
        Ok(project) => project,
        Err(err) => {
            eprintln!("invalid project config: {err}");
            return 1;
        }
    };
    let store = Arc::new(RunStore::with_storage_dir(&project_root, &project.storage_dir));

    let mut config = AdapterConfig::new(scenario.model.clone());
    config.temperature = scenario.temperature;
    config.seed = scenario.seed;
    config.extras = scenario.extras.clone();

    let effective_threshold = threshold.unwrap_or(scenario.threshold);
    let parallel = parallel.unwrap_or_else(|| default_parallelism(trials));
    let scenario_file = path.display().to_string();

    let runner = TrialRunner::new(factory, scenario.clone(), config)
        .with_trials(trials)
        .with_parallelism(parallel)
        .with_early_stop(early_stop)
        .with_allow_infra(allow_infra)
        .with_threshold(effective_threshold)
        .with_judge_config(project.judge.clone())
        .with_verbose(verbose)
        .with_store(Arc::clone(&store));

    let suite = match runner.run_all().await {
        Ok(suite) => suite,
        Err(err) => {
            eprintln!("run failed: {err}");
            return Verdict::InfraError.exit_code() as u8;
        }
    };

    if let Err(err) = store.save_suite(&suite) {
        eprintln!("warning: could not persist run: {err}");
    }

    if record {
        match TraceRecorder::new(Arc::clone(&store), &project.recording) {
            Ok(recorder) => {
                if let Err(err) = recorder.record_suite(&suite, &scenario, &scenario_file) {
                    eprintln!("warning: recording failed: {err}");
                }
            }
            Err(err) => eprintln!("warning: recorder unavailable: {err}"),
        }
    }

    if json {
        match serde_json::to_string_pretty(&suite) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => {
                eprintln!("serialization error: {err}");
                return Verdict::InfraError.exit_code() as u8;
            }
        }
    } else {
        let detailed = verbose || render::is_ci() || suite.verdict != Verdict::Pass;
        print!("{}", render::render_suite(&suite, detailed));
        println!("Run saved: {}", suite.run_id);
        if record {
            for trial in &suite.trials {
                println!("  trial {} trace {}", trial.trial_index, trial.trace_id);
            }
        }
    }

    suite.verdict.exit_code() as u8
}

fn cmd_report(
    run_id: Option<&str>,
    history: bool,
    failures: bool,
    scenario: Option<&str>,
    limit: usize,
) -> u8 {
    let project_root = find_project_root(Path::new("."));
    let project = ProjectConfig::load(&project_root).unwrap_or_default();
    let store = RunStore::with_storage_dir(&project_root, &project.storage_dir);

    if history {
        let runs = match store.list_runs(scenario) {
            Ok(runs) => runs,
            Err(err) => {
                eprintln!("error: {err}");
                return 1;
            }
        };
        if runs.is_empty() {
            println!("no stored runs");
            return 0;
        }
        for run_id in runs.iter().rev().take(limit) {
            match store.load_suite(run_id) {
                Ok(Some(suite)) => println!(
                    "{run_id}  {}  {}  pass_rate={:.0}%  score={:.2}",
                    suite.verdict,
                    suite.scenario_id,
                    suite.pass_rate * 100.0,
                    suite.mean_score
                ),
                _ => println!("{run_id}  (unreadable)"),
            }
        }
        return 0;
    }

    let resolved = match run_id {
        Some(run_id) => Some(run_id.to_string()),
        None => match store.latest_run_id() {
            Ok(latest) => latest,
            Err(err) => {
                eprintln!("error: {err}");
                return 1;
            }
        },
    };
    let Some(resolved) = resolved else {
        println!("no stored runs; run `salvo run` first");
        return 0;
    };

    match store.load_suite(&resolved) {
        Ok(Some(suite)) => {
            print!("{}", render::render_suite(&suite, failures));
            0
        }
        Ok(None) => {
            eprintln!("error: no run with id '{resolved}'");
            1
        }
        Err(err) => {
            eprintln!("error: {err}");
            1
        }
    }
}

fn cmd_replay(trace_id: Option<&str>, allow_partial: bool) -> u8 {
    let project_root = find_project_root(Path::new("."));
    let project = ProjectConfig::load(&project_root).unwrap_or_default();
    let store = Arc::new(RunStore::with_storage_dir(&project_root, &project.storage_dir));
    let replayer = TraceReplayer::new(store);

    match replayer.load(trace_id) {
        Ok(Some(recorded)) => {
            print!("{}", render::render_replay(&recorded));
            0
        }
        Ok(None) => {
            if allow_partial {
                println!("no recorded trace found; nothing to replay");
                0
            } else {
                eprintln!("error: no recorded trace found; run `salvo run --record` first");
                1
            }
        }
        Err(err) => {
            eprintln!("error: {err}");
            1
        }
    }
}

async fn cmd_reeval(
    trace_id: Option<&str>,
    scenario_path: Option<&Path>,
    allow_partial_reeval: bool,
    strict_scenario: bool,
) -> u8 {
    let project_root = find_project_root(Path::new("."));
    let project = ProjectConfig::load(&project_root).unwrap_or_default();
    let store = Arc::new(RunStore::with_storage_dir(&project_root, &project.storage_dir));
    let replayer = TraceReplayer::new(Arc::clone(&store));

    let recorded = match replayer.load(trace_id) {
        Ok(Some(recorded)) => recorded,
        Ok(None) => {
            eprintln!("error: no recorded trace found; run `salvo run --record` first");
            return Verdict::InfraError.exit_code() as u8;
        }
        Err(err) => {
            eprintln!("error: {err}");
            return Verdict::InfraError.exit_code() as u8;
        }
    };

    let fresh_scenario = match scenario_path {
        Some(path) => match load_scenario_file(path) {
            Ok(scenario) => Some(scenario),
            Err(err) => {
                eprintln!("invalid scenario: {err}");
                return 1;
            }
        },
        None => None,
    };

    let options = ReevalOptions {
        allow_partial: allow_partial_reeval,
        strict_scenario,
    };

    match reevaluate(
        &store,
        &recorded,
        fresh_scenario.as_ref(),
        Some(&project.judge),
        options,
    )
    .await
    {
        Ok(outcome) => {
            print!("{}", render::render_reval(&outcome.reval, &outcome.notices));
            let hard_failed = outcome
                .reval
                .eval_results
                .iter()
                .any(|r| r.required && !r.passed);
            if hard_failed {
                Verdict::HardFail.exit_code() as u8
            } else if outcome.reval.passed {
                0
            } else {
                1
            }
        }
        Err(err) => {
            eprintln!("re-evaluation refused: {err}");
            1
        }
    }
}
