use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use grader_core::{
    cosine_similarity, length_score, load_answer_key, load_recognition_pages, load_report,
    save_report, AnswerEvaluator, EmbeddingProvider, EvaluationReport, GradeError, GradingRun,
    HashEmbeddingProvider, LazyBertProvider, ModelPaths, StudentAnswer, SummaryTotals,
    DEFAULT_EMBEDDING_DIM, DEFAULT_MAX_TOKENS,
};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// BERT encoder loaded from --model-dir
    Bert,
    /// Model-free hashing embeddings (offline runs, smoke tests)
    Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "grader",
    version,
    about = "Score recognized exam answers against an answer key"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        env = "GRADER_BACKEND",
        default_value_t = Backend::Bert
    )]
    backend: Backend,

    /// Directory holding model.safetensors, config.json and tokenizer.json.
    #[arg(long, global = true, env = "GRADER_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Token budget per text; longer input keeps its leading tokens.
    #[arg(
        long,
        global = true,
        env = "GRADER_MAX_TOKENS",
        default_value_t = DEFAULT_MAX_TOKENS
    )]
    max_tokens: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct EvaluateArgs {
    #[arg(long)]
    answer_key: PathBuf,
    /// Recognition output for one page: a list of answers or the pipeline's
    /// result document. Repeat once per page, in page order.
    #[arg(long, required = true)]
    answers: Vec<PathBuf>,
    /// Overrides the answer key's total_test_marks.
    #[arg(long)]
    total_test_marks: Option<f64>,
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    submission_id: Option<String>,
    #[arg(long)]
    student_id: Option<String>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    /// Compute embeddings for all questions in parallel.
    #[arg(long)]
    parallel: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Grade one submission.
    Evaluate(EvaluateArgs),
    /// Print the summary of a saved evaluation report.
    Summary {
        #[arg(long)]
        report: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Score a single reference/candidate pair.
    Compare {
        #[arg(long)]
        reference: String,
        #[arg(long)]
        candidate: String,
    },
}

fn make_embedder(cli: &Cli) -> Result<Box<dyn EmbeddingProvider>> {
    match cli.backend {
        Backend::Hash => Ok(Box::new(HashEmbeddingProvider::new(DEFAULT_EMBEDDING_DIM))),
        Backend::Bert => {
            let dir = cli.model_dir.as_deref().ok_or_else(|| {
                GradeError::ModelUnavailable(
                    "--model-dir (or GRADER_MODEL_DIR) is required for the bert backend"
                        .to_string(),
                )
            })?;
            info!(model_dir = %dir.display(), "using bert backend");
            Ok(Box::new(
                LazyBertProvider::new(ModelPaths::from_dir(dir)).with_max_tokens(cli.max_tokens),
            ))
        }
    }
}

fn print_totals(out: &mut impl Write, totals: &SummaryTotals) -> io::Result<()> {
    writeln!(
        out,
        "final_score={}/{} total_obtained_marks={:.2} total_marks_allotted={} processing_time={:.2}s",
        totals.final_score,
        totals.total_test_marks,
        totals.total_obtained_marks,
        totals.total_marks_allotted,
        totals.processing_time
    )
}

fn print_report(report: &EvaluationReport, format: OutputFormat) -> Result<()> {
    let mut out = io::stdout().lock();
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, report).context("serialize report")?;
            writeln!(out)?;
        }
        OutputFormat::Text => {
            writeln!(out, "evaluation_id={}", report.evaluation_id)?;
            print_totals(&mut out, &report.evaluation.summary)?;
            for r in &report.evaluation.results {
                writeln!(
                    out,
                    "question={} similarity={:.2} length={:.2} score={:.2}/{}",
                    r.question_id,
                    r.similarity_score,
                    r.length_score,
                    r.question_score,
                    r.marks_allotted
                )?;
            }
        }
    }
    Ok(())
}

/// Everything after the run enters `processing`. Any error here fails the run.
fn grade(cli: &Cli, args: &EvaluateArgs, evaluation_id: &str) -> Result<EvaluationReport> {
    let key = load_answer_key(&args.answer_key)
        .with_context(|| format!("load answer key {}", args.answer_key.display()))?;
    info!(
        questions = key.answers.len(),
        total_marks_allotted = key.total_marks_allotted(),
        "answer key loaded"
    );
    let student_answers: Vec<StudentAnswer> = load_recognition_pages(&args.answers)
        .context("load recognized answers")?
        .into_iter()
        .map(StudentAnswer::from)
        .collect();
    let total_test_marks = args.total_test_marks.unwrap_or(key.total_test_marks);

    let evaluator =
        AnswerEvaluator::new(make_embedder(cli)?).with_parallel_embeddings(args.parallel);
    let evaluation = evaluator
        .evaluate(&key.answers, &student_answers, total_test_marks)
        .context("evaluate answers")?;

    let report = EvaluationReport {
        evaluation_id: evaluation_id.to_string(),
        submission_id: args.submission_id.clone(),
        student_id: args.student_id.clone(),
        evaluation,
    };
    if let Some(path) = &args.output {
        save_report(path, &report).with_context(|| format!("write report {}", path.display()))?;
    }
    Ok(report)
}

fn execute_run(cli: &Cli, args: &EvaluateArgs, run: &mut GradingRun) -> Result<EvaluationReport> {
    run.on_processing();
    match grade(cli, args, &run.run_id) {
        Ok(report) => {
            run.on_completed(
                &report.evaluation,
                args.output.as_ref().map(|p| p.display().to_string()),
            );
            info!(
                run_id = %run.run_id,
                status = ?run.status,
                final_score = ?run.final_score,
                "grading run finished"
            );
            Ok(report)
        }
        Err(err) => {
            let reason = format!("{err:#}");
            error!(run_id = %run.run_id, error = %reason, "evaluation failed");
            run.on_failed(reason);
            Err(err)
        }
    }
}

fn run_evaluate(cli: &Cli, args: &EvaluateArgs) -> Result<()> {
    let evaluation_id = format!("eval-{}", chrono::Utc::now().timestamp_millis());
    let mut run = GradingRun::start(evaluation_id, args.submission_id.clone());
    let report = execute_run(cli, args, &mut run)?;
    print_report(&report, args.format)
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Evaluate(args) => run_evaluate(&cli, args)?,
        Commands::Summary {
            report: path,
            format,
        } => {
            let report =
                load_report(path).with_context(|| format!("load report {}", path.display()))?;
            let mut out = io::stdout().lock();
            match format {
                OutputFormat::Json => {
                    let value = serde_json::json!({
                        "evaluation_id": report.evaluation_id,
                        "summary": report.evaluation.summary,
                    });
                    serde_json::to_writer_pretty(&mut out, &value)?;
                    writeln!(out)?;
                }
                OutputFormat::Text => {
                    writeln!(out, "evaluation_id={}", report.evaluation_id)?;
                    print_totals(&mut out, &report.evaluation.summary)?;
                }
            }
        }
        Commands::Compare {
            reference,
            candidate,
        } => {
            let embedder = make_embedder(&cli)?;
            let reference_embedding = embedder.embed(reference)?;
            let candidate_embedding = embedder.embed(candidate)?;
            let similarity = cosine_similarity(&reference_embedding, &candidate_embedding)?;
            println!(
                "similarity={:.4} length_score={:.2}",
                similarity,
                length_score(reference, candidate)
            );
        }
    }

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
        .ok();

    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
