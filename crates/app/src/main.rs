use std::fmt;
use std::sync::Arc;

use quiz_core::model::{Session, SessionKey, SessionStatus, StoredResult, TestCode, UserId};
use quiz_core::scoring::{self, Tier};
use quiz_core::time::format_remaining;
use services::{
    Clock, DeliveryMode, EngineConfig, HttpQuizApi, JsonLinesHost, Opened, QuizEngine,
    SessionController, TestLoader, TokioScheduler,
};
use storage::repository::{InMemoryStore, Storage};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingCode,
    UnknownArg(String),
    InvalidCode { raw: String },
    InvalidUserId { raw: String },
    InvalidDelivery { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingCode => write!(f, "--code is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidCode { raw } => write!(f, "invalid --code value: {raw}"),
            ArgsError::InvalidUserId { raw } => write!(f, "invalid --user value: {raw}"),
            ArgsError::InvalidDelivery { raw } => write!(f, "invalid --delivery value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  quiz list  [--api <url>]");
    eprintln!("  quiz take  --code <code> [--user <id>] [--name <student>] [--api <url>]");
    eprintln!("             [--db <sqlite_url>] [--delivery backend|host|both]");
    eprintln!("  quiz reset --code <code> [--user <id>] [--db <sqlite_url>]");
    eprintln!();
    eprintln!("While taking a test:");
    eprintln!("  <question> <option>   select an option, e.g. `2 3`");
    eprintln!("  time                  show remaining time");
    eprintln!("  finish                hand in the test");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  QUIZ_API_URL, QUIZ_DB_URL, QUIZ_TICK_MS, QUIZ_DELIVERY, QUIZ_HTTP_TIMEOUT_SECS");
    eprintln!("  RUST_LOG (default: info)");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    List,
    Take,
    Reset,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "list" => Some(Self::List),
            "take" => Some(Self::Take),
            "reset" => Some(Self::Reset),
            _ => None,
        }
    }
}

struct Args {
    config: EngineConfig,
    code: Option<TestCode>,
    user: Option<UserId>,
    student_name: String,
}

impl Args {
    fn parse(
        config: EngineConfig,
        args: &mut impl Iterator<Item = String>,
    ) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            config,
            code: None,
            user: None,
            student_name: String::new(),
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--api" => parsed.config.api_url = require_value(args, "--api")?,
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.config.db_url = value;
                }
                "--code" => {
                    let value = require_value(args, "--code")?;
                    let code = TestCode::new(value.as_str())
                        .map_err(|_| ArgsError::InvalidCode { raw: value.clone() })?;
                    parsed.code = Some(code);
                }
                "--user" => {
                    let value = require_value(args, "--user")?;
                    let user: UserId = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidUserId { raw: value.clone() })?;
                    parsed.user = Some(user);
                }
                "--name" => parsed.student_name = require_value(args, "--name")?,
                "--delivery" => {
                    let value = require_value(args, "--delivery")?;
                    parsed.config.delivery = value
                        .parse::<DeliveryMode>()
                        .map_err(|_| ArgsError::InvalidDelivery { raw: value.clone() })?;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        parsed.config.db_url = normalize_sqlite_url(parsed.config.db_url);
        Ok(parsed)
    }

    fn session_key(&self) -> Result<SessionKey, ArgsError> {
        let code = self.code.clone().ok_or(ArgsError::MissingCode)?;
        Ok(SessionKey::new(code, self.user))
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    let trimmed = raw.trim();
    if trimmed == "sqlite::memory:" || trimmed.starts_with("sqlite://") {
        return trimmed.to_owned();
    }

    let path_str = trimmed.strip_prefix("sqlite:").unwrap_or(trimmed);
    let path = std::path::Path::new(path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

/// sqlx does not create missing database files, so touch it first.
fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .map(|rest| rest.split('?').next().unwrap_or(rest))
        .filter(|path| !path.is_empty())
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_owned(),
        })?;

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Stdout carries host-channel JSON lines; everything human-facing goes to stderr.
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let mut iter = argv.into_iter();

    let cmd = match iter.next() {
        None => {
            print_usage();
            return Ok(());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let config = EngineConfig::from_env()?;
    let parsed = Args::parse(config, &mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    match cmd {
        Command::List => list_tests(&parsed).await,
        Command::Take => take_test(&parsed).await,
        Command::Reset => reset_session(&parsed).await,
    }
}

async fn list_tests(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let api = HttpQuizApi::new(args.config.api_url.as_str(), args.config.http_timeout)?;
    // The catalog never touches session state, so no database is opened.
    let loader = TestLoader::new(Arc::new(api), Arc::new(InMemoryStore::new()));
    let tests = loader.list_tests().await?;
    if tests.is_empty() {
        println!("No active tests.");
    }
    for test in tests {
        println!("{:>6}  {}", test.id, test.name);
    }
    Ok(())
}

async fn reset_session(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let key = args.session_key()?;
    prepare_sqlite_file(&args.config.db_url)?;
    let storage = Storage::sqlite(&args.config.db_url).await?;
    storage.clear_session(&key).await?;
    eprintln!("Cleared local state for {key}.");
    Ok(())
}

async fn take_test(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let key = args.session_key()?;
    tracing::info!(
        session = %key,
        api = %args.config.api_url,
        db = %args.config.db_url,
        delivery = %args.config.delivery,
        "taking test"
    );
    prepare_sqlite_file(&args.config.db_url)?;
    let storage = Storage::sqlite(&args.config.db_url).await?;
    let api = HttpQuizApi::new(args.config.api_url.as_str(), args.config.http_timeout)?;

    let engine = QuizEngine::new(
        Clock::default_clock(),
        Arc::new(api),
        Arc::new(JsonLinesHost::new(std::io::stdout())),
        Arc::clone(&storage.state),
        Arc::new(TokioScheduler::new(tokio::runtime::Handle::current())),
        args.config.delivery,
    )
    .with_tick_interval(args.config.tick_interval);

    let mut controller = match engine.open(key.code(), key.user()).await? {
        Opened::Active(controller) => controller,
        Opened::AlreadySubmitted(stored) => {
            print_already_submitted(stored.as_ref());
            return Ok(());
        }
    };

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    print_questions(&controller);
    answer_loop(&mut controller, &mut input).await?;
    print_score(controller.session());
    submit_with_retry(&mut controller, &args.student_name, &mut input).await?;
    print_review(controller.session());
    Ok(())
}

async fn answer_loop(
    controller: &mut SessionController,
    input: &mut Lines<BufReader<Stdin>>,
) -> Result<(), Box<dyn std::error::Error>> {
    while controller.status() == SessionStatus::Active {
        tokio::select! {
            _ = controller.expired() => {
                eprintln!("Time is up.");
            }
            line = input.next_line() => {
                let Some(line) = line? else {
                    controller.finish()?;
                    break;
                };
                handle_line(controller, line.trim())?;
            }
        }
    }
    Ok(())
}

fn handle_line(
    controller: &mut SessionController,
    line: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match line {
        "" => {}
        "finish" => {
            let result = controller.finish()?;
            if result.status == SessionStatus::Expired {
                eprintln!("Time ran out before the test was handed in.");
            }
        }
        "time" => print_remaining(controller),
        "help" => print_usage(),
        other => match parse_answer(controller.session(), other) {
            Some((question, option)) => {
                if let Err(err) = controller.record_answer(question, option) {
                    eprintln!("{err}");
                } else {
                    print_remaining(controller);
                }
            }
            None => eprintln!("Expected `<question> <option>`, `time` or `finish`."),
        },
    }
    Ok(())
}

/// Map 1-based displayed positions to a question index and original option index.
fn parse_answer(session: &Session, line: &str) -> Option<(usize, usize)> {
    let mut parts = line.split_whitespace();
    let question: usize = parts.next()?.parse().ok()?;
    let option: usize = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let question_index = question.checked_sub(1)?;
    let shown = session
        .questions()
        .get(question_index)?
        .options()
        .get(option.checked_sub(1)?)?;
    Some((question_index, shown.original_index))
}

async fn submit_with_retry(
    controller: &mut SessionController,
    student_name: &str,
    input: &mut Lines<BufReader<Stdin>>,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        match controller.submit(student_name).await {
            Ok(receipt) => {
                eprintln!(
                    "Submitted: {}/{} ({}%, {}).",
                    receipt.result.score, receipt.result.total, receipt.percent, receipt.tier
                );
                return Ok(());
            }
            Err(err) if err.is_retryable() => {
                eprintln!("{err}");
                eprintln!("Type `retry` to send again, anything else to quit.");
                match input.next_line().await? {
                    Some(line) if line.trim() == "retry" => {}
                    _ => return Ok(()),
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn print_questions(controller: &SessionController) {
    let session = controller.session();
    eprintln!("{} ({} questions)", session.name(), session.total());
    for (i, question) in session.questions().iter().enumerate() {
        eprintln!();
        eprintln!("{}. {}", i + 1, question.prompt());
        for (j, option) in question.options().iter().enumerate() {
            eprintln!("   {}) {}", j + 1, option.text);
        }
    }
    eprintln!();
    print_remaining(controller);
}

fn print_remaining(controller: &SessionController) {
    if let Some(remaining) = controller.remaining() {
        let session = controller.session();
        eprintln!(
            "{} left, {}/{} answered.",
            format_remaining(remaining),
            session.answered(),
            session.total()
        );
    }
}

fn print_score(session: &Session) {
    if let Some(result) = session.result() {
        let percent = scoring::percent(result.score, result.total);
        eprintln!(
            "Score: {}/{} ({percent}%, {}).",
            result.score,
            result.total,
            Tier::from_percent(percent)
        );
    }
}

fn print_review(session: &Session) {
    for (i, review) in scoring::review(session).iter().enumerate() {
        let verdict = match (review.selected, review.is_correct) {
            (None, _) => "unanswered",
            (Some(_), true) => "correct",
            (Some(_), false) => "wrong",
        };
        eprintln!("{:>3}. {verdict:<10} {}", i + 1, review.prompt);
    }
}

fn print_already_submitted(stored: Option<&StoredResult>) {
    match stored {
        Some(stored) => eprintln!(
            "Already submitted on {}: {}/{} ({}).",
            stored.submitted_at.format("%Y-%m-%d %H:%M"),
            stored.score,
            stored.total,
            Tier::classify(stored.score, stored.total)
        ),
        None => eprintln!("This test has already been submitted."),
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
