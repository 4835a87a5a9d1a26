use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{info, warn};
use tap::Tap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use conversion::{
    AttachmentFailurePolicy, AuditLog, Converter, FileAuditLog, HtmlBodyRenderer, OfficeDocumentRenderer, QueueId,
    QueueTable, RetryPolicy, Session, Workspace, APP_ID,
};
use mail::{EmlMailSource, MailSource};
use services::{config, log_err, HtmlToPdf, OfficeToPdf, PdfViewer};

#[derive(Parser, Debug)]
#[command(name = "email-pdf", about = "Convert an email into one PDF and send it to a queue")]
struct Args {
    /// Email to open at startup.
    #[arg(short = 'e', long, value_parser = parse_input_file)]
    email: Option<PathBuf>,

    /// Queue directory. Repeat for queues 2, 3, ...; defaults to QUEUE_1..QUEUE_9.
    #[arg(short = 'q', long = "queue")]
    queues: Vec<PathBuf>,

    /// Directory the working directory is created in. Defaults to WORKSPACE_ROOT or the temp directory.
    #[arg(short = 'w', long)]
    workspace_root: Option<PathBuf>,

    /// File the audit log is appended to. Defaults to AUDIT_LOG.
    #[arg(short = 'a', long)]
    audit_log: Option<PathBuf>,

    /// Program used to preview PDFs. Defaults to PDF_VIEWER.
    #[arg(short = 'v', long)]
    viewer: Option<String>,

    /// wkhtmltopdf executable rendering the body. Defaults to WKHTMLTOPDF.
    #[arg(long)]
    wkhtmltopdf: Option<String>,

    /// LibreOffice executable exporting documents. Defaults to SOFFICE.
    #[arg(long)]
    soffice: Option<String>,

    /// Attempts at saving the body. Defaults to SAVE_RETRY_ATTEMPTS or 3.
    #[arg(long)]
    save_attempts: Option<u32>,

    /// Pause between two attempts, in milliseconds. Defaults to SAVE_RETRY_DELAY_MS or 2000.
    #[arg(long)]
    save_retry_delay_ms: Option<u64>,

    /// What a failing attachment does: abort or skip. Defaults to ATTACHMENT_FAILURE_POLICY.
    #[arg(long)]
    attachment_failures: Option<AttachmentFailurePolicy>,

    #[arg(short = 'l', long, default_value = "info", value_parser = parse_level)]
    log_level: log::Level,
}

fn parse_level(level: &str) -> Result<log::Level, String> {
    level.parse().map_err(|_| format!("Unknown log level {}", level))
}

fn parse_input_file(path_str: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(path_str);
    if !path.exists() {
        return Err(format!("Path {} not found", path_str));
    }
    if !path.is_file() {
        return Err(format!("Path {} is not a file", path_str));
    }
    Ok(path)
}

/// An operator command typed at the prompt.
///
#[derive(Debug, PartialEq)]
enum Command {
    Open(PathBuf),
    Close,
    Preview,
    Send(QueueId),
    Discard,
    Status,
    Queues,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, rest) = s.split_once(char::is_whitespace).unwrap_or((s, ""));
        let rest = rest.trim();
        match (name.to_lowercase().as_str(), rest) {
            ("open", "") => Err("Usage: open <file.eml>".to_string()),
            ("open", path) => parse_input_file(path).map(Command::Open),
            ("close", "") => Ok(Command::Close),
            ("preview", "") => Ok(Command::Preview),
            ("send", queue) => queue.parse().map(Command::Send),
            ("discard", "") => Ok(Command::Discard),
            ("status", "") => Ok(Command::Status),
            ("queues", "") => Ok(Command::Queues),
            ("help", "") | ("?", "") => Ok(Command::Help),
            ("quit", "") | ("exit", "") => Ok(Command::Quit),
            _ => Err(format!("Unknown command '{}', try 'help'", s)),
        }
    }
}

const HELP: &str = "\
open <file.eml>  open an email
close            close the open email
preview          convert the open email and preview the PDF
send <n>         move the previewed PDF into queue n
discard          delete the previewed PDF
status           show the open email and the pending PDF
queues           list the queues
quit             leave";

struct Console {
    source: EmlMailSource,
    session: Session,
}

impl Console {
    /// Run one command. Returns `false` once the operator asked to leave.
    ///
    async fn execute(&mut self, command: Command) -> bool {
        match command {
            Command::Open(path) => {
                self.source.open(&path);
                println!("Opened {}", path.display());
            }
            Command::Close => self.source.close(),
            Command::Preview => self.preview().await,
            Command::Send(id) => match self.session.send_to_queue(id).await {
                Ok(path) => println!("Sent to queue {}: {}", id, path.display()),
                Err(err) => println!("Not sent: {}", err),
            },
            Command::Discard => match self.session.discard().await {
                Ok(Some(path)) => println!("Discarded {}", path.display()),
                Ok(None) => println!("Nothing to discard"),
                Err(err) => println!("Failed to discard: {}", err),
            },
            Command::Status => {
                match self.source.active_path() {
                    Some(path) => println!("Email:   {}", path.display()),
                    None => println!("Email:   none"),
                }
                match self.session.pending() {
                    Some(path) => println!("Pending: {}", path.display()),
                    None => println!("Pending: none"),
                }
            }
            Command::Queues => {
                if self.session.queues().is_empty() {
                    println!("No queues configured");
                }
                for (id, dir) in self.session.queues().iter() {
                    println!("{:>3}  {}", id, dir.display());
                }
            }
            Command::Help => println!("{}", HELP),
            Command::Quit => return false,
        }
        true
    }

    async fn preview(&mut self) {
        let email = match self.source.active_email().await.tap(log_err!("Failed to load email")) {
            Ok(Some(email)) => email,
            Ok(None) => {
                println!("No email open, use 'open <file.eml>'");
                return;
            }
            Err(err) => {
                println!("Failed to load email: {:#}", err);
                return;
            }
        };
        match self.session.make_preview(email.as_ref()).await {
            Ok(path) => println!("Pending: {}", path.display()),
            Err(err) => println!("Conversion failed while {}: {}", err.state(), err),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    simple_logger::init_with_level(args.log_level)?;

    let workspace = match &args.workspace_root {
        Some(root) => Workspace::new(root),
        None => Workspace::from_config(),
    };
    let audit_path = args
        .audit_log
        .or_else(|| config().get("AUDIT_LOG").map(PathBuf::from))
        .unwrap_or_else(|| std::env::temp_dir().join(format!("{}.log", APP_ID)));
    info!("Writing audit log to {}", audit_path.display());
    let audit: Arc<dyn AuditLog> = Arc::new(FileAuditLog::new(audit_path));

    let mut retry = RetryPolicy::from_config();
    if let Some(attempts) = args.save_attempts {
        retry.attempts = attempts.max(1);
    }
    if let Some(delay) = args.save_retry_delay_ms {
        retry.delay = Duration::from_millis(delay);
    }

    let mut converter = Converter::builder()
        .workspace(workspace)
        .audit(audit)
        .retry(retry)
        .failure_policy(args.attachment_failures.unwrap_or_else(AttachmentFailurePolicy::from_config));
    if let Some(program) = args.wkhtmltopdf {
        converter = converter.body_renderer(Arc::new(HtmlBodyRenderer::new(HtmlToPdf::new(program))));
    }
    if let Some(program) = args.soffice {
        converter = converter.document_renderer(Arc::new(OfficeDocumentRenderer::new(OfficeToPdf::new(program))));
    }
    let converter = converter.build();
    let queues = if args.queues.is_empty() {
        QueueTable::from_config()
    } else {
        QueueTable::from_dirs(args.queues)
    };
    if queues.is_empty() {
        warn!("No queues configured, pass --queue or set QUEUE_1..QUEUE_9");
    }
    let viewer = PdfViewer::new(args.viewer.or_else(|| config().get("PDF_VIEWER")));

    let mut console = Console {
        source: EmlMailSource::default(),
        session: Session::new(converter, queues, Arc::new(viewer)),
    };
    if let Some(email) = args.email {
        console.source.open(email);
    }

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(command) => {
                if !console.execute(command).await {
                    break;
                }
            }
            Err(err) => println!("{}", err),
        }
    }

    console.session.close().await;
    Ok(())
}
