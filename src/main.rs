use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use style_designer::config::{self, AppConfig};
use style_designer::context::AppContext;
use style_designer::ingest::{self, IngestError, Upload};
use style_designer::serve::PreviewServer;
use style_designer::theme_config::{ConfigRecord, FIELDS};
use style_designer::view::Preview;
use style_designer::{export, output};
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "style-designer")]
#[command(about = "Preview and repackage exported e-learning styles")]
#[command(long_about = "\
Preview and repackage exported e-learning styles

Export one course three ways and hand all three archives to `ingest`:

  course_web.zip      Website export   → contents/web/
  course_page.zip     Single page      → contents/page/
  course_scorm.zip    SCORM 1.2        → contents/scorm/

Every archive's theme/ folder is mirrored into one shared theme/, and every
stored page is rewritten to load its style from there. `serve` previews all
three modes side by side; `export` packs theme/ back into <name>.zip.

Store layout:

  contents/<mode>/...     archive contents, html rewritten
  theme/...               shared, editable style files
  theme/config.xml        style metadata (see `theme-config`)

Run 'style-designer gen-config' to generate a documented style-designer.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Config file
    #[arg(long, default_value = config::CONFIG_FILENAME, global = true)]
    config: PathBuf,

    /// Storage directory (overrides `storage.root`)
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    /// More log output on stderr (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replace the store with three exported archives (web, page, scorm)
    Ingest {
        /// Archives named *_web.zip, *_page.zip and *_scorm.zip
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List stored paths
    List {
        /// Only paths starting with this prefix
        #[arg(default_value = "")]
        prefix: String,
    },
    /// Write a stored file to stdout
    Cat { path: String },
    /// Store a local file at a store path
    Put {
        /// Store path, e.g. theme/style.css
        path: String,
        /// Local file to read
        file: PathBuf,
        /// Content type (inferred from the store path when omitted)
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Remove every stored file
    Clear,
    /// Show which preview modes resolve and to which entry document
    Views,
    /// Show or edit theme/config.xml
    #[command(subcommand)]
    ThemeConfig(ThemeConfigCommand),
    /// Pack theme/ into <name>.zip
    Export {
        /// Directory to write the archive into
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },
    /// Serve the preview over HTTP
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print a stock style-designer.toml with all options documented
    GenConfig,
}

#[derive(Subcommand)]
enum ThemeConfigCommand {
    /// Print the stored record (defaults when none is stored)
    Show,
    /// Set fields and save, e.g. `set name=neo "title=Neo Style"`
    Set {
        #[arg(required = true, value_name = "FIELD=VALUE")]
        assignments: Vec<String>,
    },
    /// Overwrite the stored record with the defaults
    Reset,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let mut app_config = config::load_config_file(&cli.config)?;
    if let Some(root) = &cli.storage {
        app_config.storage.root = root.clone();
    }
    init_logging(&app_config, cli.verbose);
    init_thread_pool(&app_config.ingest);
    tracing::debug!(config = %cli.config.display(), root = %app_config.storage.root.display(), "configuration loaded");

    let ctx = AppContext::new(app_config)?;

    match cli.command {
        Command::Ingest { files } => run_ingest(&ctx, &files)?,
        Command::List { prefix } => {
            let paths = ctx.storage().list(&prefix)?;
            output::print_list(&paths);
        }
        Command::Cat { path } => {
            let Some(data) = ctx.storage().read_binary(&path)? else {
                return Err(format!("{path}: not found").into());
            };
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
        }
        Command::Put {
            path,
            file,
            content_type,
        } => {
            let data = std::fs::read(&file)?;
            ctx.storage()
                .save_binary(&path, &data, content_type.as_deref())?;
            println!("{} → {}", file.display(), path);
        }
        Command::Clear => {
            ctx.reset()?;
            println!("Cleared store");
        }
        Command::Views => {
            let preview = Preview::from_context(&ctx)?;
            output::print_views(&preview);
        }
        Command::ThemeConfig(command) => run_theme_config(&ctx, command)?,
        Command::Export { output: dir } => {
            let archive = export::export_theme(&ctx)?;
            std::fs::create_dir_all(&dir)?;
            let dest = dir.join(&archive.file_name);
            std::fs::write(&dest, &archive.bytes)?;
            output::print_export(&archive, &dest);
        }
        Command::Serve { host, port } => {
            let serve = &ctx.config().serve;
            let addr = format!(
                "{}:{}",
                host.unwrap_or_else(|| serve.host.clone()),
                port.unwrap_or(serve.port)
            );
            let server = PreviewServer::bind(Arc::new(ctx), &addr)?;
            println!("Previewing at http://{}/", server.local_addr()?);
            server.run()?;
        }
        // Printed before the context is built
        Command::GenConfig => {}
    }

    Ok(())
}

fn run_ingest(ctx: &AppContext, files: &[PathBuf]) -> Result<(), Box<dyn std::error::Error>> {
    let uploads = files
        .iter()
        .map(|path| Upload::from_path(path))
        .collect::<Result<Vec<_>, _>>()?;

    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            output::print_ingest_event(&event);
        }
    });
    let result = ingest::ingest(ctx, &uploads, Some(tx));
    printer.join().map_err(|_| "output thread panicked")?;

    match result {
        Ok(report) => {
            output::print_ingest_report(&report);
            Ok(())
        }
        Err(IngestError::Validation(issues)) => {
            for line in output::format_validation_issues(&issues) {
                eprintln!("{}", line);
            }
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}

fn run_theme_config(
    ctx: &AppContext,
    command: ThemeConfigCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    let storage = ctx.storage();
    match command {
        ThemeConfigCommand::Show => {
            let (record, warning) = ConfigRecord::load(storage)?;
            output::print_theme_config(&record, warning.as_deref());
        }
        ThemeConfigCommand::Set { assignments } => {
            let (mut record, warning) = ConfigRecord::load(storage)?;
            if let Some(warning) = warning {
                eprintln!("Warning: {}", warning);
            }
            for assignment in &assignments {
                let (field, value) = parse_assignment(assignment)?;
                record.set(field, &value)?;
            }
            let saved = record.save(storage)?;
            output::print_theme_config(&saved, None);
        }
        ThemeConfigCommand::Reset => {
            let saved = ConfigRecord::default().save(storage)?;
            output::print_theme_config(&saved, None);
        }
    }
    Ok(())
}

/// Split `field=value`. `\n` in the value becomes a newline so multi-line
/// descriptions can be set from a shell.
fn parse_assignment(assignment: &str) -> Result<(&str, String), String> {
    let Some((field, value)) = assignment.split_once('=') else {
        return Err(format!(
            "expected FIELD=VALUE, got '{assignment}' (fields: {})",
            FIELDS.join(", ")
        ));
    };
    Ok((field.trim(), value.replace("\\n", "\n")))
}

/// Log to stderr. `RUST_LOG` wins over `-v`, which wins over `logging.level`.
fn init_logging(config: &AppConfig, verbose: u8) {
    let level = match verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Initialize the rayon thread pool based on ingest config.
///
/// Caps at the number of available CPU cores; user can constrain down, not up.
fn init_thread_pool(ingest: &config::IngestConfig) {
    let threads = config::effective_threads(ingest);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
