//! tardy-page - renders a small HTML page from simulated slow lookups.
//!
//! Every lookup is a deferred value that sleeps for a random delay before
//! answering. The page is described as one expression over those values and
//! evaluated once, so independent lookups overlap instead of running back to
//! back.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tardy_eval::{add, curried, evaluate, lazy, Adapted, Deferred, Function, Value};
use tracing_subscriber::EnvFilter;

const DEFAULT_TEMPLATE: &str =
    "<html>\n  <head>\n    <title>boo.</title>\n  </head>\n  <body>\n%%\n  </body>\n</html>";

const NAMES: [&str; 6] = ["Alice", "Bob", "Carol", "Dylan", "Eve", "Francois"];

#[derive(Parser, Debug)]
#[command(name = "tardy-page")]
#[command(about = "Render a demo page by composing slow lookups as deferred values")]
#[command(version)]
struct Args {
    /// Page template; `%%` marks where the body goes
    #[arg(short, long, value_name = "FILE")]
    template: Option<PathBuf>,

    /// Seed for the simulated delays and answers
    #[arg(long)]
    seed: Option<u64>,

    /// Shortest simulated lookup delay
    #[arg(long, default_value_t = 100)]
    min_delay_ms: u64,

    /// Longest simulated lookup delay
    #[arg(long, default_value_t = 300)]
    max_delay_ms: u64,

    /// Force the session lookup instead of picking at random
    #[arg(long)]
    logged_in: Option<bool>,
}

/// Simulated backend whose every answer arrives after a random delay.
struct Backend {
    rng: RefCell<StdRng>,
    delays: std::ops::RangeInclusive<u64>,
    logged_in: Option<bool>,
}

impl Backend {
    fn new(args: &Args) -> anyhow::Result<Self> {
        if args.min_delay_ms > args.max_delay_ms {
            anyhow::bail!(
                "--min-delay-ms ({}) is larger than --max-delay-ms ({})",
                args.min_delay_ms,
                args.max_delay_ms
            );
        }
        let rng = match args.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            rng: RefCell::new(rng),
            delays: args.min_delay_ms..=args.max_delay_ms,
            logged_in: args.logged_in,
        })
    }

    /// A lookup named `name` that answers `value` after a random delay.
    fn lookup(&self, name: &str, value: impl Into<Value>) -> Deferred {
        let value = value.into();
        let (tag, delay) = {
            let mut rng = self.rng.borrow_mut();
            let tag: String = (0..5)
                .map(|_| char::from(b"abcdefghijklmnopqrstuvwxyz0123456789"[rng.gen_range(0..36)]))
                .collect();
            (format!("{}[{}]", name, tag), rng.gen_range(self.delays.clone()))
        };
        Deferred::from_future(move || {
            let (tag, value) = (tag.clone(), value.clone());
            async move {
                tracing::info!("begin {}", tag);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                tracing::info!(delay_ms = delay, "end {}", tag);
                Ok(value)
            }
        })
    }

    fn logged_in(&self) -> Deferred {
        let answer = self
            .logged_in
            .unwrap_or_else(|| self.rng.borrow_mut().gen_bool(0.5));
        self.lookup("db_logged_in", answer)
    }

    fn names(&self) -> Deferred {
        self.lookup("db_names", Value::array(NAMES))
    }
}

/// Read a file through the callback-style adapter; the read runs on a local
/// task and completes the deferred value when it finishes.
fn read_file() -> Adapted {
    curried(
        |_, args, done| {
            let path = args.first().map(Value::to_string_value).unwrap_or_default();
            tokio::task::spawn_local(async move {
                tracing::info!(%path, "reading template");
                match tokio::fs::read_to_string(&path).await {
                    Ok(contents) => done.resolve(contents),
                    Err(e) => done.reject(format!("{}: {}", path, e)),
                }
            });
        },
        None,
    )
    .named("read_file")
}

fn template_fill() -> Adapted {
    lazy(
        |_, args| {
            let template = args.first().map(Value::to_string_value).unwrap_or_default();
            let body = args.get(1).map(Value::to_string_value).unwrap_or_default();
            Ok(Value::from(template.replacen("%%", &body, 1)))
        },
        None,
    )
    .named("template_fill")
}

/// Build the page expression. Nothing runs until it is evaluated.
fn page(backend: &Rc<Backend>, template: Option<PathBuf>) -> Deferred {
    let template = match template {
        Some(path) => read_file().call([path.display().to_string()]),
        None => backend.lookup("read_file", DEFAULT_TEMPLATE),
    };

    let online = Rc::clone(backend);
    let list_item = Function::named("list_item", move |_, args| {
        let name = args.first().cloned().unwrap_or_default();
        Ok(Value::from(add([
            Value::from(format!("      <li>{}: ", name)),
            Value::from(online.logged_in()),
            Value::from("</li>"),
        ])))
    });

    let body = backend.logged_in().not().then(
        "    <p>Error: You are not logged in!</p>",
        add([
            Value::from("    <p>Logged in. Currently online:</p>\n    <ol>\n"),
            Value::from(backend.names().call("map", [list_item]).call("join", ["\n"])),
            Value::from("\n    </ol>"),
        ]),
    );

    template_fill().call([template, body])
}

async fn run(args: Args) -> anyhow::Result<()> {
    let backend = Rc::new(Backend::new(&args)?);
    let started = Instant::now();

    // Evaluation errors carry non-Send values, so convert through Display.
    let html = evaluate(Value::from(page(&backend, args.template)))
        .await
        .map_err(|e| anyhow::anyhow!("page rendering failed: {}", e))?;

    println!("--- done in {:.3} s ---", started.elapsed().as_secs_f64());
    println!("{}", html);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!(?args, "starting tardy-page");

    // Deferred values are not Send; keep everything on this thread.
    let local = tokio::task::LocalSet::new();
    local.run_until(run(args)).await
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn quick_args(seed: u64, logged_in: Option<bool>) -> Args {
        Args {
            template: None,
            seed: Some(seed),
            min_delay_ms: 0,
            max_delay_ms: 2,
            logged_in,
        }
    }

    async fn render(args: Args) -> String {
        let backend = Rc::new(Backend::new(&args).unwrap());
        evaluate(Value::from(page(&backend, args.template)))
            .await
            .unwrap()
            .to_string_value()
    }

    #[tokio::test]
    async fn test_logged_out_page() {
        let html = render(quick_args(7, Some(false))).await;
        assert!(html.contains("<p>Error: You are not logged in!</p>"));
        assert!(!html.contains("<ol>"));
    }

    #[tokio::test]
    async fn test_logged_in_page_lists_everyone() {
        let html = render(quick_args(7, Some(true))).await;
        assert!(html.starts_with("<html>"));
        for name in NAMES {
            assert!(html.contains(&format!("<li>{}: true</li>", name)), "{}", html);
        }
    }

    #[tokio::test]
    async fn test_template_from_file() {
        let mut template = tempfile::Builder::new().suffix(".html").tempfile().unwrap();
        write!(template, "<main>%%</main>").unwrap();

        let local = tokio::task::LocalSet::new();
        let html = local
            .run_until(render(Args {
                template: Some(template.path().to_path_buf()),
                ..quick_args(1, Some(false))
            }))
            .await;

        assert_eq!(html, "<main>    <p>Error: You are not logged in!</p></main>");
    }

    #[tokio::test]
    async fn test_missing_template_fails() {
        let local = tokio::task::LocalSet::new();
        let result = local
            .run_until(async {
                let args = Args {
                    template: Some(PathBuf::from("/nonexistent/tardy/template.html")),
                    ..quick_args(1, Some(true))
                };
                let backend = Rc::new(Backend::new(&args).unwrap());
                evaluate(Value::from(page(&backend, args.template))).await
            })
            .await;
        assert!(matches!(result, Err(tardy_eval::Error::Rejected(_))));
    }

    #[test]
    fn test_rejects_inverted_delay_range() {
        let mut bad = quick_args(1, None);
        bad.min_delay_ms = 10;
        assert!(Backend::new(&bad).is_err());
    }
}
