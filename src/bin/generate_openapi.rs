//! Writes the HTTP API's OpenAPI document.
//!
//! Usage:
//!   cargo run --bin generate_openapi > openapi.json
//!   cargo run --bin generate_openapi -- --output openapi.json
//!   cargo run --bin generate_openapi -- --compact

use std::{
    env, fs,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{bail, Context, Result};
use smart_plug_monitor::api::handlers::ApiDoc;
use utoipa::OpenApi;

#[derive(Debug, Default, PartialEq)]
struct Options {
    output: Option<PathBuf>,
    compact: bool,
}

impl Options {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut options = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--output" => {
                    let path = args.next().context("--output needs a path")?;
                    options.output = Some(PathBuf::from(path));
                }
                "--compact" => options.compact = true,
                other => bail!("unknown argument {other:?}"),
            }
        }
        Ok(options)
    }
}

fn render(compact: bool) -> Result<String> {
    let doc = ApiDoc::openapi();
    let json = if compact {
        doc.to_json()
    } else {
        doc.to_pretty_json()
    };
    json.context("failed to serialise OpenAPI document")
}

fn main() -> Result<()> {
    let options = Options::parse(env::args().skip(1))?;
    let json = render(options.compact)?;

    match options.output {
        Some(path) => {
            fs::write(&path, &json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("OpenAPI document written to {}", path.display());
        }
        None => io::stdout()
            .write_all(json.as_bytes())
            .context("failed to write to stdout")?,
    }
    Ok(())
}
