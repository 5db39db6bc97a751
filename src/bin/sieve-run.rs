use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context as _};
use tracing::info;

use rsieve::message::{DummyPolicy, EnvelopeStatic, MessageStatic};
use rsieve::{load, Context, Options, RuntimeData};

fn usage() -> ! {
    eprintln!("usage: sieve-run --script <file.sieve> --eml <message.eml> [--from <addr>] [--to <addr>]");
    std::process::exit(2);
}

struct Args {
    script: String,
    eml: String,
    from: String,
    to: String,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut script = None;
    let mut eml = None;
    let mut from = String::new();
    let mut to = String::new();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = |name: &str| {
            it.next()
                .ok_or_else(|| anyhow::anyhow!("missing value for {name}"))
        };
        match arg.as_str() {
            "--script" => script = Some(value("--script")?),
            "--eml" => eml = Some(value("--eml")?),
            "--from" => from = value("--from")?,
            "--to" => to = value("--to")?,
            _ => usage(),
        }
    }
    match (script, eml) {
        (Some(script), Some(eml)) => Ok(Args {
            script,
            eml,
            from,
            to,
        }),
        _ => usage(),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args()?;

    let source = std::fs::read_to_string(&args.script)
        .with_context(|| format!("reading {}", args.script))?;
    let eml = std::fs::read_to_string(&args.eml).with_context(|| format!("reading {}", args.eml))?;

    let mut opts = Options::with_all_extensions();
    opts.lexer.filename = args.script.clone();

    let start = Instant::now();
    let script = match load(&source, opts) {
        Ok(script) => Arc::new(script),
        Err(e) => bail!("{e}"),
    };
    info!(elapsed = ?start.elapsed(), "script loaded");

    let msg = MessageStatic::parse(&eml).map_err(|e| anyhow::anyhow!("parsing message: {e}"))?;
    let envelope = EnvelopeStatic {
        from: args.from,
        to: args.to,
        auth: String::new(),
    };
    let mut data = RuntimeData::new(
        Arc::clone(&script),
        Arc::new(DummyPolicy),
        Arc::new(envelope),
        Arc::new(msg),
    );

    let start = Instant::now();
    if let Err(e) = script.execute(&Context::new(), &mut data) {
        bail!("execution failed: {e}");
    }
    info!(elapsed = ?start.elapsed(), "script executed");

    println!("redirect: {:?}", data.redirect_addr);
    println!("fileinto: {:?}", data.mailboxes);
    println!("keep: {}", data.implicit_keep || data.keep);
    println!("flags: {}", data.flags.join(" "));
    if data.vacation_responses.is_empty() {
        println!("vacation responses: none");
    } else {
        println!("vacation responses:");
        for (recipient, resp) in &data.vacation_responses {
            println!("  to: {recipient}");
            println!("  from: {}", resp.from);
            println!("  subject: {}", resp.subject);
            println!("  body: {}", resp.body);
            println!("  handle: {}", resp.handle);
            println!("  days: {}", resp.days);
            println!("  mime: {}", resp.is_mime);
            println!();
        }
    }
    Ok(())
}
