//! The `quickstream` command-line program
//!
//! Builds an app from command-line operations applied in order: load
//! filters (with optional brace-grouped module arguments), connect
//! them, load controllers, then ready/launch the stream. clap handles
//! the flag surface; a pre-tokenizer pulls out the `{ … }` groups
//! first, because grouped tokens are not a flag-parser concept.

use std::io::Write;
use std::process::{Command as Process, ExitCode, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Arg, ArgAction, Command};
use quickstream::{App, DotDetail, FilterId, StreamId};

fn cli() -> Command {
    Command::new("quickstream")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Run a quickstream filter graph")
        .override_usage("quickstream [OPTIONS...]  (operations are applied in order)")
        .arg(
            Arg::new("filter")
                .short('f')
                .long("filter")
                .action(ArgAction::Append)
                .value_name("FILENAME")
                .help("Load a filter module; follow with { --name NAME ... } for module args"),
        )
        .arg(
            Arg::new("filter-help")
                .short('F')
                .long("filter-help")
                .action(ArgAction::Append)
                .value_name("FILENAME")
                .help("Print a filter module's help and exit"),
        )
        .arg(
            Arg::new("connect")
                .short('c')
                .long("connect")
                .action(ArgAction::Append)
                .num_args(0..=1)
                .default_missing_value("")
                .value_name("\"i j [i j ...]\"")
                .help("Connect loaded filters by load index; empty connects them in a chain"),
        )
        .arg(
            Arg::new("plug")
                .short('p')
                .long("plug")
                .action(ArgAction::Append)
                .value_name("\"from to fromPort toPort\"")
                .help("Connect two filters with explicit port numbers"),
        )
        .arg(
            Arg::new("controller")
                .long("controller")
                .action(ArgAction::Append)
                .value_name("FILENAME")
                .help("Load a controller module; follow with { ... } for module args"),
        )
        .arg(
            Arg::new("ready")
                .short('R')
                .long("ready")
                .action(ArgAction::Count)
                .help("Make the stream ready (validate topology, map buffers)"),
        )
        .arg(
            Arg::new("run")
                .short('r')
                .long("run")
                .action(ArgAction::Count)
                .help("Ready then launch the stream"),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .long("threads")
                .action(ArgAction::Append)
                .value_name("N")
                .help("Worker thread bound for later --run (default 7)"),
        )
        .arg(
            Arg::new("display")
                .short('d')
                .long("display")
                .action(ArgAction::Count)
                .help("Pipe the graph image to an external \"display\" program"),
        )
        .arg(
            Arg::new("display-wait")
                .short('D')
                .long("display-wait")
                .action(ArgAction::Count)
                .help("Like --display but wait for the viewer to exit"),
        )
        .arg(
            Arg::new("dot")
                .short('g')
                .long("dot")
                .action(ArgAction::Count)
                .help("Print the graph in graphviz dot format to stdout"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("More log spew (repeat for more)"),
        )
        .arg(
            Arg::new("no-verbose")
                .short('n')
                .long("no-verbose")
                .action(ArgAction::Count)
                .help("Less log spew"),
        )
}

/// Pull `{ ... }` module-argument groups out of the raw argv, since
/// grouped tokens are not something a flag parser models. Groups attach
/// to `--filter`/`--controller` occurrences in encounter order.
fn extract_groups(raw: Vec<String>) -> Result<(Vec<String>, Vec<Vec<String>>, Vec<Vec<String>>)> {
    let mut tokens = Vec::new();
    let mut filter_groups = Vec::new();
    let mut controller_groups = Vec::new();

    let mut i = 0;
    while i < raw.len() {
        let tok = raw[i].clone();
        let is_filter = tok == "-f" || tok == "--filter" || tok.starts_with("--filter=");
        let is_controller = tok == "--controller" || tok.starts_with("--controller=");
        tokens.push(tok.clone());
        i += 1;

        if !(is_filter || is_controller) {
            continue;
        }
        // The FILENAME value, unless it came attached with '='.
        if !tok.contains('=') && i < raw.len() {
            tokens.push(raw[i].clone());
            i += 1;
        }
        let mut group = Vec::new();
        if i < raw.len() && raw[i] == "{" {
            i += 1;
            while i < raw.len() && raw[i] != "}" {
                group.push(raw[i].clone());
                i += 1;
            }
            if i >= raw.len() {
                bail!("unmatched '{{' in module arguments");
            }
            i += 1;
        }
        if is_filter {
            filter_groups.push(group);
        } else {
            controller_groups.push(group);
        }
    }
    Ok((tokens, filter_groups, controller_groups))
}

#[derive(Clone, Debug)]
enum Op {
    Filter { spec: String, group: Vec<String> },
    FilterHelp(String),
    Connect(String),
    Plug(String),
    Controller { spec: String, group: Vec<String> },
    Ready,
    Run,
    Threads(String),
    Display { wait: bool },
    Dot,
}

fn init_logging(verbose: u8, quiet: u8) {
    let level = match (i16::from(verbose)) - i16::from(quiet) {
        i16::MIN..=-1 => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .init();
}

struct Session {
    app: App,
    sid: StreamId,
    threads: u32,
    ready: bool,
    launched: bool,
}

impl Session {
    fn load_order(&self) -> Vec<FilterId> {
        self.app.filter_ids()
    }

    fn filter_by_token(&self, tok: &str) -> Result<FilterId> {
        if let Ok(idx) = tok.parse::<usize>() {
            let order = self.load_order();
            return order
                .get(idx)
                .copied()
                .ok_or_else(|| anyhow!("no filter with load index {idx}"));
        }
        self.app
            .filter_id(tok)
            .ok_or_else(|| anyhow!("no filter named \"{tok}\""))
    }

    fn apply(&mut self, op: Op) -> Result<()> {
        match op {
            Op::Filter { spec, group } => {
                let (name, args) = split_name_arg(&group);
                self.app
                    .load_filter_named(&spec, name.as_deref(), &args)
                    .with_context(|| format!("loading filter \"{spec}\""))?;
            }
            Op::FilterHelp(spec) => {
                let mut out = std::io::stdout();
                App::filter_help(&spec, &mut out)
                    .with_context(|| format!("loading filter \"{spec}\""))?;
                std::process::exit(0);
            }
            Op::Controller { spec, group } => {
                let (name, args) = split_name_arg(&group);
                self.app
                    .load_controller_named(&spec, name.as_deref(), &args)
                    .with_context(|| format!("loading controller \"{spec}\""))?;
            }
            Op::Connect(list) => {
                let order = self.load_order();
                if list.trim().is_empty() {
                    // Chain every loaded filter in load order.
                    for pair in order.windows(2) {
                        self.app.connect(self.sid, pair[0], pair[1])?;
                    }
                } else {
                    let idx: Vec<&str> = list.split_whitespace().collect();
                    if idx.len() < 2 || idx.len() % 2 != 0 {
                        bail!("--connect wants pairs of filter indices, got \"{list}\"");
                    }
                    for pair in idx.chunks(2) {
                        let from = self.filter_by_token(pair[0])?;
                        let to = self.filter_by_token(pair[1])?;
                        self.app.connect(self.sid, from, to)?;
                    }
                }
            }
            Op::Plug(quad) => {
                let parts: Vec<&str> = quad.split_whitespace().collect();
                if parts.len() != 4 {
                    bail!("--plug wants \"from to fromPort toPort\", got \"{quad}\"");
                }
                let from = self.filter_by_token(parts[0])?;
                let to = self.filter_by_token(parts[1])?;
                let from_port: u32 = parts[2].parse().context("bad fromPort")?;
                let to_port: u32 = parts[3].parse().context("bad toPort")?;
                self.app.plug(self.sid, from, from_port, to, to_port)?;
            }
            Op::Ready => {
                self.app.stream_ready(self.sid)?;
                self.ready = true;
            }
            Op::Run => {
                if !self.ready {
                    self.app.stream_ready(self.sid)?;
                    self.ready = true;
                }
                self.app.stream_launch(self.sid, self.threads)?;
                self.launched = true;
            }
            Op::Threads(v) => {
                self.threads = v.parse().context("bad --threads value")?;
            }
            Op::Dot => {
                print!("{}", quickstream::app_dot(&self.app, DotDetail::Detail));
            }
            Op::Display { wait } => {
                let dot = quickstream::app_dot(&self.app, DotDetail::Detail);
                display_dot(&dot, wait)?;
            }
        }
        Ok(())
    }
}

fn split_name_arg(group: &[String]) -> (Option<String>, Vec<String>) {
    // --name inside the braces is consumed by the loader, everything
    // else goes to the module's construct().
    let mut name = None;
    let mut rest = Vec::new();
    let mut it = group.iter();
    while let Some(a) = it.next() {
        if a == "--name" {
            name = it.next().cloned();
        } else if let Some(v) = a.strip_prefix("--name=") {
            name = Some(v.to_string());
        } else {
            rest.push(a.clone());
        }
    }
    (name, rest)
}

fn display_dot(dot: &str, wait: bool) -> Result<()> {
    let mut dotproc = Process::new("dot")
        .args(["-Tpng"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .context("spawning \"dot\" (graphviz)")?;
    dotproc
        .stdin
        .take()
        .expect("stdin was piped")
        .write_all(dot.as_bytes())?;
    let png = dotproc.stdout.take().expect("stdout was piped");

    let mut viewer = Process::new("display")
        .stdin(Stdio::from(png))
        .spawn()
        .context("spawning \"display\" (imagemagick)")?;
    dotproc.wait()?;
    if wait {
        viewer.wait()?;
    }
    Ok(())
}

fn run() -> Result<i32> {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    let (tokens, mut filter_groups, mut controller_groups) = extract_groups(raw)?;

    let matches = match cli().try_get_matches_from(
        std::iter::once("quickstream".to_string()).chain(tokens),
    ) {
        Ok(m) => m,
        Err(e)
            if matches!(
                e.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            print!("{e}");
            return Ok(0);
        }
        Err(e) => {
            eprint!("{e}");
            return Ok(1);
        }
    };

    init_logging(
        matches.get_count("verbose"),
        matches.get_count("no-verbose"),
    );

    // Rebuild the operations in command-line order.
    let mut ops: Vec<(usize, Op)> = Vec::new();
    if let (Some(indices), Some(values)) = (
        matches.indices_of("filter"),
        matches.get_many::<String>("filter"),
    ) {
        for (i, v) in indices.zip(values) {
            ops.push((
                i,
                Op::Filter {
                    spec: v.clone(),
                    group: filter_groups.remove(0),
                },
            ));
        }
    }
    if let (Some(indices), Some(values)) = (
        matches.indices_of("controller"),
        matches.get_many::<String>("controller"),
    ) {
        for (i, v) in indices.zip(values) {
            ops.push((
                i,
                Op::Controller {
                    spec: v.clone(),
                    group: controller_groups.remove(0),
                },
            ));
        }
    }
    for (arg, make) in [
        ("filter-help", &(|v: &String| Op::FilterHelp(v.clone())) as &dyn Fn(&String) -> Op),
        ("connect", &|v: &String| Op::Connect(v.clone())),
        ("plug", &|v: &String| Op::Plug(v.clone())),
        ("threads", &|v: &String| Op::Threads(v.clone())),
    ] {
        if let (Some(indices), Some(values)) =
            (matches.indices_of(arg), matches.get_many::<String>(arg))
        {
            for (i, v) in indices.zip(values) {
                ops.push((i, make(v)));
            }
        }
    }
    for (arg, op) in [
        ("ready", Op::Ready),
        ("run", Op::Run),
        ("dot", Op::Dot),
        ("display", Op::Display { wait: false }),
        ("display-wait", Op::Display { wait: true }),
    ] {
        if let Some(indices) = matches.indices_of(arg) {
            for i in indices {
                ops.push((i, op.clone()));
            }
        }
    }
    ops.sort_by_key(|(i, _)| *i);
    tracing::debug!("applying {} command-line operations", ops.len());

    let mut app = App::new();
    let sid = app.new_stream();
    let mut session = Session {
        app,
        sid,
        threads: 7,
        ready: false,
        launched: false,
    };

    for (_, op) in ops {
        session.apply(op)?;
    }

    if session.launched {
        session.app.stream_wait(session.sid)?;
        session.app.stream_stop(session.sid)?;
    } else if session.ready {
        session.app.stream_stop(session.sid)?;
    }
    Ok(0)
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("ERROR: {e:#}");
            ExitCode::from(1)
        }
    }
}
