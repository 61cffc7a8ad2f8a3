use std::{io::Read as _, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use krm_kcl::{eval::KclCli, source::Resolver};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(version, about = "KRM function running KCL programs")]
struct Args {
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Parser)]
enum Command {
    /// Read a ResourceList, run the KCL program from its functionConfig and write the result.
    Run(RunArgs),
}

#[derive(Parser)]
struct RunArgs {
    /// Input ResourceList, `-` for stdin.
    #[clap(short = 'f', long = "input", default_value = "-")]
    input: String,
    /// Output file. Defaults to stdout.
    #[clap(short = 'o', long = "output")]
    output: Option<PathBuf>,
    /// The kcl binary.
    #[clap(long, env = "KCL_BIN", default_value = "kcl")]
    kcl: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let run = match args.command {
        Some(Command::Run(run)) => run,
        None => RunArgs {
            input: "-".into(),
            output: None,
            kcl: std::env::var_os("KCL_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|| "kcl".into()),
        },
    };

    let input = if run.input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading stdin")?;
        buf
    } else {
        std::fs::read_to_string(&run.input).with_context(|| format!("reading `{}`", run.input))?
    };

    let interrupt = CancellationToken::new();
    tokio::spawn({
        let interrupt = interrupt.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted");
                interrupt.cancel();
            }
        }
    });

    let resolver = Resolver::default().with_interrupt(interrupt);
    let output = krm_kcl::run(&input, Arc::new(KclCli::new(run.kcl)), resolver).await?;

    match run.output {
        Some(path) => std::fs::write(&path, output)
            .with_context(|| format!("writing `{}`", path.display()))?,
        None => print!("{output}"),
    }

    Ok(())
}
