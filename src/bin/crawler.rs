use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use docrag::{
    CrawlCli, CrawlRuntime, CrawlServices, DirectoryPageSource, HttpPageSource, PageSource,
    TaxonomyPath,
};

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    docrag::init_tracing();
    let cli = CrawlCli::parse();

    let pages: Arc<dyn PageSource> = match &cli.mirror {
        Some(root) => {
            tracing::info!(mirror = %root.display(), "reading pages from local mirror");
            Arc::new(DirectoryPageSource::new(root.clone()))
        }
        None => Arc::new(HttpPageSource::new(
            &cli.host,
            cli.fetch_timeout(),
            cli.politeness_delay(),
        )?),
    };
    let index = cli.index.build_index()?;
    let services = CrawlServices {
        pages,
        embedder: cli.provider.build_embedder()?,
        index: index.index.clone(),
        enhancer: cli.build_enhancer()?,
    };
    let root: TaxonomyPath = cli
        .root_path()
        .parse()
        .with_context(|| format!("invalid --root-path {:?}", cli.root_path()))?;

    let stop = Arc::new(AtomicBool::new(false));
    install_ctrl_c(stop.clone())?;
    let runtime = CrawlRuntime::new(services, cli.build_controls()).with_stop_flag(stop);
    let outcome = runtime.run_from(&cli.taxonomy, &root, cli.target);

    index.save_snapshot(cli.index.snapshot.as_ref())?;
    eprintln!("{}", outcome.summary);
    outcome
        .into_result()
        .map(|_| ())
        .context("crawl stopped on a pipeline failure")
}

/// Exit status after a forced second interrupt (128 + SIGINT).
const FORCED_EXIT_CODE: i32 = 130;

/// Raises `stop` and reports whether it was already raised.
fn note_interrupt(stop: &AtomicBool) -> bool {
    stop.swap(true, Ordering::AcqRel)
}

/// Raises `stop` on the first Ctrl-C and exits immediately on the second.
fn install_ctrl_c(stop: Arc<AtomicBool>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    thread::Builder::new()
        .name("docrag-signal".into())
        .spawn(move || {
            runtime.block_on(async {
                while tokio::signal::ctrl_c().await.is_ok() {
                    if note_interrupt(&stop) {
                        tracing::warn!("second interrupt received; exiting without flushing");
                        std::process::exit(FORCED_EXIT_CODE);
                    }
                    tracing::warn!(
                        "interrupt received; finishing in-flight pages and flushing \
                         (press Ctrl-C again to force exit)"
                    );
                }
            });
        })
        .context("failed to spawn signal thread")?;
    Ok(())
}
