use pinprobe::address::get_resolver;
use pinprobe::candidate::CandidateStream;
use pinprobe::exclusion::ExclusionFilter;
use pinprobe::input::{Config, Opts};
use pinprobe::pool::{Output, WorkerPool};
use pinprobe::prober::HttpsProber;

use anyhow::Context;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::io::BufReader;

#[cfg(not(tarpaulin_include))]
#[tokio::main]
/// Reads the command line arguments into an Opts struct, builds the
/// exclusion filter and runs the probing pipeline over stdin.
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut opts: Opts = Opts::read();
    let config = Config::read(opts.config_path.as_deref())?;
    opts.merge(&config);

    debug!("Main() `opts` arguments are {opts:?}");

    let pipeline = opts.pipeline_config();

    let filter = ExclusionFilter::from_files(
        opts.exclude_hosts.as_deref(),
        opts.exclude_ip_ranges.as_deref(),
    )
    .context("cannot build the exclusion filter")?;
    info!(
        "Excluding {} hosts and {} IP ranges",
        filter.host_count(),
        filter.range_count()
    );
    let filter = Arc::new(filter);

    #[cfg(unix)]
    let soft_limit = adjust_ulimit_size(&opts);
    #[cfg(not(unix))]
    let soft_limit: Option<u64> = None;

    if let Some(soft) = soft_limit {
        if soft < u64::try_from(pipeline.workers.get()).unwrap_or(u64::MAX) {
            warn!(
                "The open file limit ({soft}) is lower than the worker count ({}). \
                 Consider raising it with --ulimit.",
                pipeline.workers
            );
        }
    }

    let resolver = get_resolver(opts.resolver.as_deref()).await;
    let prober = Arc::new(HttpsProber::new(
        resolver,
        Arc::clone(&filter),
        pipeline.timeout,
    ));

    let stream = CandidateStream::new(
        BufReader::new(tokio::io::stdin()),
        filter,
        pipeline.interval,
    );

    let pool = WorkerPool::new(pipeline.workers);
    info!("Spawning {} workers", pool.workers());

    let summary = pool
        .run_stream(stream, prober, Arc::new(Output::stdout()))
        .await;

    info!(
        "Probed {} candidates, {} reachable",
        summary.probed, summary.reachable
    );
    Ok(())
}

/// Raises the open file limit when asked to and returns the soft limit in
/// effect afterwards.
#[cfg(unix)]
fn adjust_ulimit_size(opts: &Opts) -> Option<u64> {
    use rlimit::Resource;

    if let Some(limit) = opts.ulimit {
        match Resource::NOFILE.set(limit, limit) {
            Ok(()) => info!("Automatically increasing ulimit value to {limit}."),
            Err(e) => warn!("Failed to set ulimit value: {e}"),
        }
    }

    match Resource::NOFILE.get() {
        Ok((soft, _)) => Some(soft),
        Err(e) => {
            debug!("Cannot read the open file limit: {e}");
            None
        }
    }
}
