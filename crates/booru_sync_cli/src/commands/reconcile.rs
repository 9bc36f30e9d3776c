//! The `reconcile` command: fetch, diff, cache and (with `--submit`) patch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use booru_sync::http::reqwest_transport::ReqwestTransport;
use booru_sync::http::{HttpTransport, ProxyAuth};
use booru_sync::remote::{ProxyPool, ProxySource, RateLimitGate, ResponseCache};
use booru_sync::retry::RetryConfig;
use booru_sync::sync::{ReconcileContext, ReconcileOptions, reconcile};
use booru_sync::{DiffEngine, LocalStore, PatchApplier, PostStore, RemoteClient};
use console::Term;

use crate::ReconcileArgs;
use crate::commands::shared::{
    JournalPaths, Journals, display_errors, display_summary, ensure_parent_dir, open_store,
    restore_created_tags,
};
use crate::config::Config;
use crate::progress::ProgressReporter;
use crate::shutdown::{is_shutdown_requested, shutdown_flag};

/// Run options after merging flags over config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReconcileSettings {
    pub(crate) threads: usize,
    pub(crate) retry: usize,
    pub(crate) submit: bool,
    pub(crate) shuffle: bool,
    pub(crate) base_url: String,
    pub(crate) requests_cache: Option<PathBuf>,
    pub(crate) proxy: Option<ProxySettings>,
}

/// Where the proxy list comes from and how to authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProxySettings {
    pub(crate) source: ProxySource,
    pub(crate) auth: Option<ProxyAuth>,
    pub(crate) refresh: Duration,
}

impl ReconcileSettings {
    /// Flags win over config; boolean flags can only switch a behaviour on.
    pub(crate) fn merge(
        args: &ReconcileArgs,
        config: &Config,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let threads = args.threads.unwrap_or(config.reconcile.threads).max(1);
        let retry = args.retry.unwrap_or(config.reconcile.retry);

        let requests_cache = args
            .requests_cache
            .as_ref()
            .or(config.cache.requests_file.as_ref())
            .map(|path| config.resolve_cache_path(path));

        Ok(Self {
            threads,
            retry,
            submit: args.submit || config.reconcile.submit,
            shuffle: args.shuffle || config.reconcile.shuffle,
            base_url: args
                .base_url
                .clone()
                .unwrap_or_else(|| config.remote.base_url.clone()),
            requests_cache,
            proxy: ProxySettings::merge(args, config)?,
        })
    }
}

impl ProxySettings {
    fn merge(
        args: &ReconcileArgs,
        config: &Config,
    ) -> Result<Option<Self>, Box<dyn std::error::Error>> {
        let flags = &args.proxy;
        let enabled = flags.proxy
            || flags.proxy_file.is_some()
            || flags.proxy_address.is_some()
            || config.proxy.enabled;
        if !enabled {
            return Ok(None);
        }

        // A source given on the command line replaces both configured sources
        let source = if let Some(file) = &flags.proxy_file {
            ProxySource::File(file.clone())
        } else if let Some(address) = &flags.proxy_address {
            ProxySource::Url(address.clone())
        } else if let Some(file) = &config.proxy.file {
            ProxySource::File(file.clone())
        } else if let Some(address) = &config.proxy.address {
            ProxySource::Url(address.clone())
        } else {
            return Err("Proxy rotation is enabled but no --proxy-file or --proxy-address was given".into());
        };

        let auth = match flags.proxy_auth.as_ref().or(config.proxy.auth.as_ref()) {
            Some(raw) => Some(
                ProxyAuth::parse(raw).ok_or("Invalid proxy auth, expected user:password")?,
            ),
            None => None,
        };

        Ok(Some(Self {
            source,
            auth,
            refresh: Duration::from_secs(config.proxy.refresh_secs),
        }))
    }
}

/// Build the remote client: transport, request spacing, response cache and
/// optional proxy pool.
async fn build_remote(
    settings: &ReconcileSettings,
    config: &Config,
) -> Result<RemoteClient, Box<dyn std::error::Error>> {
    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::with_timeout(
        Duration::from_secs(config.remote.timeout_secs),
    )?);

    let mut client = RemoteClient::with_transport(Arc::clone(&transport), &settings.base_url)?
        .with_request_spacing(Duration::from_millis(config.remote.request_spacing_ms));

    if let Some(path) = &settings.requests_cache {
        ensure_parent_dir(path)?;
        let cache = ResponseCache::open(path)?;
        tracing::info!(path = %path.display(), responses = cache.len(), "Loaded response cache");
        client = client.with_response_cache(cache);
    }

    if let Some(proxy) = &settings.proxy {
        let pool = ProxyPool::load(proxy.source.clone(), proxy.auth.clone(), transport)
            .await?
            .with_refresh_interval(proxy.refresh);
        client = client.with_proxy_pool(Arc::new(pool));
    }

    Ok(client)
}

/// Handle the reconcile command.
pub(crate) async fn handle_reconcile(
    args: ReconcileArgs,
    config: &Config,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = ReconcileSettings::merge(&args, config)?;
    let is_tty = Term::stdout().is_term();

    let store = open_store(database_url).await?;
    let journals = Journals::open(&JournalPaths::resolve(config, &args.cache))?;

    let reporter = Arc::new(ProgressReporter::new());
    let callback = reporter.as_callback();
    restore_created_tags(&journals.tags, &store, &callback).await?;

    let range = args.range.id_range();
    let ids = store.list_post_ids(range).await?;
    if ids.is_empty() {
        if is_tty {
            println!("No local posts in range.");
        } else {
            tracing::info!(start = range.start, end = ?range.end, "No local posts in range");
        }
        return Ok(());
    }

    let remote = Arc::new(build_remote(&settings, config).await?);
    let local: Arc<dyn LocalStore> = store;
    let ctx = ReconcileContext {
        engine: Arc::new(DiffEngine::new(remote, Arc::clone(&local))),
        cache: Arc::clone(&journals.differences),
        tracker: Arc::clone(&journals.patched),
        applier: Arc::new(PatchApplier::new(
            local,
            Arc::clone(&journals.patched),
            Arc::clone(&journals.tags),
        )),
        gate: Arc::new(RateLimitGate::default()),
    };

    let options = ReconcileOptions {
        workers: settings.threads,
        submit: settings.submit,
        retry: RetryConfig::with_max_retries(settings.retry),
        shuffle: settings.shuffle,
        shutdown: Some(shutdown_flag()),
    };

    tracing::info!(
        posts = ids.len(),
        threads = settings.threads,
        submit = settings.submit,
        base_url = %settings.base_url,
        "Reconciling"
    );
    let summary = reconcile(&ctx, ids, &options, Some(callback)).await;
    reporter.finish();

    display_summary(&summary, settings.submit, is_tty);
    display_errors(&summary, is_tty);
    if is_shutdown_requested() {
        tracing::warn!("Run interrupted; rerun to continue where it stopped");
    }

    if let Some(panic) = summary.writer_panic {
        return Err(format!("Patch writer crashed: {panic}").into());
    }
    Ok(())
}
