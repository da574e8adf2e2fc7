//! HelmRelease controller
//!
//! Drives one reconcile pass per HelmRelease event:
//!
//! 1. deleting records run the uninstall path, then drop the finalizer
//! 2. paused records and status-only echoes are skipped
//! 3. the finalizer is ensured and the spec validated
//! 4. chart fetch, values composition and action selection
//! 5. the engine walks the action table
//! 6. the live release and `observedGeneration` are recorded
//!
//! Successful passes requeue after `requeueInterval` so drift is probed
//! periodically; failed passes requeue after `errorRequeueInterval`.

pub mod chart;
pub mod state;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::{self, Action as ControllerAction, Controller};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::{ReleaseEngine, SelectionInput, choose_action};
use crate::error::{Error, ErrorCollection, Result};
use crate::helm::{GetOptions, HelmCli, ReleaseClient, SecretStorage};
use crate::models::helm_release::FINALIZER;
use crate::models::{ChartState, HelmRelease, Phase, ReleaseDefaults, Values};
use crate::retry::RetryConfig;
use crate::status::{KubeStatusStore, StatusManager, StatusStore};
use crate::values::{self, KubeValuesResolver, ValuesResolver};

pub use chart::{ChartSource, HelmPullChartSource};
pub use state::{PassTracker, pass_key};

/// Watcher timeout (seconds), kept below the client read timeout so idle
/// watches are closed by the API server first.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Shared state for reconcile passes
pub struct Context {
    pub store: Arc<dyn StatusStore>,
    pub status: Arc<StatusManager>,
    pub engine: ReleaseEngine,
    pub charts: Arc<dyn ChartSource>,
    pub resolver: Arc<dyn ValuesResolver>,
    pub tracker: PassTracker,
    pub requeue_interval: Duration,
    pub error_requeue_interval: Duration,
}

impl Context {
    pub fn builder(
        store: Arc<dyn StatusStore>,
        releases: Arc<dyn ReleaseClient>,
        charts: Arc<dyn ChartSource>,
        resolver: Arc<dyn ValuesResolver>,
    ) -> ContextBuilder {
        ContextBuilder {
            store,
            releases,
            charts,
            resolver,
            defaults: ReleaseDefaults::default(),
            retry: RetryConfig::default(),
            requeue_interval: Duration::from_secs(300),
            error_requeue_interval: Duration::from_secs(30),
        }
    }

    /// Production context: every collaborator talks to the cluster or the
    /// helm binary.
    pub fn from_config(client: Client, config: &Config) -> anyhow::Result<Self> {
        let storage = SecretStorage::new(client.clone());
        let releases = Arc::new(HelmCli::new(config.helm_binary.clone(), storage));
        let charts = Arc::new(HelmPullChartSource::new(
            config.helm_binary.clone(),
            config.chart_cache_dir.clone(),
            client.clone(),
        ));
        let resolver = Arc::new(KubeValuesResolver::new(
            client.clone(),
            config.controller.http_timeout()?,
        )?);
        let store = Arc::new(KubeStatusStore::new(client));

        Ok(Self::builder(store, releases, charts, resolver)
            .defaults(config.defaults.to_release_defaults()?)
            .retry(RetryConfig::from(&config.status_retry))
            .requeue(
                config.controller.requeue_interval()?,
                config.controller.error_requeue_interval()?,
            )
            .build())
    }
}

pub struct ContextBuilder {
    store: Arc<dyn StatusStore>,
    releases: Arc<dyn ReleaseClient>,
    charts: Arc<dyn ChartSource>,
    resolver: Arc<dyn ValuesResolver>,
    defaults: ReleaseDefaults,
    retry: RetryConfig,
    requeue_interval: Duration,
    error_requeue_interval: Duration,
}

impl ContextBuilder {
    pub fn defaults(mut self, defaults: ReleaseDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Requeue delays after successful and failed passes.
    pub fn requeue(mut self, interval: Duration, error_interval: Duration) -> Self {
        self.requeue_interval = interval;
        self.error_requeue_interval = error_interval;
        self
    }

    pub fn build(self) -> Context {
        let status = Arc::new(StatusManager::new(self.store.clone(), self.retry));
        Context {
            engine: ReleaseEngine::new(self.releases, status.clone(), self.defaults),
            store: self.store,
            status,
            charts: self.charts,
            resolver: self.resolver,
            tracker: PassTracker::new(),
            requeue_interval: self.requeue_interval,
            error_requeue_interval: self.error_requeue_interval,
        }
    }
}

fn has_finalizer(hr: &HelmRelease) -> bool {
    hr.finalizers().iter().any(|f| f == FINALIZER)
}

/// Reconcile one HelmRelease
pub async fn reconcile(hr: Arc<HelmRelease>, ctx: Arc<Context>) -> Result<ControllerAction> {
    let name = hr.name_any();
    let namespace = hr.namespace().unwrap_or_default();
    let key = pass_key(&namespace, &name);
    // Status writes may hand back a newer record; only this one gets observed.
    let generation = hr.generation();

    if hr.has_deletion_marker() {
        return finalize(&hr, &ctx, &key).await;
    }

    if hr.spec.paused {
        info!(name = %name, namespace = %namespace, "HelmRelease is paused, skipping");
        return Ok(ControllerAction::await_change());
    }

    if let Some(wait) = ctx.tracker.remaining(
        &key,
        generation,
        ctx.requeue_interval,
        ctx.error_requeue_interval,
    ) {
        debug!(name = %name, namespace = %namespace, generation, "Generation already reconciled, requeueing");
        return Ok(ControllerAction::requeue(wait));
    }

    info!(name = %name, namespace = %namespace, generation, "Reconciling HelmRelease");
    let mut record = (*hr).clone();
    if !has_finalizer(&record) {
        let mut finalizers = record.finalizers().to_vec();
        finalizers.push(FINALIZER.to_string());
        record = ctx.store.write_finalizers(&record, finalizers).await?;
        debug!(name = %name, namespace = %namespace, "Added finalizer");
    }

    if let Err(e) = record.validate() {
        warn!(name = %name, namespace = %namespace, error = %e, "HelmRelease is invalid");
        let already_reported = record.status.as_ref().is_some_and(|s| {
            s.phase == Some(Phase::Failed) && s.observed_generation == Some(generation)
        });
        if !already_reported {
            ctx.status.set_phase(&mut record, Phase::Failed).await?;
            ctx.status.set_observed_generation(&mut record, generation).await?;
        }
        ctx.tracker.finish(&key, generation, true);
        return Ok(ControllerAction::await_change());
    }

    let result = run_pass(&mut record, &ctx, generation).await;
    ctx.tracker.finish(&key, generation, result.is_err());
    match result {
        Ok(()) => {
            info!(name = %name, namespace = %namespace, "Reconcile pass complete");
            Ok(ControllerAction::requeue(ctx.requeue_interval))
        }
        Err(e) => Err(e),
    }
}

/// Everything after validation. Chart, values and selection failures stop
/// the pass before the engine runs.
async fn run_pass(record: &mut HelmRelease, ctx: &Context, generation: i64) -> Result<()> {
    let chart = match ctx.charts.fetch(record).await {
        Ok(chart) => chart,
        Err(e) => {
            error!(name = %record.name_any(), error = %e, "Chart fetch failed");
            return Err(with_phase(ctx, record, Phase::ChartFetchFailed, e).await);
        }
    };
    if chart.changed {
        info!(name = %record.name_any(), revision = %chart.revision, "Chart fetched");
        ctx.status.set_phase(record, Phase::ChartFetched).await?;
    }

    let values = match compose_values(record, &chart, ctx).await {
        Ok(values) => values,
        Err(e) => {
            error!(name = %record.name_any(), error = %e, "Values composition failed");
            return Err(with_phase(ctx, record, Phase::Failed, e).await);
        }
    };

    let input = SelectionInput::from_record(record, chart.changed);
    let selection =
        match choose_action(ctx.engine.client(), record, input, ctx.engine.defaults()).await {
            Ok(selection) => selection,
            Err(e) => {
                error!(name = %record.name_any(), error = %e, "Action selection failed");
                return Err(with_phase(ctx, record, Phase::Failed, e).await);
            }
        };
    info!(
        name = %record.name_any(),
        release = %record.release_name(),
        action = %selection.action,
        "Selected action"
    );

    let mut report = ctx.engine.run(record, selection, &chart, &values).await;
    record_release(record, ctx, generation, &mut report.errors).await;
    report.into_result()
}

async fn compose_values(record: &HelmRelease, chart: &ChartState, ctx: &Context) -> Result<Values> {
    let inline = record.inline_values()?;
    values::compose(
        inline,
        &record.spec.values_from,
        &record.namespace().unwrap_or_default(),
        &chart.chart_path,
        ctx.resolver.as_ref(),
    )
    .await
}

/// Set `phase` and hand back `err`, folding a failed status write into it.
async fn with_phase(ctx: &Context, record: &mut HelmRelease, phase: Phase, err: Error) -> Error {
    match ctx.status.set_phase(record, phase).await {
        Ok(()) => err,
        Err(write_err) => {
            error!(phase = %phase, error = %write_err, "Couldn't update status");
            let mut errors = ErrorCollection::new();
            errors.push(err);
            errors.push(write_err);
            Error::Aggregate(errors)
        }
    }
}

/// Record the live release and advance `observedGeneration` to the
/// generation the pass started from.
async fn record_release(
    record: &mut HelmRelease,
    ctx: &Context,
    generation: i64,
    errors: &mut ErrorCollection,
) {
    let get = GetOptions {
        namespace: record.target_namespace(),
        version: 0,
    };
    let release = match ctx.engine.client().get(&record.release_name(), &get).await {
        Ok(release) => release,
        Err(e) if e.is_not_found() => None,
        Err(e) => {
            errors.push(e);
            return;
        }
    };
    if let Err(e) = ctx.status.set_release_status(record, release.as_ref()).await {
        errors.push(e);
    }
    if let Err(e) = ctx.status.set_observed_generation(record, generation).await {
        errors.push(e);
    }
}

/// Uninstall the release of a deleting record, then release the record.
async fn finalize(hr: &HelmRelease, ctx: &Context, key: &str) -> Result<ControllerAction> {
    let name = hr.name_any();
    if !has_finalizer(hr) {
        return Ok(ControllerAction::await_change());
    }
    info!(name = %name, release = %hr.release_name(), "Finalizing HelmRelease");

    let mut record = hr.clone();
    let input = SelectionInput::from_record(&record, false);
    let selection =
        choose_action(ctx.engine.client(), &record, input, ctx.engine.defaults()).await?;

    if selection.current.is_some() {
        let chart = ChartState {
            chart_path: PathBuf::new(),
            revision: record.spec.chart.version.clone(),
            changed: false,
        };
        let report = ctx
            .engine
            .run(&mut record, selection, &chart, &Values::empty_map())
            .await;
        report.into_result()?;
    } else {
        debug!(name = %name, "No release to uninstall");
    }

    let finalizers: Vec<String> = record
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != FINALIZER)
        .cloned()
        .collect();
    ctx.store
        .write_finalizers(&record, finalizers)
        .await
        .map_err(|e| Error::Finalizer(format!("removing {}: {}", FINALIZER, e)))?;
    ctx.tracker.forget(key);
    info!(name = %name, "Finalizer removed");
    Ok(ControllerAction::await_change())
}

/// Requeue a failed pass after the error interval.
pub fn error_policy(hr: Arc<HelmRelease>, error: &Error, ctx: Arc<Context>) -> ControllerAction {
    error!(
        error = %error,
        name = %hr.name_any(),
        namespace = %hr.namespace().unwrap_or_default(),
        "Reconciliation failed"
    );
    ControllerAction::requeue(ctx.error_requeue_interval)
}

/// Build the controller future for `config`.
pub fn build_controller(
    client: Client,
    config: &Config,
) -> anyhow::Result<Pin<Box<dyn Future<Output = ()> + Send>>> {
    let ctx = Arc::new(Context::from_config(client.clone(), config)?);
    let api: Api<HelmRelease> = match config.watch_namespace() {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    info!(
        namespace = config.watch_namespace().unwrap_or("*"),
        workers = config.controller.workers,
        "Starting HelmRelease controller"
    );

    Ok(Box::pin(
        Controller::new(api, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .with_config(controller::Config::default().concurrency(config.controller.workers))
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result),
    ))
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    result: std::result::Result<T, E>,
) -> std::future::Ready<()> {
    match result {
        Ok(action) => debug!(?action, "HelmRelease reconciliation completed"),
        Err(e) => warn!(error = ?e, "HelmRelease reconciliation error"),
    }
    std::future::ready(())
}
