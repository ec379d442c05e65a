use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::domain::error::AppError;
use crate::domain::job::{JobInfo, JobOutcome, JobRequest};
use crate::domain::settings::UpscaleSettings;
use crate::infra::convert::{Converter, ImageConverter};
use crate::infra::metrics::{Metrics, MetricsSummary};
use crate::infra::sink::UiSink;
use crate::infra::storage::SettingsStore;
use crate::infra::worker::{SidecarSpawner, WorkerSpawner};

use super::job_registry::JobRegistry;
use super::upscale_job::UpscalePipeline;

/// アプリケーションサービス: 設定・ジョブ管理・パイプラインを束ねる
pub struct UpscaleService {
    store: Mutex<SettingsStore>,
    registry: JobRegistry,
    pipeline: UpscalePipeline,
    metrics: Arc<Metrics>,
}

impl UpscaleService {
    pub fn new(
        store: SettingsStore,
        spawner: Arc<dyn WorkerSpawner>,
        converter: Arc<dyn Converter>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        Self {
            store: Mutex::new(store),
            registry: JobRegistry::new(),
            pipeline: UpscalePipeline::new(spawner, converter, metrics.clone()),
            metrics,
        }
    }

    /// 実プロセスと image クレートの変換器で組み立てる
    pub fn with_defaults(store: SettingsStore) -> Self {
        Self::new(store, Arc::new(SidecarSpawner), Arc::new(ImageConverter::new()))
    }

    /// 単一画像をアップスケールし、終端イベントを送ってから結果を返す
    pub async fn upscale_image(&self, request: JobRequest, sink: &dyn UiSink) -> JobOutcome {
        let settings = self.snapshot_settings(request.overwrite);

        let (job_id, token) = self.registry.register(&request.image_path).await;
        self.registry.mark_running(&job_id).await;
        self.metrics.inc_jobs_started();
        log::info!("Upscale job {job_id} started: {}", request.image_path);

        let outcome = self.pipeline.run(&request, &settings, sink, &token).await;

        self.registry.mark_finished(&job_id, &outcome).await;
        self.metrics.record_outcome(&outcome);
        log::info!("Upscale job {job_id} finished: {outcome:?}");
        outcome
    }

    /// バックグラウンドで実行し、ジョブIDを即座に返す
    pub async fn submit(
        self: &Arc<Self>,
        request: JobRequest,
        sink: Arc<dyn UiSink>,
    ) -> (String, JoinHandle<JobOutcome>) {
        let settings = self.snapshot_settings(request.overwrite);
        let (job_id, token) = self.registry.register(&request.image_path).await;

        let service = Arc::clone(self);
        let id = job_id.clone();
        let handle = tokio::spawn(async move {
            service.registry.mark_running(&id).await;
            service.metrics.inc_jobs_started();
            log::info!("Upscale job {id} started: {}", request.image_path);

            let outcome = service
                .pipeline
                .run(&request, &settings, sink.as_ref(), &token)
                .await;

            service.registry.mark_finished(&id, &outcome).await;
            service.metrics.record_outcome(&outcome);
            log::info!("Upscale job {id} finished: {outcome:?}");
            outcome
        });

        (job_id, handle)
    }

    /// 指定ジョブに停止を要求する
    pub async fn stop(&self, job_id: &str) -> bool {
        let stopped = self.registry.cancel(job_id).await;
        if stopped {
            log::info!("Stop requested for job {job_id}");
        }
        stopped
    }

    /// 実行中の全ジョブに停止を要求する
    pub async fn stop_all(&self) -> Vec<String> {
        let stopped = self.registry.cancel_all().await;
        log::info!("Stop requested for {} job(s)", stopped.len());
        stopped
    }

    pub async fn get_job(&self, job_id: &str) -> Option<JobInfo> {
        self.registry.get_job(job_id).await
    }

    /// 待機中・実行中のジョブ一覧
    pub async fn active_jobs(&self) -> Vec<JobInfo> {
        self.registry.active_jobs().await
    }

    pub async fn cleanup_jobs(&self) {
        self.registry.cleanup_completed().await;
    }

    pub fn get_settings(&self) -> Result<UpscaleSettings, AppError> {
        self.store.lock().get_settings()
    }

    pub fn update_settings(&self, settings: &UpscaleSettings) -> Result<(), AppError> {
        self.store.lock().save_settings(settings)
    }

    pub fn get_metrics(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    /// ジョブ開始時点の設定。上書きフラグは要求の値で確定させ、保存もする
    fn snapshot_settings(&self, overwrite: bool) -> UpscaleSettings {
        let store = self.store.lock();
        let mut settings = match store.get_settings() {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Failed to load settings, using defaults: {e}");
                UpscaleSettings::default()
            }
        };
        settings.overwrite = overwrite;
        if let Err(e) = store.set_overwrite(overwrite) {
            log::warn!("Failed to persist overwrite flag: {e}");
        }
        settings
    }
}
