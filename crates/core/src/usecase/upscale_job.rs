use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::domain::error::AppError;
use crate::domain::event::PROGRESS_INDETERMINATE;
use crate::domain::job::{
    JobDescriptor, JobOutcome, JobPhase, JobRequest, JobState, INTERMEDIATE_FORMAT,
};
use crate::domain::settings::UpscaleSettings;
use crate::infra::convert::{ConvertRequest, Converter};
use crate::infra::metrics::Metrics;
use crate::infra::progress::{classify, WorkerSignal};
use crate::infra::sink::UiSink;
use crate::infra::worker::{
    single_image_arguments, WorkerEvent, WorkerInvocation, WorkerProcess, WorkerSpawner,
};

use super::job_registry::CancelToken;
use super::reporter::{ResultReporter, CONVERT_ERROR_MESSAGE, WORKER_ERROR_MESSAGE};

/// 既存の出力を再利用できるか。上書き無効かつ出力ファイルが存在する場合のみ
pub fn should_skip(descriptor: &JobDescriptor, overwrite: bool) -> bool {
    !overwrite && Path::new(&descriptor.output_file).exists()
}

/// 単一画像のアップスケールジョブ。
///
/// ワーカーを起動して stderr を解釈し、正常終了したら変換ステージに渡して
/// 終端イベントを 1 回だけ送る。失敗はすべてここで吸収され、呼び出し元には
/// `JobOutcome` として返る。
pub struct UpscalePipeline {
    spawner: Arc<dyn WorkerSpawner>,
    converter: Arc<dyn Converter>,
    metrics: Arc<Metrics>,
}

impl UpscalePipeline {
    pub fn new(
        spawner: Arc<dyn WorkerSpawner>,
        converter: Arc<dyn Converter>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            spawner,
            converter,
            metrics,
        }
    }

    pub async fn run(
        &self,
        request: &JobRequest,
        settings: &UpscaleSettings,
        sink: &dyn UiSink,
        token: &CancelToken,
    ) -> JobOutcome {
        if !sink.is_available() {
            return JobOutcome::Abandoned;
        }

        let mut reporter = ResultReporter::new(sink);
        if let Err(e) = request.validate() {
            log::warn!("Rejected upscale request: {e}");
            reporter.error(&e.message);
            return JobOutcome::Failed { message: e.message };
        }

        let descriptor = JobDescriptor::resolve(request, settings);
        let mut state = JobState::new();

        if should_skip(&descriptor, settings.overwrite) {
            log::info!("Already upscaled at: {}", descriptor.output_file);
            advance(&mut state, JobPhase::SkippedDone);
            reporter.done(&descriptor.output_file);
            return JobOutcome::Skipped {
                output_path: descriptor.output_file,
            };
        }

        let args = single_image_arguments(&WorkerInvocation {
            input_dir: &descriptor.input_dir,
            file_name: &descriptor.file_name,
            output_file: &descriptor.output_file,
            models_dir: &descriptor.models_dir,
            model: &descriptor.model,
            scale: descriptor.model_scale,
            gpu_id: &descriptor.gpu_id,
            format: INTERMEDIATE_FORMAT,
        });

        let started = Instant::now();
        let mut worker = match self.spawner.spawn(&settings.worker_binary, &args) {
            Ok(worker) => worker,
            Err(e) => {
                let err = AppError::from(e);
                log::error!("Failed to start upscale worker: {err}");
                advance(&mut state, JobPhase::FailedDuringRun);
                state.mark_failed();
                sink.set_progress_bar(PROGRESS_INDETERMINATE);
                sink.progress(&err.message);
                advance(&mut state, JobPhase::Error);
                reporter.error(WORKER_ERROR_MESSAGE);
                return JobOutcome::Failed {
                    message: WORKER_ERROR_MESSAGE.to_string(),
                };
            }
        };
        advance(&mut state, JobPhase::Spawned);
        log::info!(
            "Upscaling {} with {} (pid {:?})",
            descriptor.input_path(),
            descriptor.model,
            worker.pid()
        );

        let mut stop_seen = false;
        loop {
            tokio::select! {
                event = worker.next_event() => match event {
                    Some(WorkerEvent::Chunk(chunk)) => {
                        on_data(&chunk, &mut state, sink, worker.as_mut());
                    }
                    Some(WorkerEvent::StreamError(err)) => {
                        on_stream_error(&err, &mut state, sink, worker.as_mut());
                    }
                    Some(WorkerEvent::Closed(code)) => {
                        log::debug!("Upscale worker closed (code {code:?})");
                        break;
                    }
                    None => break,
                },
                _ = token.stopped(), if !stop_seen => {
                    stop_seen = true;
                    log::info!("Stop requested, killing upscale worker");
                    worker.kill();
                }
            }
        }
        self.metrics
            .record_latency("upscale", started.elapsed().as_millis() as u64);

        self.on_close(&descriptor, &mut state, worker.as_mut(), sink, token, &mut reporter)
            .await
    }

    /// ワーカー終了時の判定。失敗・停止がなければ変換ステージに進む
    async fn on_close(
        &self,
        descriptor: &JobDescriptor,
        state: &mut JobState,
        worker: &mut dyn WorkerProcess,
        sink: &dyn UiSink,
        token: &CancelToken,
        reporter: &mut ResultReporter<'_>,
    ) -> JobOutcome {
        if !sink.is_available() {
            worker.kill();
            return JobOutcome::Abandoned;
        }

        if state.is_failed() {
            advance(state, JobPhase::Error);
            reporter.error(WORKER_ERROR_MESSAGE);
            return JobOutcome::Failed {
                message: WORKER_ERROR_MESSAGE.to_string(),
            };
        }

        // この判定を過ぎた後の停止要求では変換を止めない
        if token.is_stopped() {
            log::info!("Upscale stopped before conversion: {}", descriptor.output_file);
            advance(state, JobPhase::Cancelled);
            sink.set_progress_bar(PROGRESS_INDETERMINATE);
            reporter.cancelled();
            return JobOutcome::Cancelled;
        }

        advance(state, JobPhase::ClosedClean);
        log::info!("Done upscaling, scaling and converting now");
        sink.scaling_and_converting();
        // 終了済みだが念のため解放する
        worker.kill();

        if !sink.is_available() {
            return JobOutcome::Abandoned;
        }

        let request = ConvertRequest {
            original_path: PathBuf::from(descriptor.input_path()),
            upscaled_path: PathBuf::from(descriptor.intermediate_path(state.has_alpha())),
            output_path: PathBuf::from(&descriptor.output_file),
            scale: descriptor.requested_scale,
            format: descriptor.output_format.clone(),
        };

        let started = Instant::now();
        let result = self.converter.convert(&request).await;
        self.metrics
            .record_latency("convert", started.elapsed().as_millis() as u64);

        match result {
            Ok(()) => {
                advance(state, JobPhase::Done);
                sink.set_progress_bar(PROGRESS_INDETERMINATE);
                reporter.done(&descriptor.output_file);
                JobOutcome::Done {
                    output_path: descriptor.output_file.clone(),
                }
            }
            Err(e) => {
                let err = AppError::from(e);
                log::error!("Error processing (scaling and converting) the image: {err}");
                self.metrics.inc_conversion_failures();
                worker.kill();
                advance(state, JobPhase::Error);
                reporter.error(CONVERT_ERROR_MESSAGE);
                JobOutcome::Failed {
                    message: CONVERT_ERROR_MESSAGE.to_string(),
                }
            }
        }
    }
}

/// stderr の 1 チャンクを処理する
fn on_data(chunk: &str, state: &mut JobState, sink: &dyn UiSink, worker: &mut dyn WorkerProcess) {
    if !sink.is_available() {
        return;
    }
    log::debug!("image upscale: {chunk}");

    let signals = classify(chunk);
    for signal in &signals {
        if let WorkerSignal::Progress(value) = signal {
            state.record_progress(*value);
            sink.set_progress_bar(*value);
        }
    }
    sink.progress(chunk);

    for signal in signals {
        match signal {
            WorkerSignal::Failure(_) => {
                log::error!("Invalid GPU or failed: {chunk}");
                worker.kill();
                if state.mark_failed() {
                    advance(state, JobPhase::FailedDuringRun);
                }
            }
            WorkerSignal::AlphaDetected => {
                if state.mark_alpha() {
                    log::info!("Includes alpha channel, reading the .png intermediate");
                }
            }
            WorkerSignal::Progress(_) | WorkerSignal::Unrecognized(_) => {}
        }
    }
}

/// ストリームの読み取りエラー
fn on_stream_error(err: &str, state: &mut JobState, sink: &dyn UiSink, worker: &mut dyn WorkerProcess) {
    if !sink.is_available() {
        return;
    }
    log::error!("Upscale worker stream error: {err}");
    sink.set_progress_bar(PROGRESS_INDETERMINATE);
    sink.progress(err);
    if state.mark_failed() {
        advance(state, JobPhase::FailedDuringRun);
    }
    worker.kill();
}

fn advance(state: &mut JobState, next: JobPhase) {
    if let Err(e) = state.advance(next) {
        log::warn!("Unexpected job transition: {e}");
    }
}
