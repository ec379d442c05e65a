use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::domain::job::{JobInfo, JobOutcome, JobStatus};

/// 停止要求トークン。ジョブごとに新しく作られ、外部の停止コマンドと共有される
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    stopped: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// 停止を要求し、待機中のジョブを起こす
    pub fn request_stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// 停止要求を待つ。キャンセルセーフ
    pub async fn stopped(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

/// ジョブレジストリ: ジョブID → 停止トークンの対応表
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
}

struct JobEntry {
    info: JobInfo,
    token: CancelToken,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// ジョブを登録し、ジョブIDと停止トークンを返す
    pub async fn register(&self, image_path: &str) -> (String, CancelToken) {
        let job_id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let token = CancelToken::new();

        let entry = JobEntry {
            info: JobInfo::new(job_id.clone(), image_path.to_string(), now),
            token: token.clone(),
        };

        let mut jobs = self.jobs.lock().await;
        jobs.insert(job_id.clone(), entry);

        (job_id, token)
    }

    /// ジョブをRunning状態に変更
    pub async fn mark_running(&self, job_id: &str) {
        let mut jobs = self.jobs.lock().await;
        if let Some(entry) = jobs.get_mut(job_id) {
            entry.info.status = JobStatus::Running;
        }
    }

    /// 最終結果を記録する
    pub async fn mark_finished(&self, job_id: &str, outcome: &JobOutcome) {
        let mut jobs = self.jobs.lock().await;
        if let Some(entry) = jobs.get_mut(job_id) {
            match outcome {
                JobOutcome::Skipped { .. } | JobOutcome::Done { .. } => {
                    entry.info.status = JobStatus::Done;
                }
                JobOutcome::Failed { message } => {
                    entry.info.status = JobStatus::Failed;
                    entry.info.error = Some(message.clone());
                }
                JobOutcome::Cancelled | JobOutcome::Abandoned => {
                    entry.info.status = JobStatus::Canceled;
                }
            }
        }
    }

    /// 停止を要求する。状態はジョブ側が結果を出した時点で確定する
    pub async fn cancel(&self, job_id: &str) -> bool {
        let jobs = self.jobs.lock().await;
        match jobs.get(job_id) {
            Some(entry) if is_active(entry.info.status) => {
                entry.token.request_stop();
                true
            }
            _ => false,
        }
    }

    /// 実行中の全ジョブに停止を要求する
    pub async fn cancel_all(&self) -> Vec<String> {
        let jobs = self.jobs.lock().await;
        let mut canceled = vec![];

        for (job_id, entry) in jobs.iter() {
            if is_active(entry.info.status) {
                entry.token.request_stop();
                canceled.push(job_id.clone());
            }
        }

        canceled
    }

    /// ジョブ情報を取得
    pub async fn get_job(&self, job_id: &str) -> Option<JobInfo> {
        let jobs = self.jobs.lock().await;
        jobs.get(job_id).map(|e| e.info.clone())
    }

    /// Queued / Running のジョブ一覧
    pub async fn active_jobs(&self) -> Vec<JobInfo> {
        let jobs = self.jobs.lock().await;
        jobs.values()
            .filter(|e| is_active(e.info.status))
            .map(|e| e.info.clone())
            .collect()
    }

    /// 完了済みジョブを削除（メモリ解放）
    pub async fn cleanup_completed(&self) {
        let mut jobs = self.jobs.lock().await;
        jobs.retain(|_, entry| is_active(entry.info.status));
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn is_active(status: JobStatus) -> bool {
    matches!(status, JobStatus::Queued | JobStatus::Running)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = JobRegistry::new();
        let (job_id, token) = registry.register("/img/cat.jpg").await;

        let info = registry.get_job(&job_id).await.unwrap();
        assert_eq!(info.status, JobStatus::Queued);
        assert_eq!(info.image_path, "/img/cat.jpg");
        assert!(!token.is_stopped());
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let registry = JobRegistry::new();
        let (job_id, _token) = registry.register("/img/cat.jpg").await;

        registry.mark_running(&job_id).await;
        assert_eq!(
            registry.get_job(&job_id).await.unwrap().status,
            JobStatus::Running
        );

        registry
            .mark_finished(
                &job_id,
                &JobOutcome::Done {
                    output_path: "/out/cat.png".into(),
                },
            )
            .await;
        assert_eq!(
            registry.get_job(&job_id).await.unwrap().status,
            JobStatus::Done
        );
    }

    #[tokio::test]
    async fn test_cancel_sets_token() {
        let registry = JobRegistry::new();
        let (job_id, token) = registry.register("/img/cat.jpg").await;
        registry.mark_running(&job_id).await;

        assert!(registry.cancel(&job_id).await);
        assert!(token.is_stopped());

        registry.mark_finished(&job_id, &JobOutcome::Cancelled).await;
        assert_eq!(
            registry.get_job(&job_id).await.unwrap().status,
            JobStatus::Canceled
        );
        // 終了済みジョブは停止できない
        assert!(!registry.cancel(&job_id).await);
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let registry = JobRegistry::new();
        assert!(!registry.cancel("missing").await);
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let registry = JobRegistry::new();
        let (j1, t1) = registry.register("/img/a.png").await;
        let (j2, t2) = registry.register("/img/b.png").await;
        let (j3, t3) = registry.register("/img/c.png").await;
        registry
            .mark_finished(&j3, &JobOutcome::Failed { message: "x".into() })
            .await;

        let canceled = registry.cancel_all().await;
        assert_eq!(canceled.len(), 2);
        assert!(canceled.contains(&j1));
        assert!(canceled.contains(&j2));
        assert!(t1.is_stopped() && t2.is_stopped());
        assert!(!t3.is_stopped());
    }

    #[tokio::test]
    async fn test_mark_failed_keeps_message() {
        let registry = JobRegistry::new();
        let (job_id, _) = registry.register("/img/a.png").await;

        registry
            .mark_finished(&job_id, &JobOutcome::Failed { message: "boom".into() })
            .await;
        let info = registry.get_job(&job_id).await.unwrap();
        assert_eq!(info.status, JobStatus::Failed);
        assert_eq!(info.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_cleanup() {
        let registry = JobRegistry::new();
        let (j1, _) = registry.register("/img/a.png").await;
        let (j2, _) = registry.register("/img/b.png").await;

        registry.mark_finished(&j1, &JobOutcome::Cancelled).await;
        registry.cleanup_completed().await;

        assert!(registry.get_job(&j1).await.is_none());
        assert!(registry.get_job(&j2).await.is_some());
        assert_eq!(registry.active_jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_token_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.stopped().await })
        };
        tokio::task::yield_now().await;
        token.request_stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_each_job_gets_fresh_token() {
        let registry = JobRegistry::new();
        let (j1, t1) = registry.register("/img/a.png").await;
        registry.mark_running(&j1).await;
        registry.cancel(&j1).await;

        let (_, t2) = registry.register("/img/a.png").await;
        assert!(t1.is_stopped());
        assert!(!t2.is_stopped());
    }
}
