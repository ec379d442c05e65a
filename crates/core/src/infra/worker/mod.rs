mod sidecar;

pub use sidecar::{single_image_arguments, SidecarProcess, SidecarSpawner, WorkerInvocation};

use async_trait::async_trait;

use crate::domain::error::AppError;

/// ワーカープロセスのエラー
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker binary not found: {0}")]
    NotFound(String),
    #[error("Cannot execute worker binary: {0}")]
    PermissionDenied(String),
    #[error("Failed to spawn worker process: {0}")]
    Spawn(String),
}

impl From<WorkerError> for AppError {
    fn from(e: WorkerError) -> Self {
        AppError::worker(e.to_string())
    }
}

/// ワーカーから届くイベント。`Closed` は常に最後に届く
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// stderr の 1 チャンク（行単位、改行なし）
    Chunk(String),
    /// ストリームレベルのエラー（内容ではなく読み取り失敗）
    StreamError(String),
    /// プロセス終了。終了コードはシグナル終了時 None
    Closed(Option<i32>),
}

/// 起動済みワーカーのハンドル
#[async_trait]
pub trait WorkerProcess: Send {
    /// 次のイベントを待つ。`Closed` の後は None。キャンセルセーフであること
    async fn next_event(&mut self) -> Option<WorkerEvent>;

    /// 強制終了を要求する。何度呼んでもよく、終了後の呼び出しは何もしない
    fn kill(&mut self);

    fn pid(&self) -> Option<u32>;
}

/// ワーカー起動 trait
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, program: &str, args: &[String]) -> Result<Box<dyn WorkerProcess>, WorkerError>;
}
