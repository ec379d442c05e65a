use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, oneshot};

use super::{WorkerError, WorkerEvent, WorkerProcess, WorkerSpawner};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// 単一画像アップスケールのワーカー引数
#[derive(Debug, Clone)]
pub struct WorkerInvocation<'a> {
    pub input_dir: &'a str,
    pub file_name: &'a str,
    pub output_file: &'a str,
    pub models_dir: &'a str,
    pub model: &'a str,
    pub scale: u32,
    pub gpu_id: &'a str,
    pub format: &'a str,
}

/// Real-ESRGAN 互換ワーカー用のコマンドライン引数を構築する。
pub fn single_image_arguments(inv: &WorkerInvocation<'_>) -> Vec<String> {
    let mut args = vec![
        "-i".into(),
        format!("{}{}{}", inv.input_dir, std::path::MAIN_SEPARATOR, inv.file_name),
        "-o".into(),
        inv.output_file.into(),
        "-s".into(),
        inv.scale.to_string(),
        "-m".into(),
        inv.models_dir.into(),
        "-n".into(),
        inv.model.into(),
    ];

    if !inv.gpu_id.is_empty() {
        args.push("-g".into());
        args.push(inv.gpu_id.into());
    }

    args.push("-f".into());
    args.push(inv.format.into());
    args
}

/// tokio::process でワーカーを起動する実装。
#[derive(Debug, Default, Clone)]
pub struct SidecarSpawner;

impl SidecarSpawner {
    pub fn new() -> Self {
        Self
    }
}

impl WorkerSpawner for SidecarSpawner {
    fn spawn(&self, program: &str, args: &[String]) -> Result<Box<dyn WorkerProcess>, WorkerError> {
        log::debug!("Running worker: {program:?} {args:?}");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => WorkerError::NotFound(program.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                WorkerError::PermissionDenied(format!("{program}: {e}"))
            }
            _ => WorkerError::Spawn(e.to_string()),
        })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| WorkerError::Spawn("Failed to capture stderr".to_string()))?;

        Ok(Box::new(SidecarProcess::start(child, stderr)))
    }
}

/// 起動済みワーカー。stderr の読み取りと終了待ちは専用タスクで行う
pub struct SidecarProcess {
    pid: Option<u32>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl SidecarProcess {
    fn start(child: Child, stderr: ChildStderr) -> Self {
        let pid = child.id();
        let (event_tx, events) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();

        tokio::spawn(supervise(child, stderr, event_tx, kill_rx));

        Self {
            pid,
            events,
            kill_tx: Some(kill_tx),
        }
    }
}

#[async_trait]
impl WorkerProcess for SidecarProcess {
    async fn next_event(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }

    fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            // 監視タスクが既に終わっていれば送信は失敗するが問題ない
            let _ = tx.send(());
        }
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// stderr を行単位で読み、EOF 後に終了を待って `Closed` を送る。
/// kill 要求（またはハンドルの破棄）で強制終了する。
async fn supervise(
    mut child: Child,
    stderr: ChildStderr,
    tx: mpsc::UnboundedSender<WorkerEvent>,
    mut kill_rx: oneshot::Receiver<()>,
) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    let mut stream_open = true;
    let mut kill_requested = false;

    loop {
        tokio::select! {
            read = reader.read_until(b'\n', &mut buf), if stream_open => match read {
                Ok(0) => stream_open = false,
                Ok(_) => {
                    let chunk = String::from_utf8_lossy(&buf)
                        .trim_end_matches(&['\r', '\n'][..])
                        .to_string();
                    buf.clear();
                    if !chunk.is_empty() {
                        let _ = tx.send(WorkerEvent::Chunk(chunk));
                    }
                }
                Err(e) => {
                    let _ = tx.send(WorkerEvent::StreamError(e.to_string()));
                    stream_open = false;
                }
            },
            _ = &mut kill_rx, if !kill_requested => {
                kill_requested = true;
                if let Err(e) = child.start_kill() {
                    log::debug!("Worker kill ignored: {e}");
                }
            }
            status = child.wait(), if !stream_open => {
                let code = match status {
                    Ok(status) => {
                        log::debug!("Worker exited with status {status}");
                        status.code()
                    }
                    Err(e) => {
                        log::warn!("Failed to wait for worker: {e}");
                        None
                    }
                };
                let _ = tx.send(WorkerEvent::Closed(code));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation<'a>(gpu_id: &'a str) -> WorkerInvocation<'a> {
        WorkerInvocation {
            input_dir: "/img",
            file_name: "cat.jpg",
            output_file: "/out/cat_upscayl_2x_upscayl-x2-model.png",
            models_dir: "/models",
            model: "upscayl-x2-model",
            scale: 2,
            gpu_id,
            format: "png",
        }
    }

    #[test]
    fn arguments_are_ordered() {
        let args = single_image_arguments(&invocation(""));
        let sep = std::path::MAIN_SEPARATOR;
        assert_eq!(
            args,
            vec![
                "-i".to_string(),
                format!("/img{sep}cat.jpg"),
                "-o".into(),
                "/out/cat_upscayl_2x_upscayl-x2-model.png".into(),
                "-s".into(),
                "2".into(),
                "-m".into(),
                "/models".into(),
                "-n".into(),
                "upscayl-x2-model".into(),
                "-f".into(),
                "png".into(),
            ]
        );
    }

    #[test]
    fn gpu_id_is_passed_when_set() {
        let args = single_image_arguments(&invocation("1"));
        let idx = args.iter().position(|a| a == "-g").unwrap();
        assert_eq!(args[idx + 1], "1");
        assert_eq!(args[args.len() - 2], "-f");
    }

    #[tokio::test]
    async fn spawn_missing_binary() {
        let spawner = SidecarSpawner::new();
        let err = spawner
            .spawn("/nonexistent/upscayl-bin-xyz", &[])
            .err()
            .unwrap();
        assert!(matches!(err, WorkerError::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_lines_then_close() {
        let spawner = SidecarSpawner::new();
        let args = vec![
            "-c".to_string(),
            "printf '10.00%%\\n55.50%%\\r\\nhas alpha channel' >&2; exit 3".to_string(),
        ];
        let mut worker = spawner.spawn("sh", &args).unwrap();
        assert!(worker.pid().is_some());

        let mut events = Vec::new();
        while let Some(ev) = worker.next_event().await {
            events.push(ev);
        }
        assert_eq!(
            events,
            vec![
                WorkerEvent::Chunk("10.00%".into()),
                WorkerEvent::Chunk("55.50%".into()),
                WorkerEvent::Chunk("has alpha channel".into()),
                WorkerEvent::Closed(Some(3)),
            ]
        );

        // 終了後の kill は何もしない
        worker.kill();
        worker.kill();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_terminates_running_worker() {
        let spawner = SidecarSpawner::new();
        let args = vec!["-c".to_string(), "echo started >&2; exec sleep 30".to_string()];
        let mut worker = spawner.spawn("sh", &args).unwrap();

        assert_eq!(
            worker.next_event().await,
            Some(WorkerEvent::Chunk("started".into()))
        );
        worker.kill();

        let closed = tokio::time::timeout(std::time::Duration::from_secs(10), async {
            loop {
                match worker.next_event().await {
                    Some(WorkerEvent::Closed(code)) => break code,
                    Some(_) => continue,
                    None => panic!("stream ended without Closed"),
                }
            }
        })
        .await
        .unwrap();
        // シグナル終了なので終了コードなし
        assert_eq!(closed, None);
    }
}
