use crate::{
    constants::ICON_PLACEHOLDER,
    events::model::{LogEvent, LogLevel},
};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait LogSink: Send + Sync {
    async fn handle(&self, event: &LogEvent);
    async fn flush(&self) {}
}

pub struct ConsoleSink {
    level_filter: Option<LogLevel>,
}
impl ConsoleSink {
    pub fn new(level_filter: Option<LogLevel>) -> Self {
        Self { level_filter }
    }
}

#[async_trait]
impl LogSink for ConsoleSink {
    async fn handle(&self, event: &LogEvent) {
        let meta = event.meta();
        if meta.suppress_console {
            return;
        }
        if let Some(min) = self.level_filter {
            if meta.level.rank() < min.rank() {
                return;
            }
        }
        match event {
            LogEvent::Endpoint(e) => {
                println!(
                    "{}ENDPOINT handle={} action={} addr={:?} state={:?} detail={:?}",
                    ICON_PLACEHOLDER, e.handle, e.action, e.addr, e.state, e.detail
                );
            }
            LogEvent::Handshake(h) => {
                println!(
                    "{}HANDSHAKE handle={} seq={} result={} failure={:?} peer={:?} proto={:?} cipher={:?} from={:?}",
                    ICON_PLACEHOLDER,
                    h.handle,
                    h.seq,
                    h.result,
                    h.failure,
                    h.peer_identity,
                    h.protocol,
                    h.cipher,
                    h.peer_addr
                );
            }
            LogEvent::Factory(f) => {
                println!(
                    "{}FACTORY op={} handle={:?} ok={} detail={:?} corr={:?}",
                    ICON_PLACEHOLDER, f.op, f.handle, f.ok, f.detail, f.meta.corr_id
                );
            }
            LogEvent::Network(n) => {
                println!(
                    "{}NET action={} addr={:?} detail={:?} corr={:?}",
                    ICON_PLACEHOLDER, n.action, n.addr, n.detail, n.meta.corr_id
                );
            }
            LogEvent::System(s) => {
                println!(
                    "{}SYS action={} detail={:?} corr={:?}",
                    ICON_PLACEHOLDER, s.action, s.detail, s.meta.corr_id
                );
            }
        }
    }
}

pub struct JsonFileSink {
    path: std::path::PathBuf,
    rotate: bool,
    max_size_bytes: u64,
    max_backups: u32,
    writer: tokio::sync::Mutex<Option<tokio::fs::File>>,
}

impl JsonFileSink {
    pub async fn new<P: Into<std::path::PathBuf>>(
        path: P,
        rotate: bool,
        max_size_bytes: u64,
        max_backups: u32,
    ) -> std::io::Result<Self> {
        let pb = path.into();
        if let Some(parent) = pb.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&pb)
            .await?;
        Ok(Self {
            path: pb,
            rotate,
            max_size_bytes,
            max_backups,
            writer: tokio::sync::Mutex::new(Some(file)),
        })
    }
    async fn rotate_if_needed(&self) {
        if !self.rotate {
            return;
        }
        if let Ok(meta) = tokio::fs::metadata(&self.path).await {
            if meta.len() >= self.max_size_bytes {
                let _ = self.perform_rotation().await;
            }
        }
    }
    async fn perform_rotation(&self) -> std::io::Result<()> {
        let mut guard = self.writer.lock().await;
        *guard = None;
        for idx in (1..self.max_backups.max(1)).rev() {
            let from = self.path.with_extension(format!("jsonl.{}", idx));
            let to = self.path.with_extension(format!("jsonl.{}", idx + 1));
            if tokio::fs::metadata(&from).await.is_ok() {
                let _ = tokio::fs::rename(&from, &to).await;
            }
        }
        let rotated = self.path.with_extension("jsonl.1");
        tokio::fs::rename(&self.path, rotated).await?;
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        *guard = Some(file);
        Ok(())
    }
}

#[async_trait]
impl LogSink for JsonFileSink {
    async fn handle(&self, event: &LogEvent) {
        self.rotate_if_needed().await;
        if let Ok(json) = serde_json::to_string(event) {
            let mut guard = self.writer.lock().await;
            if let Some(f) = guard.as_mut() {
                let _ = f.write_all(json.as_bytes()).await;
                let _ = f.write_all(b"\n").await;
            }
        }
    }
    async fn flush(&self) {
        let mut guard = self.writer.lock().await;
        if let Some(f) = guard.as_mut() {
            let _ = f.flush().await;
            let _ = f.sync_all().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::dispatcher::meta;
    use crate::events::model::SystemEvent;

    fn system_event(action: &str) -> LogEvent {
        LogEvent::System(SystemEvent {
            meta: meta("test", LogLevel::Info),
            action: action.to_string(),
            detail: Some("x".repeat(64)),
        })
    }

    #[tokio::test]
    async fn json_sink_writes_one_line_per_event() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("events.jsonl");
        let sink = JsonFileSink::new(&path, false, 1024, 2).await.unwrap();
        sink.handle(&system_event("first")).await;
        sink.handle(&system_event("second")).await;
        sink.flush().await;
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let v: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(v["type"], "system");
        assert_eq!(v["action"], "second");
    }

    #[tokio::test]
    async fn json_sink_rotates_when_size_exceeded() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("events.jsonl");
        let sink = JsonFileSink::new(&path, true, 64, 2).await.unwrap();
        for i in 0..4 {
            sink.handle(&system_event(&format!("evt-{}", i))).await;
        }
        sink.flush().await;
        assert!(path.with_extension("jsonl.1").exists());
        assert!(path.exists());
    }
}
