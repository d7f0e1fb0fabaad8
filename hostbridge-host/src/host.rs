//! Desktop stand-in for the host runtime: executes HostInstructions against the shared manager.
//!
//! Listeners, decoders and savers run as tokio tasks and call back into the
//! manager chunk by chunk, the way browser callbacks would.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use hostbridge_core::chunk::split_into_chunks;
use hostbridge_core::session::DECODE_FAILED_DIMENSIONS;
use hostbridge_core::{DecodeId, HostInstruction, TransferError, TransferManager};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::HostConfig;
use crate::ppm;

/// Manager shared between the native side and host tasks.
pub type SharedManager = Arc<Mutex<TransferManager>>;

pub struct DesktopHost {
    manager: SharedManager,
    chunk_size: usize,
    download_dir: PathBuf,
    /// Input element key -> channel of user selections.
    listeners: HashMap<String, mpsc::UnboundedSender<PathBuf>>,
    saved: Vec<PathBuf>,
}

impl DesktopHost {
    pub fn new(manager: SharedManager, config: &HostConfig) -> Self {
        Self {
            manager,
            chunk_size: config.chunk_size,
            download_dir: config.download_dir.clone(),
            listeners: HashMap::new(),
            saved: Vec::new(),
        }
    }

    pub async fn execute(&mut self, instr: HostInstruction) -> Result<()> {
        match instr {
            HostInstruction::InstallUploadListener { key } => {
                self.install_listener(key);
                Ok(())
            }
            HostInstruction::DecodeImage { id, input_len } => self.start_decode(id, input_len).await,
            HostInstruction::SaveFile { name, len } => self.save(&name, len).await,
        }
    }

    fn install_listener(&mut self, key: String) {
        if self.listeners.contains_key(&key) {
            warn!(%key, "listener already installed");
            return;
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();
        let manager = self.manager.clone();
        let chunk_size = self.chunk_size;
        let task_key = key.clone();
        tokio::spawn(async move {
            while let Some(path) = rx.recv().await {
                if let Err(e) = stream_file(&manager, &task_key, &path, chunk_size).await {
                    warn!(key = %task_key, path = %path.display(), error = %e, "upload failed");
                }
            }
        });
        info!(%key, "installed upload listener");
        self.listeners.insert(key, tx);
    }

    /// Simulate the user picking `path` on input element `key`.
    pub fn select_file(&self, key: &str, path: impl Into<PathBuf>) -> Result<()> {
        let tx = self
            .listeners
            .get(key)
            .ok_or_else(|| anyhow!("no listener installed for {key}"))?;
        tx.send(path.into())
            .map_err(|_| anyhow!("listener for {key} has stopped"))
    }

    async fn start_decode(&self, id: DecodeId, input_len: u64) -> Result<()> {
        // copy out while the view is still valid
        let input = {
            let m = self.manager.lock().await;
            m.decode_input(id)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| anyhow!("no pending input for {id}"))?
        };
        if input.len() as u64 != input_len {
            warn!(%id, expected = input_len, actual = input.len(), "decode input length differs");
        }
        let manager = self.manager.clone();
        let chunk_size = self.chunk_size;
        tokio::spawn(async move {
            if let Err(e) = decode_image(&manager, id, &input, chunk_size).await {
                warn!(%id, error = %e, "decode delivery failed");
            }
        });
        Ok(())
    }

    async fn save(&mut self, name: &str, len: u64) -> Result<()> {
        let bytes = self.manager.lock().await.outbound_view().to_vec();
        if bytes.len() as u64 != len {
            warn!(%name, expected = len, actual = bytes.len(), "outbound slot replaced before save");
        }
        let file_name = Path::new(name)
            .file_name()
            .ok_or_else(|| anyhow!("invalid download name {name:?}"))?;
        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .with_context(|| format!("creating {}", self.download_dir.display()))?;
        let path = self.download_dir.join(file_name);
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), len = bytes.len(), "saved download");
        self.saved.push(path);
        Ok(())
    }

    /// Paths written by SaveFile instructions, oldest first.
    pub fn saved_files(&self) -> &[PathBuf] {
        &self.saved
    }
}

async fn stream_file(manager: &SharedManager, key: &str, path: &Path, chunk_size: usize) -> Result<()> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    deliver_upload(manager, key, &name, &data, chunk_size).await
}

/// Write `data` as upload chunks for `key`, then finish with `name`.
pub async fn deliver_upload(
    manager: &SharedManager,
    key: &str,
    name: &str,
    data: &[u8],
    chunk_size: usize,
) -> Result<()> {
    for r in split_into_chunks(data.len(), chunk_size) {
        manager
            .lock()
            .await
            .upload_write_chunk(key, &data[r.start..r.end], r.start, r.end)?;
        tokio::task::yield_now().await;
    }
    manager.lock().await.upload_finish(key, name)?;
    debug!(%key, %name, len = data.len(), "upload delivered");
    Ok(())
}

/// Decode `input` and deliver the pixels for `id`. Every path ends in `decode_finish`,
/// with the failure sentinel when decoding or delivery goes wrong.
async fn decode_image(manager: &SharedManager, id: DecodeId, input: &[u8], chunk_size: usize) -> Result<()> {
    let img = match ppm::decode(input) {
        Ok(img) => img,
        Err(e) => {
            warn!(%id, error = %e, "failed to decode image");
            return report_decode_failure(manager, id).await;
        }
    };
    let (Ok(width), Ok(height)) = (i32::try_from(img.width), i32::try_from(img.height)) else {
        warn!(%id, width = img.width, height = img.height, "image dimensions out of range");
        return report_decode_failure(manager, id).await;
    };
    for r in split_into_chunks(img.pixels.len(), chunk_size) {
        let written = manager
            .lock()
            .await
            .decode_write_chunk(id, &img.pixels[r.start..r.end], r.start, r.end);
        if let Err(e) = written {
            warn!(%id, start = r.start, end = r.end, error = %e, "pixel delivery failed");
            return report_decode_failure(manager, id).await;
        }
        tokio::task::yield_now().await;
    }
    manager.lock().await.decode_finish(id, width, height)?;
    debug!(%id, width, height, "decode delivered");
    Ok(())
}

async fn report_decode_failure(manager: &SharedManager, id: DecodeId) -> Result<()> {
    let (width, height) = DECODE_FAILED_DIMENSIONS;
    manager.lock().await.decode_finish(id, width, height)?;
    Ok(())
}

/// Native-side polling: tick the manager and retry `f` every `poll_ms` while it
/// reports NotFound or NotReady.
pub async fn poll_until<T, F>(manager: &SharedManager, config: &HostConfig, mut f: F) -> Result<T>
where
    F: FnMut(&mut TransferManager) -> Result<T, TransferError>,
{
    let mut interval = tokio::time::interval(Duration::from_millis(config.poll_ms.max(1)));
    for _ in 0..config.max_polls {
        interval.tick().await;
        let mut m = manager.lock().await;
        m.tick();
        match f(&mut *m) {
            Ok(v) => return Ok(v),
            Err(TransferError::NotFound | TransferError::NotReady) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    bail!("transfer did not complete after {} polls", config.max_polls)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(tag: &str) -> HostConfig {
        HostConfig {
            chunk_size: 3,
            poll_ms: 1,
            max_polls: 2000,
            download_dir: scratch_dir(tag),
            ..HostConfig::default()
        }
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("hostbridge-{}-{}", std::process::id(), tag));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn shared(config: &HostConfig) -> SharedManager {
        Arc::new(Mutex::new(TransferManager::with_config(config.core.clone())))
    }

    #[tokio::test]
    async fn upload_via_listener() {
        let config = test_config("upload");
        let path = config.download_dir.join("input.txt");
        std::fs::write(&path, b"hello, chunked world").unwrap();

        let manager = shared(&config);
        let mut host = DesktopHost::new(manager.clone(), &config);
        let instr = manager.lock().await.upload_start("file-input").unwrap();
        host.execute(instr).await.unwrap();
        assert!(manager.lock().await.upload_start("file-input").is_none());

        host.select_file("file-input", &path).unwrap();
        let file = poll_until(&manager, &config, |m| m.take_upload("file-input"))
            .await
            .unwrap();
        assert_eq!(file.file_name, "input.txt");
        assert_eq!(file.data, b"hello, chunked world");
    }

    #[tokio::test]
    async fn select_without_listener_fails() {
        let config = test_config("nolistener");
        let host = DesktopHost::new(shared(&config), &config);
        assert!(host.select_file("missing", "/dev/null").is_err());
    }

    #[tokio::test]
    async fn decode_ppm() {
        let config = test_config("decode");
        let manager = shared(&config);
        let mut host = DesktopHost::new(manager.clone(), &config);

        let input = ppm::encode(2, 2, &[10, 20, 30, 40, 50, 60, 70, 80, 90, 100, 110, 120]);
        let (id, instr) = manager.lock().await.decode_enqueue(input).unwrap();
        host.execute(instr).await.unwrap();
        let img = poll_until(&manager, &config, |m| m.take_decoded(id))
            .await
            .unwrap();
        assert_eq!((img.width, img.height), (2, 2));
        assert_eq!(&img.pixels[..8], &[10, 20, 30, 255, 40, 50, 60, 255]);
        assert_eq!(img.pixels.len(), 16);
    }

    #[tokio::test]
    async fn undecodable_input_reports_failure() {
        let config = test_config("badimage");
        let manager = shared(&config);
        let mut host = DesktopHost::new(manager.clone(), &config);

        let (id, instr) = manager.lock().await.decode_enqueue(b"not an image".to_vec()).unwrap();
        host.execute(instr).await.unwrap();
        let err = poll_until(&manager, &config, |m| m.take_decoded(id))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<TransferError>(),
            Some(&TransferError::DecodeFailed)
        );
        assert_eq!(manager.lock().await.session_count(), 0);
    }

    #[tokio::test]
    async fn pixels_over_payload_limit_report_failure() {
        let mut config = test_config("overlimit");
        config.core.max_payload_len = 8;
        let manager = shared(&config);
        let mut host = DesktopHost::new(manager.clone(), &config);

        // 2x2 RGBA is 16 bytes, over the 8-byte limit
        let input = ppm::encode(2, 2, &[0; 12]);
        let (id, instr) = manager.lock().await.decode_enqueue(input).unwrap();
        host.execute(instr).await.unwrap();
        let err = poll_until(&manager, &config, |m| m.take_decoded(id))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<TransferError>(),
            Some(&TransferError::DecodeFailed)
        );
        assert_eq!(manager.lock().await.session_count(), 0);
    }

    #[tokio::test]
    async fn save_writes_outbound_slot() {
        let config = test_config("save");
        let manager = shared(&config);
        let mut host = DesktopHost::new(manager.clone(), &config);

        let instr = manager.lock().await.download_trigger("../planet.json", b"{}");
        host.execute(instr).await.unwrap();
        let saved = host.saved_files().to_vec();
        assert_eq!(saved, vec![config.download_dir.join("planet.json")]);
        assert_eq!(std::fs::read(&saved[0]).unwrap(), b"{}");
    }

    #[tokio::test]
    async fn second_trigger_before_save_wins() {
        let config = test_config("overwrite");
        let manager = shared(&config);
        let mut host = DesktopHost::new(manager.clone(), &config);

        let first = manager.lock().await.download_trigger("a.bin", b"aaaa");
        manager.lock().await.download_trigger("b.bin", b"bb");
        host.execute(first).await.unwrap();
        // the first instruction now saves whatever the slot holds
        assert_eq!(std::fs::read(config.download_dir.join("a.bin")).unwrap(), b"bb");
    }
}
