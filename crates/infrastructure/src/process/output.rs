use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Where one output channel of a child goes. Every sink is optional and
/// independent of the others.
#[derive(Debug, Default, Clone)]
pub(crate) struct SinkConfig {
    pub buffer: bool,
    pub directory: Option<PathBuf>,
    pub mirror: bool,
}

pub(crate) struct Channel {
    label: &'static str,
    prefix: String,
    buffer: Option<Vec<u8>>,
    file_path: Option<PathBuf>,
    file: Option<File>,
    mirror: bool,
    partial: Vec<u8>,
}

impl Channel {
    pub fn new(label: &'static str, key: &str, config: &SinkConfig) -> Self {
        Self {
            label,
            prefix: key.to_string(),
            buffer: config.buffer.then(Vec::new),
            file_path: config
                .directory
                .as_deref()
                .map(|dir| dir.join(capture_file_name(key))),
            file: None,
            mirror: config.mirror,
            partial: Vec::new(),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Dispatches one chunk to every configured sink.
    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.extend_from_slice(data);
        }
        if self.mirror {
            self.mirror_lines(data);
        }
        if let Some(path) = self.file_path.as_deref() {
            if self.file.is_none() {
                self.file = Some(open_append(path).await?);
            }
            if let Some(file) = self.file.as_mut() {
                file.write_all(data).await?;
            }
        }
        Ok(())
    }

    /// Flushes the capture file and any unterminated mirrored line.
    pub async fn finish(&mut self) -> io::Result<()> {
        if self.mirror && !self.partial.is_empty() {
            let rest = std::mem::take(&mut self.partial);
            println!("{}: {}", self.prefix, String::from_utf8_lossy(&rest));
        }
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        Ok(())
    }

    pub fn contents(&self) -> String {
        self.buffer
            .as_deref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default()
    }

    fn mirror_lines(&mut self, data: &[u8]) {
        self.partial.extend_from_slice(data);
        while let Some(end) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=end).collect();
            println!(
                "{}: {}",
                self.prefix,
                String::from_utf8_lossy(&line[..line.len() - 1])
            );
        }
    }
}

/// One capture file per child, named after its key.
pub(crate) fn capture_file_name(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect()
}

async fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}
