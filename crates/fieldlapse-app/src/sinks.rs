//! Frame sinks bridging the replay driver to the PNG renderer.

use fieldlapse_core::{FrameSink, WorldSnapshot};
use fieldlapse_render::{RenderConfig, render_frame};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

/// Writes numbered PNG frames into a directory, ready for an external
/// encoder to pick up in order.
pub struct PngDirectorySink {
    dir: PathBuf,
    config: RenderConfig,
    next_index: usize,
    written: usize,
    failures: usize,
}

impl PngDirectorySink {
    /// Create the target directory and validate the render configuration.
    pub fn new(dir: PathBuf, config: RenderConfig) -> anyhow::Result<Self> {
        config.validate()?;
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            config,
            next_index: 0,
            written: 0,
            failures: 0,
        })
    }

    #[must_use]
    pub fn frames_written(&self) -> usize {
        self.written
    }

    #[must_use]
    pub fn failures(&self) -> usize {
        self.failures
    }
}

impl FrameSink for PngDirectorySink {
    fn on_frame(&mut self, snapshot: &WorldSnapshot, display_ts_ms: i64) {
        let index = self.next_index;
        self.next_index += 1;
        match render_frame(snapshot, &self.config) {
            Ok(bytes) => {
                let path = self.dir.join(format!("frame_{index:06}.png"));
                match fs::write(&path, bytes) {
                    Ok(()) => self.written += 1,
                    Err(err) => {
                        warn!(frame = index, ts = display_ts_ms, %err, "failed to write frame");
                        self.failures += 1;
                    }
                }
            }
            Err(err) => {
                warn!(frame = index, ts = display_ts_ms, %err, "failed to render frame");
                self.failures += 1;
            }
        }
    }
}

/// Streams concatenated PNG frames to a writer, typically stdout piped
/// into a video encoder.
pub struct PngStreamSink<W: Write> {
    out: W,
    config: RenderConfig,
    written: usize,
    failures: usize,
}

impl<W: Write> PngStreamSink<W> {
    pub fn new(out: W, config: RenderConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            out,
            config,
            written: 0,
            failures: 0,
        })
    }

    #[must_use]
    pub fn frames_written(&self) -> usize {
        self.written
    }

    #[must_use]
    pub fn failures(&self) -> usize {
        self.failures
    }
}

impl<W: Write> FrameSink for PngStreamSink<W> {
    fn on_frame(&mut self, snapshot: &WorldSnapshot, display_ts_ms: i64) {
        match render_frame(snapshot, &self.config) {
            Ok(bytes) => match self.out.write_all(&bytes) {
                Ok(()) => self.written += 1,
                Err(err) => {
                    warn!(ts = display_ts_ms, %err, "failed to stream frame");
                    self.failures += 1;
                }
            },
            Err(err) => {
                warn!(ts = display_ts_ms, %err, "failed to render frame");
                self.failures += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldlapse_render::Viewport;

    fn config() -> RenderConfig {
        RenderConfig {
            width: 64,
            height: 64,
            viewport: Viewport::new(0.0, 0.0, 1.0, 1.0).expect("viewport"),
        }
    }

    #[test]
    fn stream_sink_concatenates_png_frames() {
        let mut buffer = Vec::new();
        {
            let mut sink = PngStreamSink::new(&mut buffer, config()).expect("sink");
            sink.on_frame(&WorldSnapshot::default(), 1_000);
            sink.on_frame(&WorldSnapshot::default(), 2_000);
            assert_eq!(sink.frames_written(), 2);
            assert_eq!(sink.failures(), 0);
        }
        assert_eq!(&buffer[0..8], b"\x89PNG\r\n\x1a\n");
        // Two concatenated PNG signatures.
        let signature = b"\x89PNG\r\n\x1a\n";
        let count = buffer
            .windows(signature.len())
            .filter(|window| window == signature)
            .count();
        assert_eq!(count, 2);
    }

    #[test]
    fn directory_sink_numbers_frames_in_emission_order() {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "fieldlapse-sink-test-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        let mut sink = PngDirectorySink::new(dir.clone(), config()).expect("sink");
        sink.on_frame(&WorldSnapshot::default(), 1_000);
        sink.on_frame(&WorldSnapshot::default(), 2_000);
        assert_eq!(sink.frames_written(), 2);

        assert!(dir.join("frame_000000.png").exists());
        assert!(dir.join("frame_000001.png").exists());
        let _ = fs::remove_dir_all(dir);
    }
}
