use crate::types::Frame;
use anyhow::{Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::path::PathBuf;
use tracing::info;

const CLIP_FPS: u64 = 30;

/// Drives an `appsrc ! x264enc ! mp4mux ! filesink` pipeline, written to
/// incrementally as the Event Recorder pushes annotated frames. Mirrors the
/// encoding pipeline the source builds per-clip in `save_clip`, adapted to be
/// fed frame-by-frame instead of from a pre-extracted buffer.
pub struct ClipWriter {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    frame_index: u64,
    path: PathBuf,
}

impl ClipWriter {
    pub fn start(width: u32, height: u32, filename: &str) -> Result<Self> {
        gst::init().ok();

        let dir = clip_directory();
        std::fs::create_dir_all(&dir).context("failed to create clip output directory")?;
        let path = dir.join(filename);

        let pipeline_str = format!(
            "appsrc name=src is-live=true format=time caps=video/x-raw,format=RGB,width={},height={},framerate={}/1 ! \
             videoconvert ! \
             x264enc speed-preset=ultrafast tune=zerolatency ! \
             mp4mux ! \
             filesink location={}",
            width,
            height,
            CLIP_FPS,
            path.to_string_lossy()
        );

        let pipeline = gst::parse::launch(&pipeline_str)
            .context("failed to create clip encoding pipeline")?
            .downcast::<gst::Pipeline>()
            .map_err(|_| anyhow::anyhow!("expected a pipeline"))?;

        let appsrc = pipeline
            .by_name("src")
            .context("no appsrc in clip pipeline")?
            .dynamic_cast::<gst_app::AppSrc>()
            .map_err(|_| anyhow::anyhow!("src element is not an appsrc"))?;

        pipeline.set_state(gst::State::Playing).context("failed to start clip pipeline")?;
        info!("clip writer started: {}", path.display());

        Ok(Self { pipeline, appsrc, frame_index: 0, path })
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let mut buffer = gst::Buffer::from_mut_slice(frame.data.clone());
        {
            let buffer_ref = buffer.get_mut().context("unexpectedly shared buffer")?;
            let pts = gst::ClockTime::from_nseconds((self.frame_index * 1_000_000_000) / CLIP_FPS);
            buffer_ref.set_pts(Some(pts));
            buffer_ref.set_duration(Some(gst::ClockTime::from_nseconds(1_000_000_000 / CLIP_FPS)));
        }
        self.appsrc.push_buffer(buffer).map_err(|e| anyhow::anyhow!("broken pipe: {e:?}"))?;
        self.frame_index += 1;
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        self.appsrc.end_of_stream().ok();
        if let Some(bus) = self.pipeline.bus() {
            for msg in bus.iter_timed(gst::ClockTime::from_seconds(10)) {
                use gst::MessageView;
                match msg.view() {
                    MessageView::Eos(..) => break,
                    MessageView::Error(err) => {
                        self.pipeline.set_state(gst::State::Null).ok();
                        anyhow::bail!("clip encoding error: {}", err.error());
                    }
                    _ => {}
                }
            }
        }
        self.pipeline.set_state(gst::State::Null).ok();
        info!("clip writer finished: {}", self.path.display());
        Ok(())
    }
}

fn clip_directory() -> PathBuf {
    PathBuf::from(std::env::var("STATIC_DIR").unwrap_or_else(|_| "static".to_string())).join("unsafe")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_directory_defaults_under_static() {
        std::env::remove_var("STATIC_DIR");
        assert_eq!(clip_directory(), PathBuf::from("static/unsafe"));
    }
}
