use crate::types::Frame;
use anyhow::{Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use tracing::{info, warn};

/// Republishes annotated frames to an RTMP endpoint for this stream. Owns a
/// single writer subprocess; on a broken pipe it tears the pipeline down and
/// transparently respawns a fresh one on the next write, continuing from the
/// next frame rather than propagating the error.
pub struct OutputSink {
    rtmp_url: String,
    width: u32,
    height: u32,
    inner: Option<Inner>,
}

struct Inner {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    frame_index: u64,
}

impl OutputSink {
    pub fn new(rtmp_server: &str, stream_id: &str, width: u32, height: u32) -> Self {
        Self { rtmp_url: format!("{rtmp_server}/{stream_id}"), width, height, inner: None }
    }

    pub fn publish(&mut self, frame: &Frame) {
        if self.inner.is_none() {
            match self.spawn() {
                Ok(inner) => self.inner = Some(inner),
                Err(e) => {
                    warn!("output sink: failed to (re)spawn pipeline: {:#}", e);
                    return;
                }
            }
        }

        let broken = {
            let inner = self.inner.as_mut().unwrap();
            inner.push(frame).is_err()
        };
        if broken {
            warn!("output sink: broken pipe, will respawn on next frame");
            self.teardown();
        }
    }

    fn spawn(&self) -> Result<Inner> {
        gst::init().ok();
        let pipeline_str = format!(
            "appsrc name=src is-live=true format=time caps=video/x-raw,format=RGB,width={},height={},framerate=30/1 ! \
             videoconvert ! x264enc speed-preset=ultrafast tune=zerolatency bitrate=2000 ! \
             flvmux streamable=true ! rtmpsink location=\"{}\" ",
            self.width, self.height, self.rtmp_url
        );

        let pipeline = gst::parse::launch(&pipeline_str)
            .context("failed to create output pipeline")?
            .downcast::<gst::Pipeline>()
            .map_err(|_| anyhow::anyhow!("expected a pipeline"))?;

        let appsrc = pipeline
            .by_name("src")
            .context("no appsrc in output pipeline")?
            .dynamic_cast::<gst_app::AppSrc>()
            .map_err(|_| anyhow::anyhow!("src element is not an appsrc"))?;

        pipeline.set_state(gst::State::Playing).context("failed to start output pipeline")?;
        info!("output sink publishing to {}", self.rtmp_url);

        Ok(Inner { pipeline, appsrc, frame_index: 0 })
    }

    fn teardown(&mut self) {
        if let Some(inner) = self.inner.take() {
            let _ = inner.pipeline.set_state(gst::State::Null);
        }
    }
}

impl Inner {
    fn push(&mut self, frame: &Frame) -> Result<()> {
        let mut buffer = gst::Buffer::from_mut_slice(frame.data.clone());
        {
            let buffer_ref = buffer.get_mut().context("unexpectedly shared buffer")?;
            let pts = gst::ClockTime::from_nseconds((self.frame_index * 1_000_000_000) / 30);
            buffer_ref.set_pts(Some(pts));
            buffer_ref.set_duration(Some(gst::ClockTime::from_nseconds(1_000_000_000 / 30)));
        }
        self.appsrc.push_buffer(buffer).map_err(|e| anyhow::anyhow!("broken pipe: {e:?}"))?;
        self.frame_index += 1;
        Ok(())
    }
}

impl Drop for OutputSink {
    fn drop(&mut self) {
        self.teardown();
    }
}
