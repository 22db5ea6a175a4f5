pub mod check;
pub mod cues;
pub mod probe;
pub mod render;
pub mod validate;

use std::sync::Arc;

use subforge_render_engine::CodecPlatform;

/// The codec platform compiled into this build.
#[cfg(feature = "gstreamer")]
pub fn codec_platform() -> anyhow::Result<Arc<dyn CodecPlatform>> {
    let platform = subforge_render_engine::platform::GstPlatform::new()
        .map_err(|e| anyhow::anyhow!("GStreamer is not usable: {e}"))?;
    Ok(Arc::new(platform))
}

/// The codec platform compiled into this build.
#[cfg(not(feature = "gstreamer"))]
pub fn codec_platform() -> anyhow::Result<Arc<dyn CodecPlatform>> {
    Err(anyhow::anyhow!(
        "This build has no codec platform. Rebuild with `--features gstreamer`."
    ))
}
