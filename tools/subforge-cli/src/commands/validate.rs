//! Check codec support for a video without rendering it.

use std::path::PathBuf;
use std::sync::Arc;

use subforge_common::config::AppConfig;
use subforge_render_engine::overlay::SystemFontFactory;
use subforge_render_engine::RenderPipeline;

pub async fn run(config: &AppConfig, video: PathBuf) -> anyhow::Result<()> {
    println!("Validating video at: {}", video.display());

    let platform = super::codec_platform()?;
    println!("  Codec platform: {}", platform.name());
    let pipeline = RenderPipeline::new(
        platform,
        Arc::new(SystemFontFactory::new(config.fonts.clone())),
        config.render.clone(),
    );

    let report = pipeline
        .validate(&video)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read video: {e}"))?;

    println!("  Codec: {}", report.source_codec);
    println!("  Resolution: {}x{}", report.width, report.height);
    let mark = |ok: bool| if ok { "OK" } else { "NO" };
    println!("  [{}] Decoder", mark(report.decoder_supported));
    println!("  [{}] Encoder (source codec)", mark(report.encoder_supported));

    if !report.decoder_supported {
        println!("\nThis video cannot be decoded here.");
    } else if !report.encoder_supported {
        println!("\nThe source codec cannot be encoded here; renders will fall back to H.264.");
    } else {
        println!("\nVideo can be rendered with its own codec.");
    }

    Ok(())
}
