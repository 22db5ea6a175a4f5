//! Check system capabilities.

use subforge_common::config::{config_file_path, AppConfig};
use subforge_render_engine::overlay::FontLibrary;
use subforge_render_engine::{CodecPlatform, VideoDecoderConfig, VideoEncoderConfig};

/// Codecs probed against the platform, as (label, codec string).
const PROBE_CODECS: &[(&str, &str)] = &[
    ("H.264", "avc1.640028"),
    ("H.265", "hvc1.1.6.L93.B0"),
    ("VP9", "vp09.00.31.08"),
    ("AV1", "av01.0.08M.08"),
];

async fn report_codecs(platform: &dyn CodecPlatform) {
    for (label, codec) in PROBE_CODECS {
        let decoder = VideoDecoderConfig {
            codec: codec.to_string(),
            coded_width: 1920,
            coded_height: 1080,
            description: None,
        };
        let encoder = VideoEncoderConfig {
            codec: codec.to_string(),
            width: 1920,
            height: 1080,
            bitrate: 8_000_000,
            framerate: Some(30.0),
        };
        let decode = platform.is_decoder_supported(&decoder).await;
        let encode = platform.is_encoder_supported(&encoder).await;
        let status = match (decode, encode) {
            (true, true) => "[OK]",
            (true, false) | (false, true) => "[PARTIAL]",
            (false, false) => "[MISSING]",
        };
        println!(
            "{status} {label}: decode {}, encode {}",
            if decode { "yes" } else { "no" },
            if encode { "yes" } else { "no" }
        );
    }
}

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Subforge System Check");
    println!("{}", "=".repeat(50));

    let path = config_file_path();
    if path.exists() {
        println!("[OK] Config: {}", path.display());
    } else {
        println!("[INFO] Config: defaults ({} not found)", path.display());
    }

    let mut ready = true;
    match super::codec_platform() {
        Ok(platform) => {
            println!("[OK] Codec platform: {}", platform.name());
            report_codecs(platform.as_ref()).await;
        }
        Err(e) => {
            ready = false;
            println!("[MISSING] Codec platform: {e}");
        }
    }

    let fonts = FontLibrary::new(&config.fonts);
    if fonts.face_count() == 0 {
        ready = false;
        println!("[MISSING] Fonts: no font faces found");
    } else {
        let families = fonts.families();
        println!(
            "[OK] Fonts: {} faces in {} families",
            fonts.face_count(),
            families.len()
        );
    }
    for dir in &config.fonts.dirs {
        if !dir.is_dir() {
            println!("[WARN] Font directory missing: {}", dir.display());
        }
    }

    println!();
    if ready {
        println!("Subforge is ready to render.");
    } else {
        println!("Some capabilities are missing. See above for fixes.");
    }

    Ok(())
}
