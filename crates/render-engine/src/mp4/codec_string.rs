//! Codec strings derived from sample entries, in the form browsers accept.

use subforge_common::error::{SubforgeError, SubforgeResult};

use super::boxes::{fourcc_str, ByteReader, FourCc};

/// `avc1.PPCCLL` from an avcC record.
pub fn avc(fourcc: &FourCc, avcc: &[u8]) -> SubforgeResult<String> {
    if avcc.len() < 4 {
        return Err(SubforgeError::demux("avcC record is too short"));
    }
    Ok(format!(
        "{}.{:02X}{:02X}{:02X}",
        fourcc_str(fourcc),
        avcc[1],
        avcc[2],
        avcc[3]
    ))
}

/// `hvc1.<space><profile>.<compat>.<tier><level>.<constraints>` from an hvcC record.
pub fn hevc(fourcc: &FourCc, hvcc: &[u8]) -> SubforgeResult<String> {
    if hvcc.len() < 13 {
        return Err(SubforgeError::demux("hvcC record is too short"));
    }
    let space = match hvcc[1] >> 6 {
        1 => "A",
        2 => "B",
        3 => "C",
        _ => "",
    };
    let tier = if hvcc[1] & 0x20 != 0 { 'H' } else { 'L' };
    let profile = hvcc[1] & 0x1F;
    let compat = u32::from_be_bytes([hvcc[2], hvcc[3], hvcc[4], hvcc[5]]).reverse_bits();
    let level = hvcc[12];

    let mut constraints: Vec<u8> = hvcc[6..12].to_vec();
    while constraints.last() == Some(&0) {
        constraints.pop();
    }

    let mut out = format!(
        "{}.{space}{profile}.{compat:X}.{tier}{level}",
        fourcc_str(fourcc)
    );
    for byte in constraints {
        out.push_str(&format!(".{byte:X}"));
    }
    Ok(out)
}

/// `vp09.PP.LL.DD` from a vpcC full-box payload.
pub fn vp9(vpcc: &[u8]) -> SubforgeResult<String> {
    let mut r = ByteReader::new(vpcc);
    r.full_box_header()?;
    let profile = r.u8()?;
    let level = r.u8()?;
    let bit_depth = r.u8()? >> 4;
    Ok(format!("vp09.{profile:02}.{level:02}.{bit_depth:02}"))
}

/// `av01.P.LLT.DD` from an av1C record.
pub fn av1(av1c: &[u8]) -> SubforgeResult<String> {
    if av1c.len() < 3 {
        return Err(SubforgeError::demux("av1C record is too short"));
    }
    let profile = av1c[1] >> 5;
    let level = av1c[1] & 0x1F;
    let tier = if av1c[2] & 0x80 != 0 { 'H' } else { 'M' };
    let high_bitdepth = av1c[2] & 0x40 != 0;
    let twelve_bit = av1c[2] & 0x20 != 0;
    let bit_depth = match (high_bitdepth, twelve_bit) {
        (true, true) => 12,
        (true, false) => 10,
        _ => 8,
    };
    Ok(format!("av01.{profile}.{level:02}{tier}.{bit_depth:02}"))
}

/// Parsed pieces of an esds box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsDescriptor {
    pub object_type: u8,
    /// DecoderSpecificInfo, e.g. the AAC AudioSpecificConfig.
    pub specific_info: Vec<u8>,
}

impl EsDescriptor {
    /// `mp4a.40.<aot>` for MPEG-4 audio, `mp4a.<oti>` otherwise.
    pub fn codec_string(&self) -> String {
        if self.object_type == 0x40 {
            if let Some(first) = self.specific_info.first() {
                let mut aot = first >> 3;
                if aot == 31 && self.specific_info.len() > 1 {
                    aot = 32 + (((first & 0x07) << 3) | (self.specific_info[1] >> 5));
                }
                return format!("mp4a.40.{aot}");
            }
        }
        format!("mp4a.{:02x}", self.object_type)
    }
}

fn descriptor_len(r: &mut ByteReader<'_>) -> SubforgeResult<usize> {
    let mut len = 0usize;
    for _ in 0..4 {
        let b = r.u8()?;
        len = (len << 7) | (b & 0x7F) as usize;
        if b & 0x80 == 0 {
            break;
        }
    }
    Ok(len)
}

/// Parse an esds full-box payload.
pub fn parse_esds(esds: &[u8]) -> SubforgeResult<EsDescriptor> {
    let mut r = ByteReader::new(esds);
    r.full_box_header()?;

    if r.u8()? != 0x03 {
        return Err(SubforgeError::demux("esds is missing its ES descriptor"));
    }
    descriptor_len(&mut r)?;
    r.skip(2)?;
    let flags = r.u8()?;
    if flags & 0x80 != 0 {
        r.skip(2)?;
    }
    if flags & 0x40 != 0 {
        let url_len = r.u8()? as usize;
        r.skip(url_len)?;
    }
    if flags & 0x20 != 0 {
        r.skip(2)?;
    }

    if r.u8()? != 0x04 {
        return Err(SubforgeError::demux("esds is missing its decoder config"));
    }
    descriptor_len(&mut r)?;
    let object_type = r.u8()?;
    r.skip(12)?;

    let mut specific_info = Vec::new();
    if r.remaining() > 0 && r.u8()? == 0x05 {
        let len = descriptor_len(&mut r)?;
        specific_info = r.bytes(len)?.to_vec();
    }

    Ok(EsDescriptor {
        object_type,
        specific_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avc_string() {
        let avcc = [1, 0x64, 0x00, 0x1F, 0xFF];
        assert_eq!(avc(b"avc1", &avcc).unwrap(), "avc1.64001F");
        assert!(avc(b"avc1", &[1, 2]).is_err());
    }

    #[test]
    fn test_hevc_string() {
        // Main profile, level 3.1, progressive+frame-only constraint flags.
        let mut hvcc = vec![1, 0x01, 0x60, 0, 0, 0, 0x90, 0, 0, 0, 0, 0, 93];
        hvcc.extend_from_slice(&[0; 10]);
        assert_eq!(hevc(b"hvc1", &hvcc).unwrap(), "hvc1.1.6.L93.90");
    }

    #[test]
    fn test_vp9_and_av1_strings() {
        assert_eq!(vp9(&[1, 0, 0, 0, 0, 31, 0x80, 0]).unwrap(), "vp09.00.31.08");
        assert_eq!(av1(&[0x81, 0x08, 0x0C, 0]).unwrap(), "av01.0.08M.08");
        assert_eq!(av1(&[0x81, 0x2D, 0xC0, 0]).unwrap(), "av01.1.13H.10");
    }

    #[test]
    fn test_esds_aac_lc() {
        let esds = [
            0, 0, 0, 0, // version/flags
            0x03, 25, 0, 1, 0, // ES descriptor
            0x04, 17, 0x40, 0x15, 0, 0, 0, 0, 1, 0xF4, 0, 0, 1, 0xF4, 0, // decoder config
            0x05, 2, 0x12, 0x10, // AudioSpecificConfig: AAC-LC 44.1k stereo
            0x06, 1, 2,
        ];
        let desc = parse_esds(&esds).unwrap();
        assert_eq!(desc.object_type, 0x40);
        assert_eq!(desc.specific_info, vec![0x12, 0x10]);
        assert_eq!(desc.codec_string(), "mp4a.40.2");
    }
}
