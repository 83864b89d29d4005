use anyhow::{Result, anyhow};
use nokhwa::{Buffer, utils::FrameFormat};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use crate::types::Frame;

/// Converts a native camera buffer into an RGBA frame.
pub fn convert_camera_frame(buffer: &Buffer) -> Result<Frame> {
    let resolution = buffer.resolution();
    convert_raw(
        buffer.source_frame_format(),
        buffer.buffer(),
        resolution.width_x,
        resolution.height_y,
    )
}

pub fn convert_raw(format: FrameFormat, data: &[u8], width: u32, height: u32) -> Result<Frame> {
    let pixels = width as usize * height as usize;
    let rgba = match format {
        FrameFormat::NV12 => {
            require_len("NV12", data, pixels + pixels / 2)?;
            nv12(data, width, height)?
        }
        FrameFormat::YUYV => {
            require_len("YUYV", data, pixels * 2)?;
            yuyv(data, width, height)?
        }
        FrameFormat::MJPEG => mjpeg(data, pixels)?,
        FrameFormat::RAWRGB => {
            require_len("RGB", data, pixels * 3)?;
            packed_rgb(data, pixels, false)
        }
        FrameFormat::RAWBGR => {
            require_len("BGR", data, pixels * 3)?;
            packed_rgb(data, pixels, true)
        }
        FrameFormat::GRAY => {
            require_len("GRAY", data, pixels)?;
            gray(data, pixels)
        }
    };

    Ok(Frame::new(rgba, width, height))
}

fn require_len(format: &str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        return Err(anyhow!(
            "{format} buffer too small: got {}, expected {expected}",
            data.len()
        ));
    }
    Ok(())
}

fn nv12(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_len = width as usize * height as usize;
    let image = YuvBiPlanarImage {
        y_plane: &data[..y_len],
        y_stride: width,
        uv_plane: &data[y_len..y_len + y_len / 2],
        uv_stride: width,
        width,
        height,
    };

    let mut rgba = vec![0u8; y_len * 4];
    yuv_nv12_to_rgba(
        &image,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12 to RGBA failed: {err:?}"))?;
    Ok(rgba)
}

fn yuyv(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };

    let mut rgba = vec![0u8; width as usize * height as usize * 4];
    yuyv422_to_rgba(
        &packed,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV to RGBA failed: {err:?}"))?;
    Ok(rgba)
}

fn mjpeg(data: &[u8], pixels: usize) -> Result<Vec<u8>> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;

    // Some drivers report a resolution that differs from the encoded image.
    if rgba.len() != pixels * 4 {
        return Err(anyhow!(
            "MJPEG frame has {} bytes, expected {}",
            rgba.len(),
            pixels * 4
        ));
    }
    Ok(rgba)
}

fn packed_rgb(data: &[u8], pixels: usize, bgr: bool) -> Vec<u8> {
    let mut rgba = vec![255u8; pixels * 4];
    rgba.par_chunks_mut(4)
        .zip(data.par_chunks_exact(3))
        .for_each(|(dst, src)| {
            if bgr {
                dst[..3].copy_from_slice(&[src[2], src[1], src[0]]);
            } else {
                dst[..3].copy_from_slice(src);
            }
        });
    rgba
}

fn gray(data: &[u8], pixels: usize) -> Vec<u8> {
    let mut rgba = vec![255u8; pixels * 4];
    rgba.par_chunks_mut(4)
        .zip(data[..pixels].par_iter())
        .for_each(|(dst, &value)| dst[..3].fill(value));
    rgba
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_and_bgr_expand_to_opaque_rgba() {
        let rgb = convert_raw(FrameFormat::RAWRGB, &[1, 2, 3, 4, 5, 6], 2, 1).unwrap();
        assert_eq!(rgb.rgba, [1, 2, 3, 255, 4, 5, 6, 255]);

        let bgr = convert_raw(FrameFormat::RAWBGR, &[1, 2, 3, 4, 5, 6], 2, 1).unwrap();
        assert_eq!(bgr.rgba, [3, 2, 1, 255, 6, 5, 4, 255]);
        assert_eq!((bgr.width, bgr.height), (2, 1));
    }

    #[test]
    fn gray_replicates_channels() {
        let frame = convert_raw(FrameFormat::GRAY, &[7, 9], 1, 2).unwrap();
        assert_eq!(frame.rgba, [7, 7, 7, 255, 9, 9, 9, 255]);
    }

    fn assert_near(px: &[u8], expected: [u8; 3]) {
        for (got, want) in px[..3].iter().zip(expected) {
            assert!(
                got.abs_diff(want) <= 2,
                "pixel {px:?} not near {expected:?}"
            );
        }
        assert_eq!(px[3], 255);
    }

    #[test]
    fn nv12_neutral_chroma_gives_gray_levels() {
        // 2x2 luma plane, then one interleaved UV pair.
        let data = [16, 128, 200, 255, 128, 128];
        let frame = convert_raw(FrameFormat::NV12, &data, 2, 2).unwrap();

        assert_eq!(frame.rgba.len(), 16);
        assert_near(&frame.rgba[0..4], [16, 16, 16]);
        assert_near(&frame.rgba[4..8], [128, 128, 128]);
        assert_near(&frame.rgba[8..12], [200, 200, 200]);
        assert_near(&frame.rgba[12..16], [255, 255, 255]);
    }

    #[test]
    fn nv12_red_chroma_raises_red() {
        let data = [128, 128, 128, 128, 128, 200];
        let frame = convert_raw(FrameFormat::NV12, &data, 2, 2).unwrap();
        let px = &frame.rgba[0..4];
        assert!(px[0] > 200, "red too low in {px:?}");
        assert!(px[1] < 128, "green too high in {px:?}");
        assert!(px[2].abs_diff(128) <= 2, "blue moved in {px:?}");
    }

    #[test]
    fn yuyv_pairs_share_chroma() {
        // Y0 U Y1 V for a 2x1 image.
        let data = [64, 128, 220, 128];
        let frame = convert_raw(FrameFormat::YUYV, &data, 2, 1).unwrap();

        assert_eq!((frame.width, frame.height), (2, 1));
        assert_near(&frame.rgba[0..4], [64, 64, 64]);
        assert_near(&frame.rgba[4..8], [220, 220, 220]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(convert_raw(FrameFormat::RAWRGB, &[0; 5], 2, 1).is_err());
        assert!(convert_raw(FrameFormat::YUYV, &[0; 7], 2, 2).is_err());
        assert!(convert_raw(FrameFormat::NV12, &[0; 5], 2, 2).is_err());
    }
}
