use std::io::Cursor;

use image::{DynamicImage, ImageFormat, ImageReader, imageops::FilterType};
use serde::{Deserialize, Serialize};

use crate::{
    diagnostic::{DiagnosticCode, Diagnostics, EntityRef},
    document::{AssetDocument, decode_data_uri, schema::SamplerDescriptor},
    settings::TextureSettings,
};

/// Interpolation method used for texture resizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResizeInterpolation {
    /// Fast nearest-neighbor interpolation.
    Nearest,
    /// Bilinear interpolation (`image`'s `Triangle` filter).
    #[default]
    Bilinear,
    /// Bicubic interpolation (`image`'s `CatmullRom` filter).
    Bicubic,
    Gaussian,
    /// Lanczos (windowed sinc) interpolation.
    Lanczos3,
}

impl From<ResizeInterpolation> for FilterType {
    fn from(value: ResizeInterpolation) -> Self {
        match value {
            ResizeInterpolation::Nearest => FilterType::Nearest,
            ResizeInterpolation::Bilinear => FilterType::Triangle,
            ResizeInterpolation::Bicubic => FilterType::CatmullRom,
            ResizeInterpolation::Gaussian => FilterType::Gaussian,
            ResizeInterpolation::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Shrink `image` so its longer edge is at most `max_edge`, keeping the
/// aspect ratio. Smaller images are returned unchanged; nothing is upscaled.
pub fn fit_within(
    image: &DynamicImage,
    max_edge: u32,
    interpolation: ResizeInterpolation,
) -> Option<DynamicImage> {
    if image.width() <= max_edge && image.height() <= max_edge {
        return None;
    }
    Some(image.resize(max_edge, max_edge, interpolation.into()))
}

// ─── Images ───────────────────────────────────────────────────────────────────

/// One source image. `data` holds the encoded bytes; `dimensions` is `None`
/// when the bytes could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAsset {
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
    pub dimensions: Option<(u32, u32)>,
    pub resized: bool,
}

impl ImageAsset {
    pub fn is_decodable(&self) -> bool {
        self.dimensions.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WrapMode {
    ClampToEdge,
    MirroredRepeat,
    #[default]
    Repeat,
}

impl WrapMode {
    fn from_gl(value: u32) -> Self {
        match value {
            33071 => WrapMode::ClampToEdge,
            33648 => WrapMode::MirroredRepeat,
            _ => WrapMode::Repeat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Sampler {
    pub mag_filter: Option<FilterMode>,
    pub min_filter: Option<FilterMode>,
    pub mipmap_filter: Option<FilterMode>,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
}

impl Sampler {
    fn from_descriptor(descriptor: &SamplerDescriptor) -> Self {
        let (min_filter, mipmap_filter) = match descriptor.min_filter {
            Some(9728) => (Some(FilterMode::Nearest), None),
            Some(9729) => (Some(FilterMode::Linear), None),
            Some(9984) => (Some(FilterMode::Nearest), Some(FilterMode::Nearest)),
            Some(9985) => (Some(FilterMode::Linear), Some(FilterMode::Nearest)),
            Some(9986) => (Some(FilterMode::Nearest), Some(FilterMode::Linear)),
            Some(9987) => (Some(FilterMode::Linear), Some(FilterMode::Linear)),
            _ => (None, None),
        };
        Self {
            mag_filter: match descriptor.mag_filter {
                Some(9728) => Some(FilterMode::Nearest),
                Some(9729) => Some(FilterMode::Linear),
                _ => None,
            },
            min_filter,
            mipmap_filter,
            wrap_s: WrapMode::from_gl(descriptor.wrap_s),
            wrap_t: WrapMode::from_gl(descriptor.wrap_t),
        }
    }
}

/// A texture pairs an image index with sampling state.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureAsset {
    pub name: Option<String>,
    pub image: Option<usize>,
    pub sampler: Sampler,
}

fn image_bytes(document: &AssetDocument<'_>, index: usize) -> Result<Vec<u8>, String> {
    let descriptor = &document.images[index];
    if let Some(view_index) = descriptor.buffer_view {
        let view = &document.buffer_views[view_index];
        let buffer = document
            .buffer_data
            .get(view.buffer)
            .map_err(|error| error.to_string())?;
        return buffer
            .get(view.byte_offset..view.byte_offset + view.byte_length)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| format!("buffer view {view_index} lies outside its buffer"));
    }
    match descriptor.uri.as_deref() {
        Some(uri) => decode_data_uri(uri)?
            .ok_or_else(|| format!("external image '{uri}' is not embedded")),
        None => Err("image has neither a buffer view nor a uri".to_string()),
    }
}

fn guess_format(data: &[u8], mime_type: Option<&str>) -> Option<ImageFormat> {
    mime_type
        .and_then(ImageFormat::from_mime_type)
        .or_else(|| image::guess_format(data).ok())
}

fn reencode(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, image::ImageError> {
    // The JPEG encoder has no alpha channel.
    let image = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => image.clone(),
    };
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format)?;
    Ok(out.into_inner())
}

fn load_image(
    document: &AssetDocument<'_>,
    index: usize,
    settings: &TextureSettings,
    diagnostics: &mut Diagnostics,
) -> ImageAsset {
    let descriptor = &document.images[index];
    let mut asset = ImageAsset {
        name: descriptor.name.clone(),
        mime_type: descriptor.mime_type.clone(),
        data: Vec::new(),
        dimensions: None,
        resized: false,
    };

    match image_bytes(document, index) {
        Ok(data) => asset.data = data,
        Err(reason) => {
            diagnostics.warn(DiagnosticCode::UndecodableImage, EntityRef::Image(index), reason);
            return asset;
        }
    }

    let Some(format) = guess_format(&asset.data, asset.mime_type.as_deref()) else {
        diagnostics.warn(
            DiagnosticCode::UndecodableImage,
            EntityRef::Image(index),
            "unrecognized image format",
        );
        return asset;
    };
    if asset.mime_type.is_none() {
        asset.mime_type = Some(format.to_mime_type().to_string());
    }

    let reader = ImageReader::with_format(Cursor::new(asset.data.as_slice()), format);
    let Some(max_edge) = settings.max_size else {
        match reader.into_dimensions() {
            Ok(dimensions) => asset.dimensions = Some(dimensions),
            Err(error) => diagnostics.warn(
                DiagnosticCode::UndecodableImage,
                EntityRef::Image(index),
                error.to_string(),
            ),
        }
        return asset;
    };

    let decoded = match reader.decode() {
        Ok(decoded) => decoded,
        Err(error) => {
            diagnostics.warn(
                DiagnosticCode::UndecodableImage,
                EntityRef::Image(index),
                error.to_string(),
            );
            return asset;
        }
    };
    asset.dimensions = Some((decoded.width(), decoded.height()));

    if let Some(resized) = fit_within(&decoded, max_edge.max(1), settings.resize_method) {
        match reencode(&resized, format) {
            Ok(data) => {
                diagnostics.info(
                    DiagnosticCode::TextureResized,
                    EntityRef::Image(index),
                    format!(
                        "resized from {}x{} to {}x{}",
                        decoded.width(),
                        decoded.height(),
                        resized.width(),
                        resized.height()
                    ),
                );
                asset.data = data;
                asset.dimensions = Some((resized.width(), resized.height()));
                asset.resized = true;
            }
            Err(error) => log::warn!("image {index}: keeping source size, re-encoding failed: {error}"),
        }
    }
    asset
}

/// Decode every image, then resolve textures onto them. Failures are
/// reported per image and never abort the import.
pub fn assemble_textures(
    document: &AssetDocument<'_>,
    settings: &TextureSettings,
    diagnostics: &mut Diagnostics,
) -> (Vec<ImageAsset>, Vec<TextureAsset>) {
    let images: Vec<ImageAsset> = (0..document.images.len())
        .map(|index| load_image(document, index, settings, diagnostics))
        .collect();

    let textures = document
        .textures
        .iter()
        .map(|texture| {
            // EXT_texture_webp and KHR_texture_basisu carry the source in the extension.
            let image = texture.source.or_else(|| {
                texture
                    .extensions
                    .values()
                    .find_map(|extension| extension.get("source")?.as_u64())
                    .and_then(|source| usize::try_from(source).ok())
                    .filter(|&source| source < images.len())
            });
            TextureAsset {
                name: texture.name.clone(),
                image,
                sampler: texture
                    .sampler
                    .and_then(|sampler| document.samplers.get(sampler))
                    .map(Sampler::from_descriptor)
                    .unwrap_or_default(),
            }
        })
        .collect();

    (images, textures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::test_support::parse_json_with;
    use image::{GenericImageView, RgbaImage};
    use serde_json::json;

    fn png(width: u32, height: u32) -> &'static [u8] {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(RgbaImage::new(width, height))
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode png");
        Box::leak(out.into_inner().into_boxed_slice())
    }

    fn document_with_image(bin: &'static [u8], diagnostics: &mut Diagnostics) -> AssetDocument<'static> {
        parse_json_with(
            json!({
                "asset": { "version": "2.0" },
                "buffers": [{ "byteLength": bin.len() }],
                "bufferViews": [{ "buffer": 0, "byteLength": bin.len() }],
                "images": [{ "bufferView": 0, "mimeType": "image/png" }],
                "samplers": [{ "magFilter": 9728, "minFilter": 9987, "wrapS": 33071 }],
                "textures": [{ "source": 0, "sampler": 0 }]
            }),
            bin,
            diagnostics,
        )
        .expect("parse document")
    }

    #[test]
    fn given_large_texture_when_fitting_with_lanczos_then_image_fits_bounds() {
        let source = DynamicImage::ImageRgba8(RgbaImage::new(2048, 1024));

        let resized = fit_within(&source, 1024, ResizeInterpolation::Lanczos3).expect("resized");

        assert_eq!(resized.dimensions(), (1024, 512));
    }

    #[test]
    fn given_small_texture_when_fitting_then_nothing_is_resized() {
        let source = DynamicImage::ImageRgba8(RgbaImage::new(512, 512));

        assert!(fit_within(&source, 1024, ResizeInterpolation::Bilinear).is_none());
    }

    #[test]
    fn given_interpolation_enum_when_converting_then_filter_type_matches() {
        assert_eq!(FilterType::from(ResizeInterpolation::Nearest), FilterType::Nearest);
        assert_eq!(FilterType::from(ResizeInterpolation::Bilinear), FilterType::Triangle);
        assert_eq!(FilterType::from(ResizeInterpolation::Bicubic), FilterType::CatmullRom);
        assert_eq!(FilterType::from(ResizeInterpolation::Gaussian), FilterType::Gaussian);
        assert_eq!(FilterType::from(ResizeInterpolation::Lanczos3), FilterType::Lanczos3);
    }

    #[test]
    fn given_embedded_png_when_assembling_then_dimensions_and_sampler_are_read() {
        let mut diagnostics = Diagnostics::new();
        let document = document_with_image(png(8, 4), &mut diagnostics);

        let (images, textures) =
            assemble_textures(&document, &TextureSettings::default(), &mut diagnostics);

        assert_eq!(images[0].dimensions, Some((8, 4)));
        assert!(!images[0].resized);
        assert_eq!(textures[0].image, Some(0));
        assert_eq!(textures[0].sampler.mag_filter, Some(FilterMode::Nearest));
        assert_eq!(textures[0].sampler.mipmap_filter, Some(FilterMode::Linear));
        assert_eq!(textures[0].sampler.wrap_s, WrapMode::ClampToEdge);
        assert_eq!(textures[0].sampler.wrap_t, WrapMode::Repeat);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn given_max_size_when_assembling_large_png_then_it_is_reencoded_smaller() {
        let mut diagnostics = Diagnostics::new();
        let document = document_with_image(png(64, 32), &mut diagnostics);
        let settings = TextureSettings {
            max_size: Some(16),
            resize_method: ResizeInterpolation::Nearest,
        };

        let (images, _) = assemble_textures(&document, &settings, &mut diagnostics);

        assert!(images[0].resized);
        assert_eq!(images[0].dimensions, Some((16, 8)));
        let reread = image::load_from_memory(&images[0].data).expect("decode resized");
        assert_eq!(reread.dimensions(), (16, 8));
        assert!(diagnostics.contains(DiagnosticCode::TextureResized));
    }

    #[test]
    fn given_garbage_bytes_when_assembling_then_image_is_undecodable_with_warning() {
        static GARBAGE: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
        let mut diagnostics = Diagnostics::new();
        let document = document_with_image(&GARBAGE, &mut diagnostics);

        let (images, _) = assemble_textures(&document, &TextureSettings::default(), &mut diagnostics);

        assert!(!images[0].is_decodable());
        assert_eq!(images[0].data, GARBAGE.to_vec());
        assert!(diagnostics.contains(DiagnosticCode::UndecodableImage));
    }
}
