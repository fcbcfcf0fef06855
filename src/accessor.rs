use nalgebra::Matrix4;

use crate::{
    diagnostic::EntityRef,
    document::{AssetDocument, schema::AccessorDescriptor},
    error::ImportError,
};

// ─── Accessor layout ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentType {
    I8,
    U8,
    I16,
    U16,
    U32,
    F32,
}

impl ComponentType {
    pub fn from_gl(value: u32) -> Option<Self> {
        match value {
            5120 => Some(ComponentType::I8),
            5121 => Some(ComponentType::U8),
            5122 => Some(ComponentType::I16),
            5123 => Some(ComponentType::U16),
            5125 => Some(ComponentType::U32),
            5126 => Some(ComponentType::F32),
            _ => None,
        }
    }

    pub fn size(self) -> usize {
        match self {
            ComponentType::I8 | ComponentType::U8 => 1,
            ComponentType::I16 | ComponentType::U16 => 2,
            ComponentType::U32 | ComponentType::F32 => 4,
        }
    }

    fn read(self, bytes: &[u8]) -> f64 {
        match self {
            ComponentType::I8 => bytes[0] as i8 as f64,
            ComponentType::U8 => bytes[0] as f64,
            ComponentType::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            ComponentType::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            ComponentType::U32 => {
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            ComponentType::F32 => {
                f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
        }
    }

    /// Map a normalized integer onto `0..=1` (unsigned) or `-1..=1` (signed).
    fn normalize(self, value: f64) -> f64 {
        match self {
            ComponentType::I8 => (value / 127.0).max(-1.0),
            ComponentType::U8 => value / 255.0,
            ComponentType::I16 => (value / 32767.0).max(-1.0),
            ComponentType::U16 => value / 65535.0,
            ComponentType::U32 => value / u32::MAX as f64,
            ComponentType::F32 => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Scalar,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,
}

impl ElementType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SCALAR" => Some(ElementType::Scalar),
            "VEC2" => Some(ElementType::Vec2),
            "VEC3" => Some(ElementType::Vec3),
            "VEC4" => Some(ElementType::Vec4),
            "MAT2" => Some(ElementType::Mat2),
            "MAT3" => Some(ElementType::Mat3),
            "MAT4" => Some(ElementType::Mat4),
            _ => None,
        }
    }

    pub fn components(self) -> usize {
        match self {
            ElementType::Scalar => 1,
            ElementType::Vec2 => 2,
            ElementType::Vec3 => 3,
            ElementType::Vec4 | ElementType::Mat2 => 4,
            ElementType::Mat3 => 9,
            ElementType::Mat4 => 16,
        }
    }
}

/// Upper bound on the decoded components of one accessor.
pub const MAX_ACCESSOR_COMPONENTS: usize = 1 << 28;

/// Resolved byte layout of an accessor.
#[derive(Debug, Clone, Copy)]
pub struct AccessorMeta {
    pub count: usize,
    pub component_type: ComponentType,
    pub element_type: ElementType,
    pub normalized: bool,
}

impl AccessorMeta {
    pub fn from_descriptor(index: usize, descriptor: &AccessorDescriptor) -> Result<Self, ImportError> {
        let entity = EntityRef::Accessor(index);
        let component_type = ComponentType::from_gl(descriptor.component_type).ok_or_else(|| {
            ImportError::accessor(
                entity.clone(),
                format!("unknown component type {}", descriptor.component_type),
            )
        })?;
        let element_type = ElementType::from_name(&descriptor.accessor_type).ok_or_else(|| {
            ImportError::accessor(
                entity.clone(),
                format!("unknown element type '{}'", descriptor.accessor_type),
            )
        })?;
        descriptor
            .count
            .checked_mul(element_type.components())
            .filter(|components| *components <= MAX_ACCESSOR_COMPONENTS)
            .ok_or_else(|| {
                ImportError::accessor(
                    entity,
                    format!(
                        "{} elements exceed the limit of {MAX_ACCESSOR_COMPONENTS} components",
                        descriptor.count
                    ),
                )
            })?;
        Ok(Self {
            count: descriptor.count,
            component_type,
            element_type,
            normalized: descriptor.normalized,
        })
    }

    pub fn element_size(&self) -> usize {
        self.element_type.components() * self.component_type.size()
    }
}

/// A bounds-checked byte window over a buffer view.
#[derive(Debug, Clone, Copy)]
struct ViewWindow<'d> {
    bytes: &'d [u8],
    stride: usize,
}

fn view_window<'d>(
    document: &'d AssetDocument<'_>,
    entity: &EntityRef,
    view_index: usize,
    byte_offset: usize,
    element_size: usize,
    count: usize,
    use_stride: bool,
) -> Result<ViewWindow<'d>, ImportError> {
    let view = document.buffer_views.get(view_index).ok_or_else(|| {
        ImportError::dangling(
            entity.clone(),
            "buffer view",
            view_index,
            document.buffer_views.len(),
        )
    })?;
    let buffer = document.buffer_data.get(view.buffer)?;
    let view_end = view
        .byte_offset
        .checked_add(view.byte_length)
        .filter(|end| *end <= buffer.len())
        .ok_or_else(|| {
            ImportError::accessor(
                EntityRef::BufferView(view_index),
                format!(
                    "view range {}+{} exceeds buffer {} of {} bytes",
                    view.byte_offset,
                    view.byte_length,
                    view.buffer,
                    buffer.len()
                ),
            )
        })?;
    let view_bytes = &buffer[view.byte_offset..view_end];

    let stride = match view.byte_stride {
        Some(stride) if use_stride => stride,
        _ => element_size,
    };
    if stride < element_size {
        return Err(ImportError::accessor(
            entity.clone(),
            format!("byte stride {stride} is smaller than the element size {element_size}"),
        ));
    }
    let needed = match count {
        0 => Some(0),
        count => stride
            .checked_mul(count - 1)
            .and_then(|span| span.checked_add(element_size)),
    };
    let Some(needed) = needed else {
        return Err(ImportError::accessor(
            entity.clone(),
            format!("{count} elements with stride {stride} overflow the address range"),
        ));
    };
    if byte_offset.checked_add(needed).is_none_or(|end| end > view_bytes.len()) {
        return Err(ImportError::accessor(
            entity.clone(),
            format!(
                "{count} elements at offset {byte_offset} need {needed} bytes but view {view_index} has {}",
                view_bytes.len()
            ),
        ));
    }

    Ok(ViewWindow {
        bytes: &view_bytes[byte_offset..],
        stride,
    })
}

/// Validate the layout of accessor `index` without decoding its data.
pub fn check_accessor(document: &AssetDocument<'_>, index: usize) -> Result<AccessorMeta, ImportError> {
    let descriptor = document.accessors.get(index).ok_or_else(|| {
        ImportError::dangling(
            EntityRef::Document,
            "accessor",
            index,
            document.accessors.len(),
        )
    })?;
    let meta = AccessorMeta::from_descriptor(index, descriptor)?;
    let entity = EntityRef::Accessor(index);
    if let Some(view_index) = descriptor.buffer_view {
        view_window(
            document,
            &entity,
            view_index,
            descriptor.byte_offset,
            meta.element_size(),
            meta.count,
            true,
        )?;
    }
    if let Some(sparse) = &descriptor.sparse {
        let index_size = ComponentType::from_gl(sparse.indices.component_type)
            .map(ComponentType::size)
            .unwrap_or(1);
        view_window(
            document,
            &entity,
            sparse.indices.buffer_view,
            sparse.indices.byte_offset,
            index_size,
            sparse.count,
            false,
        )?;
        view_window(
            document,
            &entity,
            sparse.values.buffer_view,
            sparse.values.byte_offset,
            meta.element_size(),
            sparse.count,
            false,
        )?;
    }
    Ok(meta)
}

// ─── Accessor I/O ─────────────────────────────────────────────────────────────

/// Component values of an accessor, flattened element by element, with the
/// raw numeric value of each component and sparse substitution applied.
#[derive(Debug, Clone)]
pub struct AccessorValues {
    pub meta: AccessorMeta,
    raw: Vec<f64>,
}

impl AccessorValues {
    pub fn len(&self) -> usize {
        self.meta.count
    }

    pub fn is_empty(&self) -> bool {
        self.meta.count == 0
    }

    /// Components as `f32`, decoding normalized integers when the accessor is
    /// flagged normalized or `force_normalize` is set on an integer accessor.
    pub fn to_f32(&self, force_normalize: bool) -> Vec<f32> {
        let normalize = self.meta.normalized || force_normalize;
        let component_type = self.meta.component_type;
        self.raw
            .iter()
            .map(|value| {
                if normalize {
                    component_type.normalize(*value) as f32
                } else {
                    *value as f32
                }
            })
            .collect()
    }

    /// Components as unsigned integers (index and joint data).
    pub fn to_u32(&self) -> Vec<u32> {
        self.raw.iter().map(|value| value.max(0.0) as u32).collect()
    }

    pub fn max_u32(&self) -> Option<u32> {
        self.raw.iter().map(|value| value.max(0.0) as u32).max()
    }
}

/// Read every component of accessor `index`.
///
/// # Errors
///
/// `DanglingReference` for an out-of-range accessor, `InvalidAccessor` for
/// layout problems, `UnavailableBuffer` when the data is not embedded.
pub fn read_accessor(document: &AssetDocument<'_>, index: usize) -> Result<AccessorValues, ImportError> {
    let descriptor = document.accessors.get(index).ok_or_else(|| {
        ImportError::dangling(
            EntityRef::Document,
            "accessor",
            index,
            document.accessors.len(),
        )
    })?;
    let meta = AccessorMeta::from_descriptor(index, descriptor)?;
    let entity = EntityRef::Accessor(index);
    let components = meta.element_type.components();
    let component_size = meta.component_type.size();

    let mut raw = vec![0.0f64; meta.count * components];
    if let Some(view_index) = descriptor.buffer_view {
        let window = view_window(
            document,
            &entity,
            view_index,
            descriptor.byte_offset,
            meta.element_size(),
            meta.count,
            true,
        )?;
        for element in 0..meta.count {
            let base = element * window.stride;
            for lane in 0..components {
                let offset = base + lane * component_size;
                raw[element * components + lane] = meta
                    .component_type
                    .read(&window.bytes[offset..offset + component_size]);
            }
        }
    }

    if let Some(sparse) = &descriptor.sparse {
        let index_type = ComponentType::from_gl(sparse.indices.component_type)
            .filter(|kind| matches!(kind, ComponentType::U8 | ComponentType::U16 | ComponentType::U32))
            .ok_or_else(|| {
                ImportError::accessor(
                    entity.clone(),
                    format!(
                        "sparse index component type {} is not an unsigned integer",
                        sparse.indices.component_type
                    ),
                )
            })?;
        let indices = view_window(
            document,
            &entity,
            sparse.indices.buffer_view,
            sparse.indices.byte_offset,
            index_type.size(),
            sparse.count,
            false,
        )?;
        let values = view_window(
            document,
            &entity,
            sparse.values.buffer_view,
            sparse.values.byte_offset,
            meta.element_size(),
            sparse.count,
            false,
        )?;
        for entry in 0..sparse.count {
            let at = entry * index_type.size();
            let target = index_type.read(&indices.bytes[at..at + index_type.size()]) as usize;
            if target >= meta.count {
                return Err(ImportError::accessor(
                    entity.clone(),
                    format!("sparse index {target} is outside {} elements", meta.count),
                ));
            }
            for lane in 0..components {
                let offset = entry * meta.element_size() + lane * component_size;
                raw[target * components + lane] = meta
                    .component_type
                    .read(&values.bytes[offset..offset + component_size]);
            }
        }
    }

    Ok(AccessorValues { meta, raw })
}

fn expect_element(
    values: &AccessorValues,
    index: usize,
    expected: ElementType,
) -> Result<(), ImportError> {
    if values.meta.element_type == expected {
        Ok(())
    } else {
        Err(ImportError::accessor(
            EntityRef::Accessor(index),
            format!(
                "expected {expected:?} elements, found {:?}",
                values.meta.element_type
            ),
        ))
    }
}

pub fn read_scalars(document: &AssetDocument<'_>, index: usize) -> Result<Vec<f32>, ImportError> {
    let values = read_accessor(document, index)?;
    expect_element(&values, index, ElementType::Scalar)?;
    Ok(values.to_f32(false))
}

pub fn read_vec2(document: &AssetDocument<'_>, index: usize) -> Result<Vec<[f32; 2]>, ImportError> {
    let values = read_accessor(document, index)?;
    expect_element(&values, index, ElementType::Vec2)?;
    Ok(values
        .to_f32(false)
        .chunks_exact(2)
        .map(|c| [c[0], c[1]])
        .collect())
}

pub fn read_vec3(document: &AssetDocument<'_>, index: usize) -> Result<Vec<[f32; 3]>, ImportError> {
    let values = read_accessor(document, index)?;
    expect_element(&values, index, ElementType::Vec3)?;
    Ok(values
        .to_f32(false)
        .chunks_exact(3)
        .map(|c| [c[0], c[1], c[2]])
        .collect())
}

pub fn read_vec4(document: &AssetDocument<'_>, index: usize) -> Result<Vec<[f32; 4]>, ImportError> {
    let values = read_accessor(document, index)?;
    expect_element(&values, index, ElementType::Vec4)?;
    Ok(values
        .to_f32(false)
        .chunks_exact(4)
        .map(|c| [c[0], c[1], c[2], c[3]])
        .collect())
}

/// Colors are VEC3 or VEC4 and usually normalized integers; VEC3 gets an
/// alpha of one.
pub fn read_colors(document: &AssetDocument<'_>, index: usize) -> Result<Vec<[f32; 4]>, ImportError> {
    let values = read_accessor(document, index)?;
    let integer = values.meta.component_type != ComponentType::F32;
    let data = values.to_f32(integer);
    match values.meta.element_type {
        ElementType::Vec3 => Ok(data.chunks_exact(3).map(|c| [c[0], c[1], c[2], 1.0]).collect()),
        ElementType::Vec4 => Ok(data
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect()),
        other => Err(ImportError::accessor(
            EntityRef::Accessor(index),
            format!("expected Vec3 or Vec4 colors, found {other:?}"),
        )),
    }
}

/// Texture coordinates may be quantized integers (normalized).
pub fn read_uvs(document: &AssetDocument<'_>, index: usize) -> Result<Vec<[f32; 2]>, ImportError> {
    let values = read_accessor(document, index)?;
    expect_element(&values, index, ElementType::Vec2)?;
    Ok(values
        .to_f32(false)
        .chunks_exact(2)
        .map(|c| [c[0], c[1]])
        .collect())
}

/// Skin weights; integer weights are always normalized.
pub fn read_weights(document: &AssetDocument<'_>, index: usize) -> Result<Vec<[f32; 4]>, ImportError> {
    let values = read_accessor(document, index)?;
    expect_element(&values, index, ElementType::Vec4)?;
    let integer = values.meta.component_type != ComponentType::F32;
    Ok(values
        .to_f32(integer)
        .chunks_exact(4)
        .map(|c| [c[0], c[1], c[2], c[3]])
        .collect())
}

pub fn read_joints(document: &AssetDocument<'_>, index: usize) -> Result<Vec<[u16; 4]>, ImportError> {
    let values = read_accessor(document, index)?;
    expect_element(&values, index, ElementType::Vec4)?;
    let narrowed = values
        .to_u32()
        .into_iter()
        .map(u16::try_from)
        .collect::<Result<Vec<u16>, _>>()
        .map_err(|_| {
            ImportError::accessor(
                EntityRef::Accessor(index),
                format!("joint index exceeds {}", u16::MAX),
            )
        })?;
    Ok(narrowed
        .chunks_exact(4)
        .map(|c| [c[0], c[1], c[2], c[3]])
        .collect())
}

pub fn read_indices(document: &AssetDocument<'_>, index: usize) -> Result<Vec<u32>, ImportError> {
    let values = read_accessor(document, index)?;
    expect_element(&values, index, ElementType::Scalar)?;
    Ok(values.to_u32())
}

/// Column-major MAT4 elements.
pub fn read_mat4(document: &AssetDocument<'_>, index: usize) -> Result<Vec<Matrix4<f32>>, ImportError> {
    let values = read_accessor(document, index)?;
    expect_element(&values, index, ElementType::Mat4)?;
    Ok(values
        .to_f32(false)
        .chunks_exact(16)
        .map(Matrix4::from_column_slice)
        .collect())
}
