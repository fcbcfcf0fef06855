use serde::Serialize;

use crate::{
    accessor::{read_scalars, read_vec3, read_vec4},
    coords::CoordinateConversion,
    diagnostic::{DiagnosticCode, Diagnostics, EntityRef},
    document::{AssetDocument, schema::ChannelDescriptor},
    error::ImportError,
    humanoid::{HumanBone, HumanoidBoneMap},
    retarget::{BoneCorrection, RetargetProfile},
    scene::NodeId,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Keyframe<T> {
    pub time: f32,
    pub value: T,
}

/// Keys in strictly increasing time order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "interpolation", content = "keys", rename_all = "camelCase")]
pub enum Keyframes<T> {
    Linear(Vec<Keyframe<T>>),
    Step(Vec<Keyframe<T>>),
    // in, value, out
    CubicSpline(Vec<Keyframe<(T, T, T)>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Interpolation {
    Step,
    Linear,
    CubicSpline,
}

impl Interpolation {
    fn from_name(name: Option<&str>) -> Self {
        match name {
            Some("STEP") => Interpolation::Step,
            Some("CUBICSPLINE") => Interpolation::CubicSpline,
            _ => Interpolation::Linear,
        }
    }

    fn stride(self) -> usize {
        match self {
            Interpolation::CubicSpline => 3,
            _ => 1,
        }
    }
}

impl<T> Keyframes<T> {
    pub fn interpolation(&self) -> Interpolation {
        match self {
            Keyframes::Linear(_) => Interpolation::Linear,
            Keyframes::Step(_) => Interpolation::Step,
            Keyframes::CubicSpline(_) => Interpolation::CubicSpline,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Keyframes::Linear(keys) | Keyframes::Step(keys) => keys.len(),
            Keyframes::CubicSpline(keys) => keys.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn times(&self) -> Vec<f32> {
        match self {
            Keyframes::Linear(keys) | Keyframes::Step(keys) => keys.iter().map(|key| key.time).collect(),
            Keyframes::CubicSpline(keys) => keys.iter().map(|key| key.time).collect(),
        }
    }

    /// Time of the last key.
    pub fn end_time(&self) -> f32 {
        self.times().last().copied().unwrap_or(0.0)
    }

    /// Apply `value` to key values and `tangent` to cubic-spline tangents.
    fn map<U>(self, value: impl Fn(T) -> U, tangent: impl Fn(T) -> U) -> Keyframes<U> {
        let convert = |keys: Vec<Keyframe<T>>| -> Vec<Keyframe<U>> {
            keys.into_iter()
                .map(|key| Keyframe {
                    time: key.time,
                    value: value(key.value),
                })
                .collect()
        };
        match self {
            Keyframes::Linear(keys) => Keyframes::Linear(convert(keys)),
            Keyframes::Step(keys) => Keyframes::Step(convert(keys)),
            Keyframes::CubicSpline(keys) => Keyframes::CubicSpline(
                keys.into_iter()
                    .map(|key| {
                        let (in_tangent, key_value, out_tangent) = key.value;
                        Keyframe {
                            time: key.time,
                            value: (tangent(in_tangent), value(key_value), tangent(out_tangent)),
                        }
                    })
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum TrackTarget {
    Bone(HumanBone),
    /// Non-humanoid node passed through by identity.
    Node(NodeId),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "property", content = "keyframes", rename_all = "camelCase")]
pub enum TrackChannel {
    Translation(Keyframes<[f32; 3]>),
    /// Quaternions `[x, y, z, w]`.
    Rotation(Keyframes<[f32; 4]>),
    Scale(Keyframes<[f32; 3]>),
    /// One weight per morph target per key.
    Weights(Keyframes<Vec<f32>>),
}

impl TrackChannel {
    pub fn property(&self) -> &'static str {
        match self {
            TrackChannel::Translation(_) => "translation",
            TrackChannel::Rotation(_) => "rotation",
            TrackChannel::Scale(_) => "scale",
            TrackChannel::Weights(_) => "weights",
        }
    }

    pub fn end_time(&self) -> f32 {
        match self {
            TrackChannel::Translation(keys) | TrackChannel::Scale(keys) => keys.end_time(),
            TrackChannel::Rotation(keys) => keys.end_time(),
            TrackChannel::Weights(keys) => keys.end_time(),
        }
    }

    pub fn times(&self) -> Vec<f32> {
        match self {
            TrackChannel::Translation(keys) | TrackChannel::Scale(keys) => keys.times(),
            TrackChannel::Rotation(keys) => keys.times(),
            TrackChannel::Weights(keys) => keys.times(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnimationTrack {
    pub target: TrackTarget,
    /// Source node the channel animated.
    pub node: NodeId,
    pub channel: TrackChannel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnimationClip {
    pub name: Option<String>,
    pub tracks: Vec<AnimationTrack>,
    pub duration: f32,
}

// ─── Key cleanup ──────────────────────────────────────────────────────────────

/// Remove non-finite times, sort (stable) and keep the first of equal times.
fn clean_keys<V>(
    mut keys: Vec<Keyframe<V>>,
    entity: &EntityRef,
    diagnostics: &mut Diagnostics,
) -> Vec<Keyframe<V>> {
    let before = keys.len();
    keys.retain(|key| key.time.is_finite());
    if keys.len() != before {
        diagnostics.warn(
            DiagnosticCode::NonFiniteKeyframeTime,
            entity.clone(),
            format!("removed {} keys with non-finite times", before - keys.len()),
        );
    }

    if keys.windows(2).any(|pair| pair[1].time < pair[0].time) {
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        diagnostics.warn(
            DiagnosticCode::NonMonotonicKeyframes,
            entity.clone(),
            "keyframe times were not increasing and have been sorted",
        );
    }

    let before = keys.len();
    keys.dedup_by(|later, earlier| later.time == earlier.time);
    if keys.len() != before {
        diagnostics.warn(
            DiagnosticCode::DuplicateKeyframeTime,
            entity.clone(),
            format!("dropped {} keys sharing a time with an earlier key", before - keys.len()),
        );
    }
    keys
}

fn build_keyframes<T: Clone>(
    times: &[f32],
    values: Vec<T>,
    interpolation: Interpolation,
    entity: &EntityRef,
    diagnostics: &mut Diagnostics,
) -> Keyframes<T> {
    match interpolation {
        Interpolation::CubicSpline => {
            let keys = times
                .iter()
                .zip(values.chunks_exact(3))
                .map(|(&time, triple)| Keyframe {
                    time,
                    value: (triple[0].clone(), triple[1].clone(), triple[2].clone()),
                })
                .collect();
            Keyframes::CubicSpline(clean_keys(keys, entity, diagnostics))
        }
        Interpolation::Linear | Interpolation::Step => {
            let keys = times
                .iter()
                .zip(values)
                .map(|(&time, value)| Keyframe { time, value })
                .collect();
            let keys = clean_keys(keys, entity, diagnostics);
            if interpolation == Interpolation::Step {
                Keyframes::Step(keys)
            } else {
                Keyframes::Linear(keys)
            }
        }
    }
}

fn normalize_quaternion(q: [f32; 4]) -> [f32; 4] {
    let norm = q.iter().map(|c| c * c).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        q.map(|c| c / norm)
    } else {
        [0.0, 0.0, 0.0, 1.0]
    }
}

// ─── Import ───────────────────────────────────────────────────────────────────

struct ChannelContext<'p> {
    entity: EntityRef,
    node: NodeId,
    bone: Option<HumanBone>,
    correction: Option<&'p BoneCorrection>,
}

fn read_channel(
    document: &AssetDocument<'_>,
    animation: usize,
    channel: &ChannelDescriptor,
    context: &ChannelContext<'_>,
    profile: &RetargetProfile,
    conversion: &CoordinateConversion,
    diagnostics: &mut Diagnostics,
) -> Result<Option<TrackChannel>, ImportError> {
    let sampler = &document.animations[animation].samplers[channel.sampler];
    let interpolation = Interpolation::from_name(sampler.interpolation.as_deref());
    let times = read_scalars(document, sampler.input)?;
    let expected = times.len() * interpolation.stride();
    let entity = &context.entity;

    let mismatch = |found: usize, diagnostics: &mut Diagnostics| {
        diagnostics.warn(
            DiagnosticCode::TrackDropped,
            entity.clone(),
            format!("sampler has {} input times but {found} output values", times.len()),
        );
    };

    let channel = match channel.target.path.as_str() {
        "translation" => {
            let values = read_vec3(document, sampler.output)?;
            if values.len() != expected {
                mismatch(values.len(), diagnostics);
                return Ok(None);
            }
            let keys = build_keyframes(&times, values, interpolation, entity, diagnostics)
                .map(|v| conversion.point(v), |t| conversion.point(t));
            let keys = if context.bone == Some(HumanBone::Hips) && context.correction.is_some() {
                keys.map(
                    |v| profile.root_translation(v),
                    |t| profile.root_translation_tangent(t),
                )
            } else {
                keys
            };
            TrackChannel::Translation(keys)
        }
        "rotation" => {
            let values = read_vec4(document, sampler.output)?;
            if values.len() != expected {
                mismatch(values.len(), diagnostics);
                return Ok(None);
            }
            let keys = build_keyframes(&times, values, interpolation, entity, diagnostics)
                .map(
                    |v| normalize_quaternion(conversion.quaternion(v)),
                    |t| conversion.quaternion(t),
                );
            let keys = match context.correction {
                Some(correction) => keys.map(
                    |v| normalize_quaternion(correction.apply_raw(v)),
                    |t| correction.apply_raw(t),
                ),
                None => keys,
            };
            TrackChannel::Rotation(keys)
        }
        "scale" => {
            let values = read_vec3(document, sampler.output)?;
            if values.len() != expected {
                mismatch(values.len(), diagnostics);
                return Ok(None);
            }
            TrackChannel::Scale(
                build_keyframes(&times, values, interpolation, entity, diagnostics)
                    .map(|v| conversion.scale(v), |t| conversion.scale(t)),
            )
        }
        "weights" => {
            let targets = document.nodes[context.node.0]
                .mesh
                .map_or(0, |mesh| document.meshes[mesh].target_count());
            let values = read_scalars(document, sampler.output)?;
            if targets == 0 || values.len() != expected * targets {
                mismatch(values.len(), diagnostics);
                return Ok(None);
            }
            let per_key: Vec<Vec<f32>> =
                values.chunks_exact(targets).map(<[f32]>::to_vec).collect();
            TrackChannel::Weights(build_keyframes(
                &times,
                per_key,
                interpolation,
                entity,
                diagnostics,
            ))
        }
        other => {
            diagnostics.warn(
                DiagnosticCode::TrackDropped,
                entity.clone(),
                format!("unsupported target path '{other}'"),
            );
            return Ok(None);
        }
    };
    Ok(Some(channel))
}

/// Convert every animation into retargeted clips.
///
/// Problems are scoped to the channel: a channel that cannot be read is
/// dropped with a warning and the rest of the clip is kept.
pub fn import_animations(
    document: &AssetDocument<'_>,
    bone_map: Option<&HumanoidBoneMap>,
    profile: &RetargetProfile,
    conversion: &CoordinateConversion,
    diagnostics: &mut Diagnostics,
) -> Vec<AnimationClip> {
    let mut clips = Vec::with_capacity(document.animations.len());
    for (animation_index, animation) in document.animations.iter().enumerate() {
        let mut tracks = Vec::with_capacity(animation.channels.len());
        for (channel_index, channel) in animation.channels.iter().enumerate() {
            let entity = EntityRef::Channel {
                animation: animation_index,
                channel: channel_index,
            };
            let Some(node) = channel.target.node.map(NodeId) else {
                diagnostics.warn(
                    DiagnosticCode::TrackDropped,
                    entity,
                    "channel has no target node",
                );
                continue;
            };

            let bone = bone_map.and_then(|map| map.bone_for_node(node));
            if let Some(bone) = bone
                && profile.is_skipped(bone)
            {
                diagnostics.warn(
                    DiagnosticCode::TrackDropped,
                    entity,
                    format!("{bone} was skipped by retargeting"),
                );
                continue;
            }
            let context = ChannelContext {
                correction: bone.and_then(|bone| profile.get(bone)),
                entity,
                node,
                bone,
            };

            match read_channel(
                document,
                animation_index,
                channel,
                &context,
                profile,
                conversion,
                diagnostics,
            ) {
                Ok(Some(track)) => tracks.push(AnimationTrack {
                    target: match bone {
                        Some(bone) => TrackTarget::Bone(bone),
                        None => TrackTarget::Node(node),
                    },
                    node,
                    channel: track,
                }),
                Ok(None) => {}
                Err(error) => {
                    diagnostics.warn(DiagnosticCode::TrackDropped, context.entity, error.to_string())
                }
            }
        }

        let duration = tracks
            .iter()
            .map(|track| track.channel.end_time())
            .fold(0.0, f32::max);
        log::debug!(
            "animation {animation_index}: {} tracks, {duration:.3}s",
            tracks.len()
        );
        clips.push(AnimationClip {
            name: animation.name.clone(),
            tracks,
            duration,
        });
    }
    clips
}
