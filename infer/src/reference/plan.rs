//! Serialized plans and the precision passes applied while compiling them.

use serde::{Deserialize, Serialize};

use crate::engine::BuilderConfig;
use crate::error::InferError;

use super::network::{Layer, NetworkDescription};

/// Leading bytes of every plan.
pub const PLAN_MAGIC: &[u8; 8] = b"GZPLAN\x00\x01";

/// Numeric precision the weights were reduced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Fp32,
    Fp16,
    Bf16,
    Int8,
}

impl Precision {
    /// Picks one precision from the builder flags, narrowest first.
    pub fn from_config(config: &BuilderConfig) -> Self {
        if config.int8 {
            Precision::Int8
        } else if config.fp16 {
            Precision::Fp16
        } else if config.bf16 {
            Precision::Bf16
        } else {
            Precision::Fp32
        }
    }

    /// Reduces `values` in place.
    pub fn apply(self, values: &mut [f32]) {
        match self {
            Precision::Fp32 => {}
            Precision::Fp16 => values.iter_mut().for_each(|v| *v = to_fp16(*v)),
            Precision::Bf16 => values.iter_mut().for_each(|v| *v = to_bf16(*v)),
            Precision::Int8 => quantize_int8(values),
        }
    }
}

/// Rounds the mantissa of `v` to `bits` bits, to nearest even.
fn round_mantissa(v: f32, bits: u32) -> f32 {
    if !v.is_finite() {
        return v;
    }
    let drop = 23 - bits;
    let raw = v.to_bits();
    let half = 1u32 << (drop - 1);
    let lsb = (raw >> drop) & 1;
    let rounded = raw.wrapping_add(half - 1 + lsb) & !((1u32 << drop) - 1);
    f32::from_bits(rounded)
}

const FP16_MAX: f32 = 65504.0;

fn to_fp16(v: f32) -> f32 {
    round_mantissa(v, 10).clamp(-FP16_MAX, FP16_MAX)
}

fn to_bf16(v: f32) -> f32 {
    round_mantissa(v, 7)
}

/// Symmetric per-tensor fake quantization to 8 bits.
fn quantize_int8(values: &mut [f32]) {
    let max = values.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    if max == 0.0 || !max.is_finite() {
        return;
    }
    let scale = max / 127.0;
    for v in values.iter_mut() {
        *v = (*v / scale).round().clamp(-127.0, 127.0) * scale;
    }
}

/// A compiled network as stored in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub network: NetworkDescription,
    pub precision: Precision,
}

impl Plan {
    /// Compiles a validated description with the given builder options.
    pub fn compile(
        description: &NetworkDescription,
        config: &BuilderConfig,
    ) -> Result<Self, InferError> {
        description.validate()?;
        let precision = Precision::from_config(config);
        let mut network = description.clone();
        for layer in &mut network.layers {
            if let Layer::Dense { weights, bias, .. } = layer {
                precision.apply(weights);
                precision.apply(bias);
            }
        }
        Ok(Self { network, precision })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, InferError> {
        let body = rmp_serde::to_vec_named(self)
            .map_err(|e| InferError::Build(format!("serialize plan: {e}")))?;
        let mut out = Vec::with_capacity(PLAN_MAGIC.len() + body.len());
        out.extend_from_slice(PLAN_MAGIC);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, InferError> {
        let body = data
            .strip_prefix(PLAN_MAGIC.as_slice())
            .ok_or_else(|| InferError::Engine("not a plan: bad magic".into()))?;
        let plan: Plan = rmp_serde::from_slice(body)
            .map_err(|e| InferError::Engine(format!("corrupt plan: {e}")))?;
        plan.network
            .validate()
            .map_err(|e| InferError::Engine(format!("invalid plan: {e}")))?;
        Ok(plan)
    }
}
