//! Distance functions for HNSW search.
//!
//! All spaces return a distance where **lower is closer**:
//! - `l2`: squared Euclidean distance.
//! - `cosine`: `1 - cosine_similarity`, range \[0, 2\].
//! - `ip`: `1 - dot(a, b)`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Distance space of a collection's index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Space {
    #[default]
    L2,
    Cosine,
    Ip,
}

impl Space {
    /// Distance between two equal-length vectors.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Space::L2 => euclidean_sq(a, b),
            Space::Cosine => 1.0 - cosine_similarity(a, b),
            Space::Ip => 1.0 - dot_product(a, b),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Space::L2 => "l2",
            Space::Cosine => "cosine",
            Space::Ip => "ip",
        }
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Space {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "l2" => Ok(Space::L2),
            "cosine" => Ok(Space::Cosine),
            "ip" => Ok(Space::Ip),
            other => Err(format!(
                "unknown space '{other}', expected one of: l2, cosine, ip"
            )),
        }
    }
}

// Four-lane accumulators keep the loops auto-vectorizable without intrinsics.

#[inline]
fn euclidean_sq(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; 4];
    let chunks = a.len() / 4;
    for c in 0..chunks {
        let i = c * 4;
        for lane in 0..4 {
            let d = a[i + lane] - b[i + lane];
            acc[lane] += d * d;
        }
    }
    let mut sum = acc.iter().sum::<f32>();
    for i in chunks * 4..a.len() {
        let d = a[i] - b[i];
        sum += d * d;
    }
    sum
}

#[inline]
fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; 4];
    let chunks = a.len() / 4;
    for c in 0..chunks {
        let i = c * 4;
        for lane in 0..4 {
            acc[lane] += a[i + lane] * b[i + lane];
        }
    }
    let mut sum = acc.iter().sum::<f32>();
    for i in chunks * 4..a.len() {
        sum += a[i] * b[i];
    }
    sum
}

#[inline]
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot = dot_product(a, b);
    let norm_a = dot_product(a, a).sqrt();
    let norm_b = dot_product(b, b).sqrt();
    let denom = norm_a * norm_b;
    if denom < 1e-10 {
        return 0.0;
    }
    dot / denom
}
