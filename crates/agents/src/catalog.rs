//! Known chat models and their download footprint.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelCategory {
    Tiny,
    Small,
    Medium,
    Large,
}

impl std::fmt::Display for ModelCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Tiny => "tiny",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ModelCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tiny" => Ok(Self::Tiny),
            "small" => Ok(Self::Small),
            "medium" => Ok(Self::Medium),
            "large" => Ok(Self::Large),
            other => anyhow::bail!("unknown model category: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub size: &'static str,
    #[serde(rename = "vramMB")]
    pub vram_mb: f64,
    pub description: &'static str,
    pub category: ModelCategory,
    /// Usable on machines without a large GPU.
    pub low_resource: bool,
}

const fn model(
    id: &'static str,
    name: &'static str,
    size: &'static str,
    vram_mb: f64,
    description: &'static str,
    category: ModelCategory,
    low_resource: bool,
) -> ModelInfo {
    ModelInfo {
        id,
        name,
        size,
        vram_mb,
        description,
        category,
        low_resource,
    }
}

use ModelCategory::{Large, Medium, Small, Tiny};

pub static AVAILABLE_MODELS: &[ModelInfo] = &[
    model(
        "SmolLM2-135M-Instruct-q0f16-MLC",
        "SmolLM2 135M",
        "360 MB",
        359.69,
        "Ultra-lightweight model, fastest download",
        Tiny,
        true,
    ),
    model(
        "SmolLM2-360M-Instruct-q4f16_1-MLC",
        "SmolLM2 360M",
        "376 MB",
        376.06,
        "Very small and fast, good for basic tasks",
        Tiny,
        true,
    ),
    model(
        "SmolLM2-360M-Instruct-q0f16-MLC",
        "SmolLM2 360M (q0f16)",
        "872 MB",
        871.99,
        "Higher quality 360M model",
        Tiny,
        true,
    ),
    model(
        "TinyLlama-1.1B-Chat-v1.0-q4f16_1-MLC-1k",
        "TinyLlama 1.1B",
        "675 MB",
        675.24,
        "Small but capable model with good performance",
        Small,
        true,
    ),
    model(
        "Qwen2.5-0.5B-Instruct-q4f16_1-MLC",
        "Qwen2.5 0.5B",
        "945 MB",
        944.62,
        "Qwen family, excellent for its size",
        Small,
        true,
    ),
    model(
        "Qwen3-0.6B-q4f16_1-MLC",
        "Qwen3 0.6B",
        "1.4 GB",
        1403.34,
        "Latest Qwen3 model, very capable",
        Small,
        true,
    ),
    model(
        "Qwen2.5-1.5B-Instruct-q4f16_1-MLC",
        "Qwen2.5 1.5B",
        "1.6 GB",
        1629.75,
        "Good balance of size and performance",
        Medium,
        true,
    ),
    model(
        "SmolLM2-1.7B-Instruct-q4f16_1-MLC",
        "SmolLM2 1.7B",
        "1.8 GB",
        1774.19,
        "Larger SmolLM model with better capabilities",
        Medium,
        true,
    ),
    model(
        "Llama-3.2-1B-Instruct-q4f16_1-MLC",
        "Llama 3.2 1B",
        "879 MB",
        879.04,
        "Meta's compact Llama model",
        Small,
        true,
    ),
    model(
        "gemma-2-2b-it-q4f16_1-MLC-1k",
        "Gemma 2B (1k context)",
        "1.6 GB",
        1583.3,
        "Google's Gemma model, efficient",
        Medium,
        true,
    ),
    model(
        "Llama-3.2-3B-Instruct-q4f16_1-MLC",
        "Llama 3.2 3B",
        "2.3 GB",
        2263.69,
        "More capable Llama model",
        Medium,
        true,
    ),
    model(
        "Qwen2.5-3B-Instruct-q4f16_1-MLC",
        "Qwen2.5 3B",
        "2.5 GB",
        2504.76,
        "Powerful 3B model with excellent performance",
        Medium,
        true,
    ),
    model(
        "Phi-3.5-mini-instruct-q4f16_1-MLC-1k",
        "Phi-3.5 Mini (1k context)",
        "2.5 GB",
        2520.07,
        "Microsoft's efficient Phi model",
        Medium,
        true,
    ),
    model(
        "Llama-3.1-8B-Instruct-q4f32_1-MLC",
        "Llama 3.1 8B",
        "6.1 GB",
        6101.01,
        "Large and capable, needs a dedicated GPU",
        Large,
        false,
    ),
];

/// Suggested pick for a first run on modest hardware.
pub const RECOMMENDED_MODEL: &str = "SmolLM2-360M-Instruct-q4f16_1-MLC";

pub fn model_by_id(id: &str) -> Option<&'static ModelInfo> {
    AVAILABLE_MODELS.iter().find(|m| m.id == id)
}

pub fn models_by_category(category: ModelCategory) -> Vec<&'static ModelInfo> {
    AVAILABLE_MODELS
        .iter()
        .filter(|m| m.category == category)
        .collect()
}

pub fn low_resource_models() -> Vec<&'static ModelInfo> {
    AVAILABLE_MODELS.iter().filter(|m| m.low_resource).collect()
}
