//! Generation parameters substituted into every job description.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Fixed and default generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GenerationConfig {
    /// Output and driving-video frame rate.
    #[serde(default = "default_fps")]
    #[validate(range(min = 1, max = 120))]
    pub fps: u32,
    /// Output width in pixels.
    #[serde(default = "default_width")]
    #[validate(range(min = 64, max = 4096))]
    pub width: u32,
    /// Output height in pixels.
    #[serde(default = "default_height")]
    #[validate(range(min = 64, max = 4096))]
    pub height: u32,
    /// Sampler step count.
    #[serde(default = "default_steps")]
    #[validate(range(min = 1, max = 200))]
    pub steps: u32,
    /// Classifier-free guidance scale.
    #[serde(default = "default_cfg")]
    #[validate(range(min = 0.0, max = 30.0))]
    pub cfg: f64,
    /// Prompt used when the request does not supply one.
    #[serde(default = "default_positive_prompt")]
    pub positive_prompt: String,
    /// Negative prompt used when the request does not supply one.
    #[serde(default = "default_negative_prompt")]
    pub negative_prompt: String,
    /// Store key of the driving video used when a request names none.
    #[serde(default)]
    pub default_driving_video_path: String,
    /// Directory of named driving-video templates (`<id>.mp4`).
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
    /// Node-graph template submitted to the engine.
    #[serde(default = "default_workflow_path")]
    pub workflow_path: PathBuf,
    /// Largest output (in MB) returned inline when the upload fails.
    #[serde(default = "default_inline_fallback_max_mb")]
    #[validate(range(min = 1, max = 1024))]
    pub inline_fallback_max_mb: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            width: default_width(),
            height: default_height(),
            steps: default_steps(),
            cfg: default_cfg(),
            positive_prompt: default_positive_prompt(),
            negative_prompt: default_negative_prompt(),
            default_driving_video_path: String::new(),
            templates_dir: default_templates_dir(),
            workflow_path: default_workflow_path(),
            inline_fallback_max_mb: default_inline_fallback_max_mb(),
        }
    }
}

impl GenerationConfig {
    /// Inline fallback ceiling in bytes.
    pub fn inline_fallback_max_bytes(&self) -> u64 {
        self.inline_fallback_max_mb * 1024 * 1024
    }
}

fn default_fps() -> u32 {
    24
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_steps() -> u32 {
    4
}

fn default_cfg() -> f64 {
    1.0
}

fn default_positive_prompt() -> String {
    "a person standing naturally with subtle idle movements, \
     gentle breathing motion, soft natural lighting, photorealistic, \
     high quality, smooth motion"
        .to_string()
}

fn default_negative_prompt() -> String {
    "blurry, distorted, deformed, low quality, artifacts, glitch, \
     unnatural pose, static, overexposed, underexposed, text, watermark, \
     extra limbs, bad anatomy, ugly"
        .to_string()
}

// Container images ship these at the filesystem root; checkouts keep them in-tree.
fn default_templates_dir() -> PathBuf {
    let image_path = Path::new("/templates");
    if image_path.is_dir() {
        image_path.to_path_buf()
    } else {
        PathBuf::from("./templates")
    }
}

fn default_workflow_path() -> PathBuf {
    let image_path = Path::new("/workflow_replace.json");
    if image_path.exists() {
        image_path.to_path_buf()
    } else {
        PathBuf::from("./workflow/workflow_replace.json")
    }
}

fn default_inline_fallback_max_mb() -> u64 {
    80
}
