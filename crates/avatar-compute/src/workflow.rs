//! Typed job descriptions built from a node-graph workflow template.
//!
//! The engine accepts a JSON object mapping node ids to
//! `{class_type, inputs}`. The worker only ever touches a fixed set of
//! inputs, so each one is addressed through a named [`Slot`] bound to a
//! `(node id, input name)` pair. Bindings are checked when the template is
//! loaded and every slot must receive a value before a [`JobDescription`]
//! can be built.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ComputeError;

/// Named, per-job parameter positions in the workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Filename of the staged reference image.
    ImageFile,
    /// Filename of the staged driving video.
    VideoFile,
    /// Frame rate the driving video is resampled to.
    VideoForceRate,
    /// Frame rate of the encoded output.
    OutputFrameRate,
    /// Positive text prompt.
    PositivePrompt,
    /// Negative text prompt.
    NegativePrompt,
    /// Sampler seed.
    Seed,
    /// Classifier-free guidance scale.
    Cfg,
    /// Sampler step count.
    Steps,
    /// Output width.
    Width,
    /// Output height.
    Height,
}

impl Slot {
    /// Every slot a job description must fill.
    pub const ALL: [Slot; 11] = [
        Slot::ImageFile,
        Slot::VideoFile,
        Slot::VideoForceRate,
        Slot::OutputFrameRate,
        Slot::PositivePrompt,
        Slot::NegativePrompt,
        Slot::Seed,
        Slot::Cfg,
        Slot::Steps,
        Slot::Width,
        Slot::Height,
    ];

    /// Stable slot name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Slot::ImageFile => "image_file",
            Slot::VideoFile => "video_file",
            Slot::VideoForceRate => "video_force_rate",
            Slot::OutputFrameRate => "output_frame_rate",
            Slot::PositivePrompt => "positive_prompt",
            Slot::NegativePrompt => "negative_prompt",
            Slot::Seed => "seed",
            Slot::Cfg => "cfg",
            Slot::Steps => "steps",
            Slot::Width => "width",
            Slot::Height => "height",
        }
    }

    /// Binding used by the shipped idle-animation workflow.
    fn default_binding(&self) -> SlotBinding {
        let (node, input) = match self {
            Slot::ImageFile => ("57", "image"),
            Slot::VideoFile => ("63", "video"),
            Slot::VideoForceRate => ("63", "force_rate"),
            Slot::OutputFrameRate => ("30", "frame_rate"),
            Slot::PositivePrompt => ("65", "positive_prompt"),
            Slot::NegativePrompt => ("65", "negative_prompt"),
            Slot::Seed => ("27", "seed"),
            Slot::Cfg => ("27", "cfg"),
            Slot::Steps => ("27", "steps"),
            Slot::Width => ("150", "value"),
            Slot::Height => ("151", "value"),
        };
        SlotBinding {
            node: node.to_string(),
            input: input.to_string(),
        }
    }
}

/// Address of a slot inside the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotBinding {
    /// Node id (graph key).
    pub node: String,
    /// Input name under the node's `inputs` object.
    pub input: String,
}

/// A loaded workflow graph plus its slot bindings.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    graph: Map<String, Value>,
    bindings: HashMap<Slot, SlotBinding>,
}

impl WorkflowTemplate {
    /// Load a template from a JSON file using the default slot bindings.
    pub async fn load(path: &Path) -> Result<Self, ComputeError> {
        let raw = tokio::fs::read(path).await?;
        let graph: Value = serde_json::from_slice(&raw)?;
        Self::from_value(graph)
    }

    /// Build a template from an in-memory graph using the default slot bindings.
    pub fn from_value(graph: Value) -> Result<Self, ComputeError> {
        let Value::Object(graph) = graph else {
            return Err(ComputeError::Template(
                "workflow root must be a JSON object".to_string(),
            ));
        };

        let bindings = Slot::ALL
            .iter()
            .map(|slot| (*slot, slot.default_binding()))
            .collect();

        let template = Self { graph, bindings };
        for slot in Slot::ALL {
            template.check_binding(slot)?;
        }
        Ok(template)
    }

    /// Rebind a slot to another node input.
    pub fn with_binding(
        mut self,
        slot: Slot,
        node: impl Into<String>,
        input: impl Into<String>,
    ) -> Result<Self, ComputeError> {
        self.bindings.insert(
            slot,
            SlotBinding {
                node: node.into(),
                input: input.into(),
            },
        );
        self.check_binding(slot)?;
        Ok(self)
    }

    /// Binding of a slot.
    pub fn binding(&self, slot: Slot) -> Option<&SlotBinding> {
        self.bindings.get(&slot)
    }

    /// Start a fresh job description from this template.
    pub fn builder(&self) -> JobDescriptionBuilder<'_> {
        JobDescriptionBuilder {
            template: self,
            values: HashMap::new(),
        }
    }

    fn check_binding(&self, slot: Slot) -> Result<(), ComputeError> {
        let binding = self
            .bindings
            .get(&slot)
            .ok_or(ComputeError::MissingSlot(slot.name()))?;

        let present = self
            .graph
            .get(&binding.node)
            .and_then(|node| node.get("inputs"))
            .and_then(Value::as_object)
            .is_some_and(|inputs| inputs.contains_key(&binding.input));

        if present {
            Ok(())
        } else {
            Err(ComputeError::UnboundSlot {
                slot: slot.name(),
                node: binding.node.clone(),
                input: binding.input.clone(),
            })
        }
    }
}

/// Collects slot values for one job.
#[derive(Debug)]
pub struct JobDescriptionBuilder<'a> {
    template: &'a WorkflowTemplate,
    values: HashMap<Slot, Value>,
}

impl JobDescriptionBuilder<'_> {
    /// Set a slot to an arbitrary JSON value.
    pub fn set(mut self, slot: Slot, value: impl Into<Value>) -> Self {
        self.values.insert(slot, value.into());
        self
    }

    /// Staged image and video filenames (relative to the engine input dir).
    pub fn inputs(self, image_file: &str, video_file: &str) -> Self {
        self.set(Slot::ImageFile, image_file)
            .set(Slot::VideoFile, video_file)
    }

    /// Frame rate for both the driving-video loader and the output encoder.
    pub fn frame_rate(self, fps: u32) -> Self {
        self.set(Slot::VideoForceRate, fps)
            .set(Slot::OutputFrameRate, fps)
    }

    /// Positive and negative prompts.
    pub fn prompts(self, positive: &str, negative: &str) -> Self {
        self.set(Slot::PositivePrompt, positive)
            .set(Slot::NegativePrompt, negative)
    }

    /// Sampler seed, step count, and guidance scale.
    pub fn sampling(self, seed: u32, steps: u32, cfg: f64) -> Self {
        self.set(Slot::Seed, seed)
            .set(Slot::Steps, steps)
            .set(Slot::Cfg, cfg)
    }

    /// Output resolution.
    pub fn dimensions(self, width: u32, height: u32) -> Self {
        self.set(Slot::Width, width).set(Slot::Height, height)
    }

    /// Produce the immutable description, failing if any slot is unset.
    pub fn build(self) -> Result<JobDescription, ComputeError> {
        let mut graph = self.template.graph.clone();

        for slot in Slot::ALL {
            let value = self
                .values
                .get(&slot)
                .ok_or(ComputeError::MissingSlot(slot.name()))?;
            let binding = self
                .template
                .binding(slot)
                .ok_or(ComputeError::MissingSlot(slot.name()))?;

            let target = graph
                .get_mut(&binding.node)
                .and_then(|node| node.get_mut("inputs"))
                .and_then(Value::as_object_mut)
                .ok_or_else(|| ComputeError::UnboundSlot {
                    slot: slot.name(),
                    node: binding.node.clone(),
                    input: binding.input.clone(),
                })?;
            target.insert(binding.input.clone(), value.clone());
        }

        Ok(JobDescription {
            graph: Value::Object(graph),
            values: self.values,
        })
    }
}

/// A fully parameterized, immutable job graph ready for submission.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct JobDescription {
    graph: Value,
    #[serde(skip)]
    values: HashMap<Slot, Value>,
}

impl JobDescription {
    /// The graph as submitted to the engine.
    pub fn graph(&self) -> &Value {
        &self.graph
    }

    /// Value assigned to a slot.
    pub fn slot(&self, slot: Slot) -> Option<&Value> {
        self.values.get(&slot)
    }
}
