//! The five pipeline lanes.
//!
//! Lanes are a closed set processed in the fixed order of [`LANE_ORDER`].
//! Each lane owns its model mapping and its prompts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::llm::ModelId;

/// One pipeline stage producing one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Spec,
    Sql,
    Ui,
    Test,
    Cicd,
}

/// Processing order. `spec` resolves first.
pub const LANE_ORDER: [Lane; 5] = [Lane::Spec, Lane::Sql, Lane::Ui, Lane::Test, Lane::Cicd];

/// Sampling temperature requested for lane calls.
pub const LANE_TEMPERATURE: f64 = 0.0;

/// Token ceiling for lane calls.
pub const LANE_MAX_TOKENS: u32 = 2000;

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Spec => "spec",
            Lane::Sql => "sql",
            Lane::Ui => "ui",
            Lane::Test => "test",
            Lane::Cicd => "cicd",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        LANE_ORDER.into_iter().find(|l| l.as_str() == value)
    }

    /// Zero-based position in [`LANE_ORDER`].
    pub fn position(&self) -> usize {
        match self {
            Lane::Spec => 0,
            Lane::Sql => 1,
            Lane::Ui => 2,
            Lane::Test => 3,
            Lane::Cicd => 4,
        }
    }

    /// Model used when the run has no caller default.
    pub fn default_model(&self) -> ModelId {
        match self {
            Lane::Ui => ModelId::Gemini25Pro,
            Lane::Spec | Lane::Test => ModelId::Claude45Sonnet,
            Lane::Sql | Lane::Cicd => ModelId::Gpt5,
        }
    }

    /// Resolves the model for this lane; a run default applies to every lane.
    pub fn model_for(&self, run_default: Option<ModelId>) -> ModelId {
        run_default.unwrap_or_else(|| self.default_model())
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            Lane::Spec => {
                "You are a principal software architect. Return ONLY valid JSON with keys: \
                 title, overview, functional_requirements[], non_functional_requirements[], \
                 decisions[], risks[]."
            }
            Lane::Sql => {
                "You are a senior data engineer. Return ONLY valid JSON with keys: ddl (string \
                 with the full SQL schema), tables[] (each with name, columns[], indexes[])."
            }
            Lane::Ui => {
                "You are a senior product designer. Return ONLY valid JSON with keys: \
                 component_tree, routes[], design_tokens, wireframes[]."
            }
            Lane::Test => {
                "You are a QA lead. Return ONLY valid JSON with keys: strategy, test_matrix[], \
                 unit_samples[], e2e_scenarios[]."
            }
            Lane::Cicd => {
                "You are a DevOps engineer. Return ONLY valid JSON with keys: pipeline_yaml, \
                 jobs[], secrets[], notes."
            }
        }
    }

    /// User prompt embedding only the vision.
    pub fn user_prompt(&self, vision: &str) -> String {
        format!(
            "Vision:\n{}\n\nProduce the {} artifact as JSON only.",
            vision,
            self.as_str().to_uppercase()
        )
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
