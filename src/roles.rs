//! The role directory: configured personas for cells.
//!
//! Personas are not types; a role is a name resolved against this directory
//! to obtain a prompt template, a preferred rank, tool biases, and skills.
//! The planner consults the directory when assigning roles to subtasks; the
//! execute loop uses the prompt template as the system prompt.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::types::{CellLevel, Intent};

/// One configured persona.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoleProfile {
    pub name: String,
    pub preferred_level: CellLevel,
    /// System-prompt template; `{focus}` and `{domain}` are substituted.
    pub prompt_template: String,
    #[serde(default)]
    pub preferred_tools: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
}

impl RoleProfile {
    /// Render the system prompt for a concrete focus and domain.
    #[must_use]
    pub fn system_prompt(&self, focus: &str, domain: &str) -> String {
        self.prompt_template
            .replace("{focus}", focus)
            .replace("{domain}", domain)
    }
}

/// Name-indexed collection of role profiles.
///
/// The fallback profile is stored directly rather than looked up by name,
/// so [`resolve`](Self::resolve) always has a profile to hand back — role
/// names can arrive from planner output and need not exist.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoleDirectory {
    roles: FxHashMap<String, RoleProfile>,
    fallback: RoleProfile,
}

pub const GENERALIST: &str = "generalist";

fn generalist_profile() -> RoleProfile {
    RoleProfile {
        name: GENERALIST.to_string(),
        preferred_level: CellLevel::Staff,
        prompt_template: "You are a capable generalist working in the {domain} domain. \
                          Current focus: {focus}. Answer precisely and cite sources."
            .to_string(),
        preferred_tools: vec![],
        skills: vec!["synthesis".into()],
    }
}

impl RoleDirectory {
    /// The built-in directory shipped with the kernel.
    #[must_use]
    pub fn builtin() -> Self {
        let mut roles = FxHashMap::default();
        for profile in [
            generalist_profile(),
            RoleProfile {
                name: "researcher".to_string(),
                preferred_level: CellLevel::Staff,
                prompt_template: "You are a researcher in the {domain} domain gathering evidence \
                                  for: {focus}. Prefer primary sources and report confidence."
                    .to_string(),
                preferred_tools: vec!["search".into(), "fetch".into()],
                skills: vec!["retrieval".into(), "source-criticism".into()],
            },
            RoleProfile {
                name: "analyst".to_string(),
                preferred_level: CellLevel::SeniorStaff,
                prompt_template: "You are an analyst in the {domain} domain. Focus: {focus}. \
                                  Quantify, compare, and state assumptions explicitly."
                    .to_string(),
                preferred_tools: vec!["calculator".into(), "dataset".into()],
                skills: vec!["numeric-analysis".into(), "comparison".into()],
            },
            RoleProfile {
                name: "synthesiser".to_string(),
                preferred_level: CellLevel::Manager,
                prompt_template: "You synthesise findings in the {domain} domain into a coherent \
                                  deliverable for: {focus}. Resolve conflicts, flag gaps."
                    .to_string(),
                preferred_tools: vec![],
                skills: vec!["writing".into(), "conflict-resolution".into()],
            },
            RoleProfile {
                name: "critic".to_string(),
                preferred_level: CellLevel::SeniorStaff,
                prompt_template: "You review work in the {domain} domain against: {focus}. \
                                  Hunt unsupported claims, gaps, and formatting defects."
                    .to_string(),
                preferred_tools: vec![],
                skills: vec!["review".into()],
            },
            RoleProfile {
                name: "coder".to_string(),
                preferred_level: CellLevel::Staff,
                prompt_template: "You write and repair code in the {domain} domain. Focus: \
                                  {focus}. Output runnable code with brief rationale."
                    .to_string(),
                preferred_tools: vec!["execute_code".into()],
                skills: vec!["codegen".into(), "debugging".into()],
            },
        ] {
            roles.insert(profile.name.clone(), profile);
        }
        Self {
            roles,
            fallback: generalist_profile(),
        }
    }

    /// Look a role up by name, falling back to the generalist.
    #[must_use]
    pub fn resolve(&self, name: &str) -> &RoleProfile {
        self.roles.get(name).unwrap_or(&self.fallback)
    }

    /// Role suggested for an intent when the planner gives none.
    #[must_use]
    pub fn for_intent(&self, intent: Intent) -> &RoleProfile {
        let name = match intent {
            Intent::Research => "researcher",
            Intent::Analyse => "analyst",
            Intent::Synthesise => "synthesiser",
            Intent::Decide => "synthesiser",
            Intent::Execute => "coder",
        };
        self.resolve(name)
    }

    /// Register or replace a profile. Replacing the profile that shares
    /// the fallback's name also refreshes the fallback.
    pub fn insert(&mut self, profile: RoleProfile) {
        if profile.name == self.fallback.name {
            self.fallback = profile.clone();
        }
        self.roles.insert(profile.name.clone(), profile);
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.roles.keys().map(String::as_str).collect()
    }
}

impl Default for RoleDirectory {
    fn default() -> Self {
        Self::builtin()
    }
}
