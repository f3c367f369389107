//! Template-based script source.
//!
//! Real script content is the test suite's concern; the daemon only
//! expands a configured command template per platform and forwards the
//! artifact globs.

use rigflow_registry::Platform;
use rigflow_scheduler::{ScriptBundle, ScriptSource};

use crate::config::ScriptSection;

/// Expands `{platform}` in the configured command template.
pub struct TemplateScripts {
    template: String,
    artifacts: Vec<String>,
}

impl TemplateScripts {
    pub fn new(section: &ScriptSection) -> Self {
        Self {
            template: section.command_template.clone(),
            artifacts: section.artifacts.clone(),
        }
    }
}

impl ScriptSource for TemplateScripts {
    fn bundle(&self, platform: &Platform) -> ScriptBundle {
        ScriptBundle {
            script: self.template.replace("{platform}", &platform.id),
            artifact_patterns: self.artifacts.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform(id: &str) -> Platform {
        Platform {
            id: id.to_string(),
            labels: vec!["arm".to_string()],
        }
    }

    #[test]
    fn template_expands_platform_id() {
        let scripts = TemplateScripts::new(&ScriptSection {
            command_template: "mugen-run --platform {platform} --sudo".to_string(),
            artifacts: vec!["logs/**".to_string()],
        });

        let bundle = scripts.bundle(&platform("oe-riscv64"));
        assert_eq!(bundle.script, "mugen-run --platform oe-riscv64 --sudo");
        assert_eq!(bundle.artifact_patterns, vec!["logs/**"]);
    }

    #[test]
    fn template_without_placeholder_is_passed_through() {
        let scripts = TemplateScripts::new(&ScriptSection {
            command_template: "true".to_string(),
            artifacts: vec![],
        });
        assert_eq!(scripts.bundle(&platform("p1")).script, "true");
    }
}
