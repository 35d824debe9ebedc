use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub description: String,
    pub github_link: String,
}

/// Static project metadata appended to the context of project questions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCatalog {
    #[serde(default)]
    pub projects: Vec<Project>,
}

impl ProjectCatalog {
    /// Load a `projects.json` file. A missing or malformed file gives an
    /// empty catalog.
    pub fn load(path: &Path) -> Self {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(path = %path.display(), %error, "project catalog not loaded");
                return Self::default();
            }
        };

        match Self::from_json(&raw) {
            Ok(catalog) => {
                info!(
                    path = %path.display(),
                    projects = catalog.projects.len(),
                    "project catalog loaded"
                );
                catalog
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "project catalog is malformed");
                Self::default()
            }
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    pub fn mentions_projects(question: &str) -> bool {
        question.to_lowercase().contains("project")
    }

    pub fn render(&self) -> String {
        let mut section = String::from("Project Information:\n");
        for project in &self.projects {
            section.push_str(&format!(
                "{}: {} GitHub: {}\n",
                project.name, project.description, project.github_link
            ));
        }
        section
    }

    /// Append the catalog to `context` when the question is about projects.
    pub fn augment(&self, question: &str, context: &mut String) {
        if self.is_empty() || !Self::mentions_projects(question) {
            return;
        }
        if !context.is_empty() {
            context.push_str("\n\n");
        }
        context.push_str(&self.render());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"{
        "projects": [
            { "name": "Weather Bot", "description": "Forecasts in chat.", "github_link": "https://github.com/example/weather-bot" }
        ]
    }"#;

    #[test]
    fn project_questions_get_the_catalog() {
        let catalog = ProjectCatalog::from_json(SAMPLE).unwrap();
        let mut context = "Some retrieved text".to_string();

        catalog.augment("Which PROJECTS have you built?", &mut context);

        assert_eq!(
            context,
            "Some retrieved text\n\nProject Information:\nWeather Bot: Forecasts in chat. GitHub: https://github.com/example/weather-bot\n"
        );
    }

    #[test]
    fn other_questions_are_left_alone() {
        let catalog = ProjectCatalog::from_json(SAMPLE).unwrap();
        let mut context = String::new();

        catalog.augment("Where did you study?", &mut context);

        assert!(context.is_empty());
    }

    #[test]
    fn missing_or_malformed_files_give_an_empty_catalog() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        assert!(ProjectCatalog::load(&dir.path().join("projects.json")).is_empty());

        let malformed = dir.path().join("broken.json");
        fs::write(&malformed, "{ not json")?;
        assert!(ProjectCatalog::load(&malformed).is_empty());
        Ok(())
    }
}
