//! Concept maps: paper ideas linked to where they likely live in code

use serde::{Deserialize, Serialize};

/// Questions offered for every paper, after the concept-specific ones
const GENERIC_QUESTIONS: [&str; 3] = [
    "What is the main model architecture?",
    "Show me the training loop",
    "How is the loss function implemented?",
];

/// A paper concept and hints for finding its implementation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Concept {
    #[serde(rename = "concept")]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub likely_files: Vec<String>,

    #[serde(default)]
    pub search_keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct KeyFunction {
    pub function_name: String,

    #[serde(default)]
    pub purpose: String,

    #[serde(default)]
    pub file_hint: String,
}

/// Structured map from paper concepts to likely source locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ConceptMap {
    #[serde(default)]
    pub main_concepts: Vec<Concept>,

    #[serde(default)]
    pub key_functions: Vec<KeyFunction>,

    #[serde(default)]
    pub architecture_overview: String,
}

impl ConceptMap {
    /// Minimal map used whenever a generated one cannot be obtained.
    pub fn fallback(paper_title: &str) -> Self {
        Self {
            main_concepts: vec![Concept {
                name: "Core Implementation".to_string(),
                description: format!("Main implementation of {}", paper_title),
                likely_files: vec!["model.py".to_string(), "main.py".to_string()],
                search_keywords: vec!["model".to_string(), "forward".to_string(), "train".to_string()],
            }],
            key_functions: Vec::new(),
            architecture_overview: format!("Implementation of {}", paper_title),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.main_concepts.is_empty() && self.key_functions.is_empty()
    }

    /// Concept-specific questions for the top three concepts, then generic ones; at most five.
    pub fn suggest_questions(&self) -> Vec<String> {
        self.main_concepts
            .iter()
            .take(3)
            .filter(|c| !c.name.trim().is_empty())
            .flat_map(|c| {
                [
                    format!("Show me the {} implementation", c.name),
                    format!("Explain how {} works in the code", c.name),
                ]
            })
            .chain(GENERIC_QUESTIONS.iter().map(|q| q.to_string()))
            .take(5)
            .collect()
    }

    /// Look up a concept by case-insensitive name.
    pub fn find(&self, name: &str) -> Option<&Concept> {
        let needle = name.trim().to_lowercase();
        self.main_concepts
            .iter()
            .find(|c| c.name.to_lowercase() == needle)
    }
}
