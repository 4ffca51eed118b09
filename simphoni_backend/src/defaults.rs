//! Built-in roster: nine Team Purple personas, a summarizer, and the 48-step
//! script with an OmniCall checkpoint closing each round.

use std::collections::BTreeMap;

use crate::persona::PersonaConfig;

pub const SUMMARIZER_KEY: &str = "context_model";
pub const OMNICALL: &str = "OmniCall";

const DEFAULT_PERSONA_MODEL: &str = "llama3.2:1b";
const SUMMARIZER_MODEL: &str = "phi3:14b-medium-128k-instruct-fp16";
const LARGE_CONTEXT_WINDOW: usize = 128_000;

// (key, nickname, role, context window)
const ROSTER: &[(&str, &str, &str, usize)] = &[
    ("project_manager", "The Taskmaster", "Project Manager", LARGE_CONTEXT_WINDOW),
    ("musicologist", "The Scholar of Sound", "Musicologist", LARGE_CONTEXT_WINDOW),
    ("neuroscientist", "The Neural Navigator", "Neuroscientist", 2048),
    ("data_scientist", "The Data Dynamo", "Data Scientist", 2048),
    ("technical_researcher", "The Code Whisperer", "Technical Researcher", 2048),
    ("ux_ui_designer", "The Interface Architect", "UX/UI Designer", 2048),
    ("ethicist", "The Moral Compass", "Ethicist", 2048),
    ("qa_engineer", "The Code Tester", "Quality Assurance Engineer", 2048),
    ("philosophical_writer", "The Visionary", "Philosophical Writer", 2048),
];

const ROUNDS: &[&[&str]] = &[
    &[
        "project_manager",
        "musicologist",
        "neuroscientist",
        "data_scientist",
        "technical_researcher",
        "ux_ui_designer",
        "ethicist",
        "qa_engineer",
        "philosophical_writer",
    ],
    &[
        "project_manager",
        "data_scientist",
        "technical_researcher",
        "ux_ui_designer",
        "ethicist",
        "qa_engineer",
        "philosophical_writer",
    ],
    &[
        "musicologist",
        "neuroscientist",
        "data_scientist",
        "technical_researcher",
        "ethicist",
        "qa_engineer",
        "philosophical_writer",
    ],
    &[
        "project_manager",
        "musicologist",
        "neuroscientist",
        "ux_ui_designer",
        "ethicist",
        "qa_engineer",
        "philosophical_writer",
    ],
    &[
        "data_scientist",
        "technical_researcher",
        "ux_ui_designer",
        "ethicist",
        "qa_engineer",
        "philosophical_writer",
    ],
    &[
        "project_manager",
        "musicologist",
        "neuroscientist",
        "data_scientist",
        "technical_researcher",
        "philosophical_writer",
    ],
];

pub fn default_personas() -> BTreeMap<String, PersonaConfig> {
    let mut personas: BTreeMap<String, PersonaConfig> = ROSTER
        .iter()
        .map(|(key, nickname, role, context_window)| {
            let persona = PersonaConfig::new(*key)
                .with_nickname(*nickname)
                .with_role(*role)
                .with_model(DEFAULT_PERSONA_MODEL)
                .with_context_window(*context_window);
            (key.to_string(), persona)
        })
        .collect();

    personas.insert(
        SUMMARIZER_KEY.to_string(),
        PersonaConfig::new(SUMMARIZER_KEY)
            .with_nickname("The Summarizer")
            .with_role("Context-Keeping Model")
            .with_instruct("Summarize the conversation so far in a few sentences, keeping decisions and open questions.")
            .with_model(SUMMARIZER_MODEL)
            .with_context_window(LARGE_CONTEXT_WINDOW),
    );
    personas
}

pub fn default_script() -> Vec<String> {
    let mut script = Vec::new();
    for round in ROUNDS {
        script.extend(round.iter().map(|key| key.to_string()));
        script.push(OMNICALL.to_string());
    }
    script
}
