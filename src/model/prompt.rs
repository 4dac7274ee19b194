//! Prompt templates for browser and text environments.
//!
//! - **System prompts** describe the command grammar the projection layer
//!   parses (`Thought:` / `Action:` lines for the browser, `<think>` /
//!   `<action>` tags for text environments).
//! - **Intro** and **observation** texts become the `user_text` of each
//!   stored step and are later compressed by the history store.

use crate::env::{Observation, Task};
use crate::memory::{INTRO_MARKER, INTRO_PREFIX};

/// System prompt for screenshot-based browser tasks.
pub const BROWSER_SYSTEM_PROMPT: &str = r#"Imagine you are a robot browsing the web, just like humans. Now you need to complete a task. In each iteration, you will receive an Observation that includes a screenshot of a webpage and some texts. This screenshot will feature Numerical Labels placed in the TOP LEFT corner of each Web Element.
Carefully analyze the visual information to identify the Numerical Label corresponding to the Web Element that requires interaction, then follow the guidelines and choose one of the following actions:
1. Click a Web Element.
2. Delete existing content in a textbox and then type content.
3. Scroll up or down the whole window.
4. Wait. Typically used to wait for unfinished webpage processes, with a duration of 5 seconds.
5. Go back, returning to the previous webpage.
6. Google, directly jump to the Google search page.
7. Answer. This action should only be chosen when all questions in the task have been solved.

Correspondingly, Action should STRICTLY follow the format:
- Click [Numerical_Label]
- Type [Numerical_Label] [Content]
- Scroll [up] or Scroll [down]
- Wait
- GoBack
- Google
- ANSWER [content]

Key Guidelines You MUST follow:
* Action guidelines *
1) Execute only one action per iteration.
2) When clicking or typing, ensure to select the correct bounding box.
3) Numeric labels lie in the top-left corner of their corresponding bounding boxes and are colored the same.
* Web Browsing Guidelines *
1) Don't interact with useless web elements like Login, Sign-in, donation that appear in Webpages.
2) Select strategically to minimize time wasted.

Your reply should strictly follow the format:
Thought: {Your brief thoughts (briefly summarize the info that will help ANSWER)}
Action: {One Action format you choose}

Then the User will provide:
Observation: {A labeled screenshot Given by User}"#;

/// System prompt for accessibility-tree browser tasks.
pub const BROWSER_TEXT_ONLY_SYSTEM_PROMPT: &str = r#"Imagine you are a robot browsing the web, just like humans. Now you need to complete a task. In each iteration, you will receive an Observation that includes the accessibility tree of a webpage. Each interactive element is prefixed with a Numerical Label in square brackets.
Choose one of the following actions, following the format STRICTLY:
- Click [Numerical_Label]
- Type [Numerical_Label] [Content]
- Scroll [up] or Scroll [down]
- Wait
- GoBack
- Google
- ANSWER [content]

Execute only one action per iteration and only answer when every question in the task has been solved.

Your reply should strictly follow the format:
Thought: {Your brief thoughts (briefly summarize the info that will help ANSWER)}
Action: {One Action format you choose}"#;

/// System prompt for ALFWorld / WebShop text environments.
pub const TEXT_ENV_SYSTEM_PROMPT: &str = r#"You are an expert agent operating in a text-based environment.
At each step you receive the current observation and, when available, the list of admissible actions.
First reason about the current situation inside <think> </think> tags. Inside your reasoning, state what you already know in <known> </known> and what is still unknown in <unknown> </unknown>.
Then output exactly one action inside <action> </action> tags. The action must be chosen from the admissible actions when they are provided."#;

pub fn browser_system_prompt(text_only: bool) -> &'static str {
    if text_only {
        BROWSER_TEXT_ONLY_SYSTEM_PROMPT
    } else {
        BROWSER_SYSTEM_PROMPT
    }
}

/// First user message of an episode.
///
/// The task sentence precedes the viewpoint marker so it survives history
/// compression.
pub fn intro_text(task: &Task, observation: &Observation, text_only: bool) -> String {
    let mut text = format!(
        "{INTRO_PREFIX} {}  Please interact with {} and get the answer. \n{INTRO_MARKER}\n",
        task.ques, task.web
    );
    text.push_str(&observation_text(observation, text_only));
    text
}

/// User text for a step observation.
///
/// A failed action replaces the usual prompt with its diagnostic. Warnings
/// and auxiliary notes are appended on their own lines.
pub fn observation_text(observation: &Observation, text_only: bool) -> String {
    let mut text = if !observation.fail_obs.is_empty() {
        observation.fail_obs.clone()
    } else if text_only {
        format!(
            "Observation: please analyze the accessibility tree and give the Thought and Action.\n{}",
            observation.text
        )
    } else {
        "Observation: please analyze the attached screenshot and give the Thought and Action. \
See attachment for screenshot."
            .to_string()
    };
    for note in [&observation.warn_obs, &observation.aux_obs] {
        if !note.is_empty() {
            text.push('\n');
            text.push_str(note);
        }
    }
    text
}

/// User text for a text-environment step.
pub fn text_env_observation(observation: &Observation, history: &str) -> String {
    let mut text = String::new();
    if !observation.task_question.is_empty() {
        text.push_str(&format!("Your task is: {}\n", observation.task_question));
    }
    if !history.is_empty() {
        text.push_str(&format!("Prior to this step you have taken:\n{history}\n"));
    }
    text.push_str(&format!("Current observation: {}\n", observation.text));
    if let Some(actions) = &observation.available_actions {
        text.push_str(&format!("Admissible actions: [{}]\n", actions.join(", ")));
    }
    if !observation.fail_obs.is_empty() {
        text.push_str(&format!("Note: {}\n", observation.fail_obs));
    }
    text.push_str("Now it's your turn to think and take an action.");
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::PLACEHOLDER;

    fn task() -> Task {
        serde_json::from_value(serde_json::json!({
            "id": "Allrecipes--3",
            "ques": "Find a vegan lasagna recipe",
            "web": "https://www.allrecipes.com/",
            "web_name": "Allrecipes"
        }))
        .unwrap()
    }

    #[test]
    fn intro_matches_compression_template() {
        let text = intro_text(&task(), &Observation::default(), false);
        assert!(text.starts_with(
            "Now given a task: Find a vegan lasagna recipe  Please interact with https://www.allrecipes.com/ and get the answer."
        ));
        assert!(text.contains(INTRO_MARKER));
        assert!(text.ends_with("See attachment for screenshot."));
        assert!(!text.contains(PLACEHOLDER));
    }

    #[test]
    fn failure_replaces_prompt_and_warnings_append() {
        let obs = Observation {
            fail_obs: "Click action failed: stale element".into(),
            warn_obs: "note: odd element".into(),
            ..Observation::default()
        };
        assert_eq!(
            observation_text(&obs, false),
            "Click action failed: stale element\nnote: odd element"
        );
    }

    #[test]
    fn text_only_observation_includes_tree() {
        let obs = Observation {
            text: "[1] link 'Home'".into(),
            ..Observation::default()
        };
        assert!(observation_text(&obs, true).ends_with("[1] link 'Home'"));
    }

    #[test]
    fn text_env_lists_admissible_actions() {
        let obs = Observation {
            text: "You are in the kitchen.".into(),
            available_actions: Some(vec!["look".into(), "go to fridge 1".into()]),
            task_question: "put a mug in the fridge".into(),
            ..Observation::default()
        };
        let text = text_env_observation(&obs, "");
        assert!(text.contains("Your task is: put a mug in the fridge"));
        assert!(text.contains("Admissible actions: [look, go to fridge 1]"));
        assert!(!text.contains("Prior to this step"));
    }

    #[test]
    fn text_prompt_response_format_projects() {
        use crate::projection::{project_text, Grammar};

        assert!(TEXT_ENV_SYSTEM_PROMPT.contains("<action> </action>"));
        let raw = "<think><known>a mug is on the counter</known><unknown>where the fridge is</unknown></think>\n<action>go to fridge 1</action>";
        let (commands, valid) = project_text(&[raw], &Grammar::tag(), None);
        assert_eq!(commands, ["go to fridge 1"]);
        assert_eq!(valid, [true]);
    }
}
